use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Runtime configuration, read from environment variables.
///
/// The service is designed to run in a container with two mounts: a
/// read-only photo library and a read/write data directory. Everything
/// else (thumbnails, extracted motion videos, the catalog database,
/// downloaded models) lives under the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the photo library (read-only).
    pub photos_path: PathBuf,

    /// Root of the writable data area.
    pub data_dir: PathBuf,

    /// Filesystem watch coalescing window in seconds.
    pub watch_interval: u64,

    /// Base URL of the Ollama endpoint used for captioning and tagging.
    /// Empty disables both stages.
    pub ollama_url: String,

    /// Vision model name passed to Ollama.
    pub ollama_model: String,

    /// Log verbosity (trace/debug/info/warn/error).
    pub log_level: String,

    /// HTTP listen port.
    pub port: u16,

    /// Lowercased photo file extensions (with leading dot) that are indexed.
    pub photo_extensions: Vec<String>,
}

fn default_photo_extensions() -> Vec<String> {
    [
        ".jpg", ".jpeg", ".png", ".webp", ".heic", ".heif", ".tiff", ".tif", ".bmp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            photos_path: PathBuf::from("/photos"),
            data_dir: PathBuf::from("/data"),
            watch_interval: 30,
            ollama_url: String::new(),
            ollama_model: "qwen3-vl:30b-a3b-instruct".to_string(),
            log_level: "info".to_string(),
            port: 8080,
            photo_extensions: default_photo_extensions(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Self {
            photos_path: env_var("PHOTOS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.photos_path),
            data_dir: env_var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            watch_interval: env_var("WATCH_INTERVAL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.watch_interval),
            ollama_url: env_var("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            ollama_model: env_var("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            log_level: env_var("LOG_LEVEL").unwrap_or(defaults.log_level),
            port: env_var("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            photo_extensions: defaults.photo_extensions,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db").join("lumika.db")
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.data_dir.join("thumbs")
    }

    pub fn faces_dir(&self) -> PathBuf {
        self.data_dir.join("faces")
    }

    pub fn motion_dir(&self) -> PathBuf {
        self.data_dir.join("motion_videos")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Path to the offline reverse-geocoding place table, if bundled.
    pub fn places_path(&self) -> PathBuf {
        self.models_dir().join("cities.tsv")
    }

    pub fn captioning_enabled(&self) -> bool {
        !self.ollama_url.trim().is_empty()
    }

    pub fn is_supported_photo(&self, path: &std::path::Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let dotted = format!(".{}", ext.to_lowercase());
                self.photo_extensions.iter().any(|e| *e == dotted)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.photos_path, PathBuf::from("/photos"));
        assert_eq!(config.watch_interval, 30);
        assert!(!config.captioning_enabled());
        assert_eq!(config.db_path(), PathBuf::from("/data/db/lumika.db"));
    }

    #[test]
    fn test_supported_extensions() {
        let config = Config::default();
        assert!(config.is_supported_photo(std::path::Path::new("/photos/a.JPG")));
        assert!(config.is_supported_photo(std::path::Path::new("/photos/b.heic")));
        assert!(!config.is_supported_photo(std::path::Path::new("/photos/c.mp4")));
        assert!(!config.is_supported_photo(std::path::Path::new("/photos/noext")));
    }
}
