//! Ollama vision client for captioning and tagging.
//!
//! Entirely optional: an empty base URL disables both stages, and an
//! unreachable endpoint puts the client into a cool-down so the pipeline
//! is not held hostage by a stopped model server. Caption and tag workers
//! share one client and therefore one request pacing.

use serde_json::json;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine;

use crate::error::StageError;

/// Longest edge sent to the model; larger images are downscaled first.
const MAX_IMAGE_DIMENSION: u32 = 1024;

/// After a failed availability probe, skip further attempts this long.
const COOLDOWN: Duration = Duration::from_secs(300);

/// Minimum spacing between requests, shared across workers.
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(500);

const CAPTION_PROMPT: &str = "Describe this photo in one or two concise sentences. \
     Focus on the main subject, setting, and any notable details. \
     Be specific and descriptive.";

const TAG_PROMPT: &str = "List tags for this photo as a comma-separated list. \
     Include: specific objects, scenes, activities, locations/landmarks, \
     colors, mood, weather, time of day, and any other relevant descriptors. \
     Be specific (e.g. 'golden retriever' not just 'dog'). \
     Return ONLY the comma-separated tags, nothing else. \
     Example: sunset, beach, ocean, golden hour, waves, silhouette";

pub struct OllamaClient {
    base_url: Option<String>,
    model: String,
    agent: ureq::Agent,
    cooldown_until: Mutex<Option<Instant>>,
    last_request: Mutex<Option<Instant>>,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        let trimmed = base_url.trim().trim_end_matches('/');
        Self {
            base_url: if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            },
            model: model.to_string(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(120))
                .build(),
            cooldown_until: Mutex::new(None),
            last_request: Mutex::new(None),
        }
    }

    pub fn enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// Probe the endpoint. A failed probe starts a cool-down during which
    /// this returns false without touching the network.
    pub fn available(&self) -> bool {
        let Some(base) = &self.base_url else {
            return false;
        };

        {
            let cooldown = self.cooldown_until.lock().unwrap();
            if let Some(until) = *cooldown {
                if Instant::now() < until {
                    return false;
                }
            }
        }

        let probe = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build()
            .get(&format!("{base}/api/tags"))
            .call();
        match probe {
            Ok(_) => {
                *self.cooldown_until.lock().unwrap() = None;
                true
            }
            Err(e) => {
                tracing::info!(error = %e, "Ollama unreachable, entering cool-down");
                *self.cooldown_until.lock().unwrap() = Some(Instant::now() + COOLDOWN);
                false
            }
        }
    }

    /// Shared token-bucket-of-one: space requests out across workers.
    fn throttle(&self) {
        let mut last = self.last_request.lock().unwrap();
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                std::thread::sleep(MIN_REQUEST_INTERVAL - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn generate(&self, prompt: &str, image_base64: &str, num_predict: u32) -> Result<String, StageError> {
        let Some(base) = &self.base_url else {
            return Err(StageError::ExternalDisabled);
        };
        self.throttle();

        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "images": [image_base64],
            "stream": false,
            "options": {
                "temperature": 0.3,
                "num_predict": num_predict,
            },
        });

        let response = self
            .agent
            .post(&format!("{base}/api/generate"))
            .set("Content-Type", "application/json")
            .send_json(&body)
            .map_err(|e| {
                *self.cooldown_until.lock().unwrap() = Some(Instant::now() + COOLDOWN);
                tracing::warn!(error = %e, "Ollama request failed");
                StageError::ExternalDisabled
            })?;

        let parsed: serde_json::Value = response
            .into_json()
            .map_err(|e| StageError::TransientIo(format!("bad Ollama response: {e}")))?;
        let text = parsed
            .get("response")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(strip_think_blocks(text))
    }

    pub fn caption(&self, image_base64: &str) -> Result<Option<String>, StageError> {
        let caption = self.generate(CAPTION_PROMPT, image_base64, 150)?;
        Ok(if caption.is_empty() { None } else { Some(caption) })
    }

    pub fn tags(&self, image_base64: &str) -> Result<Vec<String>, StageError> {
        let raw = self.generate(TAG_PROMPT, image_base64, 200)?;
        Ok(normalize_tags(&raw))
    }
}

/// Reasoning models wrap deliberation in think blocks; strip them.
pub fn strip_think_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("<think>") {
        out.push_str(&rest[..open]);
        match rest[open..].find("</think>") {
            Some(close) => rest = &rest[open + close + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Lowercase, trim, bound length, de-duplicate preserving order, cap at 15.
pub fn normalize_tags(raw: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| (2..=80).contains(&t.len()))
        .filter(|t| seen.insert(t.clone()))
        .take(15)
        .collect()
}

/// Load, orient and downscale an image, returning base64 JPEG for the
/// model payload.
pub fn prepare_image_base64(path: &Path, orientation: Option<i64>) -> Result<String, StageError> {
    let img = image::open(path)?;
    let img = crate::stages::thumbs::apply_orientation(img, orientation.unwrap_or(1));
    let img = if img.width().max(img.height()) > MAX_IMAGE_DIMENSION {
        img.thumbnail(MAX_IMAGE_DIMENSION, MAX_IMAGE_DIMENSION)
    } else {
        img
    };

    let mut jpeg = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 85);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| StageError::PermanentDecode(e.to_string()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(&jpeg))
}
