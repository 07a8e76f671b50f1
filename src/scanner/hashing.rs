//! Content identity: SHA-256 over the raw file bytes.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

const HASH_BUFFER_SIZE: usize = 65536;

/// Compute the file identifier. Two files with identical bytes always get
/// the same identifier regardless of path or mtime.
pub fn content_hash(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; HASH_BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_identical_bytes_identical_hash() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("subdir-less-b.jpg");
        std::fs::File::create(&a)
            .unwrap()
            .write_all(b"pixels")
            .unwrap();
        std::fs::File::create(&b)
            .unwrap()
            .write_all(b"pixels")
            .unwrap();

        let ha = content_hash(&a).unwrap();
        let hb = content_hash(&b).unwrap();
        assert_eq!(ha, hb);
        assert_eq!(ha.len(), 64);
        assert!(ha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_different_bytes_different_hash() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        std::fs::write(&a, b"one").unwrap();
        std::fs::write(&b, b"two").unwrap();
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_empty_file_hashes() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("empty.jpg");
        std::fs::write(&a, b"").unwrap();
        // SHA-256 of the empty string.
        assert_eq!(
            content_hash(&a).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
