//! Content hashing for exact-duplicate detection.
//!
//! The digest is a Blake3 hash over the raw file bytes, so two files share a
//! [`ContentHash`] exactly when their contents are byte-identical.
use crate::error::Result;
use crate::types::ContentHash;

use std::{fs::File, io::Read, path::Path};

/// Compute the content hash of a file using the Blake3 algorithm
pub fn compute_content_hash<P: AsRef<Path>>(path: P) -> Result<ContentHash> {
    // Open the file with explicit scope to ensure it's closed promptly
    let hash = {
        let mut file = File::open(&path)?;
        let mut hasher = blake3::Hasher::new();

        // Read the file in chunks and update the hasher
        let mut buffer = [0; 64 * 1024];
        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        hasher.finalize()
    };

    Ok(ContentHash::from(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_identical_bytes_share_hash() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let c = dir.path().join("c.bin");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();
        fs::write(&c, b"other bytes").unwrap();

        let hash_a = compute_content_hash(&a).unwrap();
        assert_eq!(hash_a, compute_content_hash(&b).unwrap());
        assert_ne!(hash_a, compute_content_hash(&c).unwrap());
    }

    #[test]
    fn test_hash_matches_blake3_reference() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let expected = ContentHash::from(blake3::hash(&data));
        assert_eq!(compute_content_hash(&path).unwrap(), expected);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = compute_content_hash("/path/that/does/not/exist.png");
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
