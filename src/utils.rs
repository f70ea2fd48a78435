use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::time::Duration;

use chrono::{Local, Utc};
use hex::encode;
use sha2::{Digest, Sha256};

pub struct Utils;

impl Utils {
    /// Current UTC time as unix seconds, the representation used for every timestamp column.
    pub fn now_secs() -> i64 {
        Utc::now().timestamp()
    }

    /// Local wall-clock stamp used in backup file names, e.g. `20240311-142501`.
    pub fn file_stamp() -> String {
        Local::now().format("%Y%m%d-%H%M%S").to_string()
    }

    /// Hex SHA-256 of a file's contents, read in 8 KiB chunks.
    pub fn sha256_file(path: &Path) -> Result<String, io::Error> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut hasher = Sha256::new();
        let mut buffer = [0; 8192];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(encode(hasher.finalize()))
    }

    pub fn format_elapsed(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        if secs < 60 {
            format!("{}.{:01}s", secs, elapsed.subsec_millis() / 100)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(Utils::format_elapsed(Duration::from_millis(2_340)), "2.3s");
        assert_eq!(Utils::format_elapsed(Duration::from_secs(125)), "2m 5s");
        assert_eq!(Utils::format_elapsed(Duration::from_secs(7_380)), "2h 3m");
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            Utils::sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(Utils::sha256_file(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_file_stamp_shape() {
        let stamp = Utils::file_stamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(stamp.as_bytes()[8], b'-');
        assert!(stamp.chars().filter(|c| *c != '-').all(|c| c.is_ascii_digit()));
    }
}
