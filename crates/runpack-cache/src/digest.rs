use runpack_schema::ChecksumAlgorithm;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const CHUNK: usize = 64 * 1024;

/// Incremental hasher for either supported algorithm.
pub enum Digester {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Digester {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            ChecksumAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Hash a file on disk without loading it into memory.
pub fn hash_file(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String, std::io::Error> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut digester = Digester::new(algorithm);
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digester.update(&buf[..n]);
    }
    Ok(digester.finalize_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_input() {
        let mut d = Digester::new(ChecksumAlgorithm::Sha256);
        d.update(b"hello");
        assert_eq!(
            d.finalize_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn blake3_matches_one_shot_hash() {
        let mut d = Digester::new(ChecksumAlgorithm::Blake3);
        d.update(b"hel");
        d.update(b"lo");
        assert_eq!(d.finalize_hex(), blake3::hash(b"hello").to_hex().to_string());
    }

    #[test]
    fn hash_file_streams_large_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        let data = vec![0x5Au8; CHUNK * 3 + 17];
        std::fs::write(&path, &data).unwrap();

        let mut d = Digester::new(ChecksumAlgorithm::Sha256);
        d.update(&data);
        assert_eq!(
            hash_file(&path, ChecksumAlgorithm::Sha256).unwrap(),
            d.finalize_hex()
        );
    }
}
