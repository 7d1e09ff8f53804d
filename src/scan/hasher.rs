/// Content digests used as the dedup key
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::{Error, Result};

/// Files are streamed through the digest in chunks of this size
const CHUNK_SIZE: usize = 1024 * 1024; // 1MB

/// Hex-encoded 128-bit digest of the file's bytes. Independent of the path.
pub fn content_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io(path, e)),
        };
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        fs::write(&path, b"").unwrap();
        assert_eq!(content_hash(&path).unwrap(), "d41d8cd98f00b204e9800998ecf8427e");

        fs::write(&path, b"abc").unwrap();
        assert_eq!(content_hash(&path).unwrap(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_same_content_same_hash_regardless_of_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("nested-b.jpg");
        // Larger than one chunk so the streaming loop runs more than once
        let payload: Vec<u8> = (0..(CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&a, &payload).unwrap();
        fs::write(&b, &payload).unwrap();

        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = content_hash(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
