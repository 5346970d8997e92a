#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `checksums` provides the content digest used for change detection across
//! the tether workspace. Both the controller-side file cache and the remote
//! agent index compute the same streaming 64-bit XXH64 digest, rendered as a
//! 16-character lowercase hex string, so digest equality is a platform-stable
//! answer to "did this file change".
//!
//! # Invariants
//!
//! - Identical byte sequences produce identical digests on every platform.
//! - An empty input always hashes to [`EMPTY_DIGEST`].
//! - Open and read failures surface as [`HashError`]; the hasher never
//!   silently substitutes a stable value for unreadable content.
//!
//! # Examples
//!
//! ```
//! use checksums::{hash_bytes, EMPTY_DIGEST};
//!
//! assert_eq!(hash_bytes(b""), EMPTY_DIGEST);
//! assert_eq!(hash_bytes(b"hello"), hash_bytes(b"hello"));
//! assert_ne!(hash_bytes(b"hello"), hash_bytes(b"hell0"));
//! ```

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use xxhash_rust::xxh64::Xxh64;

/// Read granularity for streaming digests.
const CHUNK_SIZE: usize = 64 * 1024;

/// Digest of the empty input (XXH64 with seed 0).
pub const EMPTY_DIGEST: &str = "ef46db3751d8e999";

/// Failures while digesting file content.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// The file could not be opened.
    #[error("open {path}: {source}")]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// A read from an already-open stream failed.
    #[error("read {path}: {source}")]
    Read {
        /// Path the stream was opened from.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Digest an in-memory byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Xxh64::new(0);
    hasher.update(data);
    render(hasher.digest())
}

/// Digest a reader to completion in [`CHUNK_SIZE`] chunks.
///
/// `path` is only used to label errors; the reader itself is the data source.
pub fn hash_reader<R: Read>(path: &Path, mut reader: R) -> Result<String, HashError> {
    let mut hasher = Xxh64::new(0);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).map_err(|source| HashError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(render(hasher.digest()))
}

/// Digest a file's content.
///
/// # Errors
///
/// Returns [`HashError::Open`] when the file cannot be opened and
/// [`HashError::Read`] when a read fails mid-stream.
pub fn hash_file(path: &Path) -> Result<String, HashError> {
    let file = File::open(path).map_err(|source| HashError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    hash_reader(path, file)
}

fn render(digest: u64) -> String {
    format!("{digest:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_input_hashes_to_sentinel() {
        assert_eq!(hash_bytes(b""), EMPTY_DIGEST);
    }

    #[test]
    fn digest_is_deterministic() {
        let a = hash_bytes(b"the same content");
        let b = hash_bytes(b"the same content");
        assert_eq!(a, b);
    }

    #[test]
    fn digest_is_sixteen_lowercase_hex_chars() {
        let digest = hash_bytes(b"anything");
        assert_eq!(digest.len(), 16);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, digest.to_lowercase());
    }

    #[test]
    fn streaming_matches_one_shot() {
        // Content larger than one chunk so the loop actually iterates.
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let streamed = hash_reader(Path::new("mem"), content.as_slice()).unwrap();
        assert_eq!(streamed, hash_bytes(&content));
    }

    #[test]
    fn file_digest_matches_byte_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"file payload").unwrap();
        drop(file);

        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"file payload"));
    }

    #[test]
    fn empty_file_hashes_to_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        File::create(&path).unwrap();

        assert_eq!(hash_file(&path).unwrap(), EMPTY_DIGEST);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = hash_file(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, HashError::Open { .. }));
    }
}
