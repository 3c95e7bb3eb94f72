//! Streaming SHA-256 helpers.

use sha2::{Digest, Sha256};
use std::io::Read;

/// Compute the lowercase hex SHA-256 of a reader, consuming it to EOF.
///
/// Returns `None` for an empty stream: an entry without content has no
/// digest and must fail any integrity check against a digest-named key.
pub fn sha256_hex<R: Read>(mut reader: R) -> std::io::Result<Option<String>> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        hasher.update(&buf[..n]);
    }
    if total == 0 {
        return Ok(None);
    }
    Ok(Some(hex::encode(hasher.finalize())))
}

/// Compute the lowercase hex SHA-256 of an in-memory buffer.
pub fn sha256_hex_of(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
