//! Random values for generated secrets

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

use crate::error::{Error, Result};

/// Bytes of entropy behind each generated value
pub const RANDOM_BYTES: usize = 32;

/// Fold the standard base64 alphabet onto lowercase letters so the value is
/// safe in hostnames, URLs and connection strings.
fn fold(c: char) -> char {
    match c {
        'A'..='Z' => c.to_ascii_lowercase(),
        '0'..='9' => (b'a' + (c as u8 - b'0')) as char,
        '+' => 'k',
        '/' => 'l',
        other => other,
    }
}

/// Encode raw bytes into the unpadded lowercase alphabet
pub fn encode(raw: &[u8]) -> String {
    STANDARD_NO_PAD.encode(raw).chars().map(fold).collect()
}

/// Generate `size` random bytes and encode them
pub fn random_string(size: usize) -> Result<String> {
    let mut raw = vec![0u8; size];
    OsRng
        .try_fill_bytes(&mut raw)
        .map_err(|e| Error::Random(e.to_string()))?;
    Ok(encode(&raw))
}
