//! Composite key encoding for the durable regions
//!
//! Composite keys concatenate length-prefixed components so that plain
//! byte comparison groups every entry of a collection into one contiguous
//! key range: all keys `(a, *)` share the exact byte prefix `encode_one(a)`.

use crate::error::{Result, ShoalError};

/// Encode a single key component: `[len as u32 BE][bytes]`
pub fn encode_one(a: &str) -> Vec<u8> {
    let bytes = a.as_bytes();
    let mut out = Vec::with_capacity(4 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

/// Encode a two-component composite key
pub fn encode_pair(a: &str, b: &str) -> Vec<u8> {
    let mut out = encode_one(a);
    out.extend_from_slice(&encode_one(b));
    out
}

/// Decode a two-component composite key
pub fn decode_pair(key: &[u8]) -> Result<(String, String)> {
    let (first, rest) = split_component(key)?;
    let (second, tail) = split_component(rest)?;
    if !tail.is_empty() {
        return Err(ShoalError::CorruptState(
            "trailing bytes after composite key".to_string(),
        ));
    }
    Ok((first, second))
}

fn split_component(bytes: &[u8]) -> Result<(String, &[u8])> {
    if bytes.len() < 4 {
        return Err(ShoalError::CorruptState(
            "truncated composite key length".to_string(),
        ));
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let rest = &bytes[4..];
    if rest.len() < len {
        return Err(ShoalError::CorruptState(
            "truncated composite key component".to_string(),
        ));
    }
    let component = std::str::from_utf8(&rest[..len])
        .map_err(|_| ShoalError::CorruptState("non-UTF-8 key component".to_string()))?
        .to_string();
    Ok((component, &rest[len..]))
}
