//! Byte-level feature encoding.
//!
//! Each payload byte `b` becomes token `b + 1`; token `0` pads short
//! payloads on the right. Long payloads keep their first `length` bytes.

use tl_types::FeatureVector;

/// Token used for padding.
pub const PAD_TOKEN: u32 = 0;

/// Encodes a payload into exactly `length` tokens.
pub fn encode_payload(payload: &str, length: usize) -> FeatureVector {
    let mut tokens: Vec<u32> = payload
        .as_bytes()
        .iter()
        .take(length)
        .map(|&b| u32::from(b) + 1)
        .collect();
    tokens.resize(length, PAD_TOKEN);
    FeatureVector(tokens)
}

/// Recovers the (possibly truncated) payload text from tokens.
///
/// Padding and out-of-range tokens are ignored; invalid UTF-8 left by
/// truncation inside a multi-byte character is replaced.
pub fn decode_tokens(tokens: &[u32]) -> String {
    let bytes: Vec<u8> = tokens
        .iter()
        .filter_map(|&t| match t {
            1..=256 => u8::try_from(t - 1).ok(),
            _ => None,
        })
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
