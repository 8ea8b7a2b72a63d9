//! Base64 key material decoding.
//!
//! Keys are stored as URL-safe base64 by convention, but operators paste
//! standard-alphabet and padded strings too. Every common alphabet is tried.

use base64::Engine;
use base64::engine::general_purpose;

/// Decode base64 key material, accepting URL-safe or standard alphabets with
/// or without padding. Surrounding whitespace is ignored.
///
/// # Errors
/// Returns a description when the input is empty or not base64 in any
/// accepted alphabet.
pub fn decode_key_material(raw: &str) -> Result<Vec<u8>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("key material is empty".to_string());
    }

    let engines = [
        &general_purpose::URL_SAFE_NO_PAD,
        &general_purpose::URL_SAFE,
        &general_purpose::STANDARD,
        &general_purpose::STANDARD_NO_PAD,
    ];
    engines
        .iter()
        .find_map(|engine| engine.decode(trimmed).ok())
        .ok_or_else(|| "key material is not valid base64".to_string())
}
