//! Transport encoding for cryptographic message bodies.
//!
//! Ciphertext and exchange material travel base64-encoded inside the text
//! body. Message bodies use the standard alphabet with padding; key-exchange
//! bodies are written without padding and must decode either way.

use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::{alphabet, Engine};

/// Accepts both padded and unpadded input; encodes without padding.
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transport encoding: {0}")]
pub struct EncodingError(String);

/// Decode a message body.
pub fn decode_body(body: &str) -> Result<Vec<u8>, EncodingError> {
    STANDARD
        .decode(body)
        .map_err(|e| EncodingError(e.to_string()))
}

/// Encode a message body.
pub fn encode_body(raw: &[u8]) -> String {
    STANDARD.encode(raw)
}

/// Decode a key-exchange body (padding optional).
pub fn decode_exchange(body: &str) -> Result<Vec<u8>, EncodingError> {
    STANDARD_LENIENT
        .decode(body)
        .map_err(|e| EncodingError(e.to_string()))
}

/// Encode a key-exchange body without padding.
pub fn encode_exchange(raw: &[u8]) -> String {
    STANDARD_LENIENT.encode(raw)
}
