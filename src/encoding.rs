//! Reversible, URL-safe text encoding for identifiers embedded in callback paths.
//!
//! Document ids, storage ids and file names contain `:`, `/` and arbitrary
//! UTF-8, so they travel through path segments as unpadded URL-safe base64.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::error::{Result, ServerError};

/// Encode an identifier for use in a single URL path segment.
pub fn encode_segment(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(value.as_bytes())
}

/// Decode a segment produced by [`encode_segment`].
///
/// Trailing `=` padding is tolerated so values encoded by other clients still decode.
pub fn decode_segment(encoded: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| ServerError::InvalidRequest(format!("Invalid encoded segment '{}': {}", encoded, e)))?;

    String::from_utf8(bytes)
        .map_err(|_| ServerError::InvalidRequest(format!("Encoded segment '{}' is not UTF-8", encoded)))
}

/// Viewer URNs are the same encoding applied to an object id.
pub fn encode_urn(object_id: &str) -> String {
    encode_segment(object_id)
}
