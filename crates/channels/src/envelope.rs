//! Extraction of the encrypted payload from a POSTed callback body.

use serde::Deserialize;

use crate::error::CallbackError;
use crate::xml::parse_tree;

#[derive(Deserialize)]
struct JsonEnvelope {
    #[serde(rename = "Encrypt")]
    encrypt: String,
}

/// Pull the Base64 ciphertext out of `<xml><Encrypt>…</Encrypt></xml>`,
/// `{"Encrypt": "…"}`, or a bare Base64 body.
pub fn extract_encrypt(body: &str) -> Result<String, CallbackError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(CallbackError::xml("empty callback body", body));
    }

    let encrypt = if trimmed.starts_with('<') {
        parse_tree(trimmed)?
            .child_text("Encrypt")
            .ok_or_else(|| CallbackError::xml("missing <Encrypt> element", trimmed))?
    } else if trimmed.starts_with('{') {
        serde_json::from_str::<JsonEnvelope>(trimmed)
            .map_err(|e| CallbackError::xml(format!("invalid JSON envelope: {}", e), trimmed))?
            .encrypt
    } else {
        trimmed.to_string()
    };

    let encrypt = encrypt.trim().to_string();
    if encrypt.is_empty() {
        return Err(CallbackError::xml("empty Encrypt field", trimmed));
    }
    Ok(encrypt)
}
