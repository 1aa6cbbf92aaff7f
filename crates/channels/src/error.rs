use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes of offending XML kept on a parse error.
pub const XML_DIAGNOSTIC_LIMIT: usize = 512;

/// Failure classes of the callback pipeline.
///
/// Display strings carry no key material and no decrypted content; the raw
/// XML kept on `XmlParse` is only meant for debug-level logs.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("signature mismatch")]
    Signature,

    #[error("callback decrypt failed: {0}")]
    Decrypt(String),

    #[error("receiver id mismatch (expected {expected}, got {actual})")]
    ReceiverMismatch { expected: String, actual: String },

    #[error("malformed callback payload: {reason}")]
    XmlParse { reason: String, input: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("stored secret could not be decrypted: {0}")]
    Secret(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackErrorKind {
    Signature,
    Decrypt,
    ReceiverMismatch,
    XmlParse,
    Configuration,
    Secret,
    Storage,
}

impl CallbackErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackErrorKind::Signature => "signature",
            CallbackErrorKind::Decrypt => "decrypt",
            CallbackErrorKind::ReceiverMismatch => "receiver_mismatch",
            CallbackErrorKind::XmlParse => "xml_parse",
            CallbackErrorKind::Configuration => "configuration",
            CallbackErrorKind::Secret => "secret",
            CallbackErrorKind::Storage => "storage",
        }
    }

    /// Validation-class failures are the caller's fault (400); the rest are ours (500).
    pub fn status_code(&self) -> u16 {
        match self {
            CallbackErrorKind::Secret | CallbackErrorKind::Storage => 500,
            _ => 400,
        }
    }
}

impl std::fmt::Display for CallbackErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CallbackError {
    pub fn xml(reason: impl Into<String>, input: &str) -> Self {
        CallbackError::XmlParse {
            reason: reason.into(),
            input: truncate_chars(input, XML_DIAGNOSTIC_LIMIT),
        }
    }

    pub fn kind(&self) -> CallbackErrorKind {
        match self {
            CallbackError::Signature => CallbackErrorKind::Signature,
            CallbackError::Decrypt(_) => CallbackErrorKind::Decrypt,
            CallbackError::ReceiverMismatch { .. } => CallbackErrorKind::ReceiverMismatch,
            CallbackError::XmlParse { .. } => CallbackErrorKind::XmlParse,
            CallbackError::Configuration(_) => CallbackErrorKind::Configuration,
            CallbackError::Secret(_) => CallbackErrorKind::Secret,
            CallbackError::Storage(_) => CallbackErrorKind::Storage,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

impl From<wecom_relay_core::Error> for CallbackError {
    fn from(e: wecom_relay_core::Error) -> Self {
        match e {
            wecom_relay_core::Error::Decryption(msg) => CallbackError::Secret(msg),
            wecom_relay_core::Error::Config(msg) | wecom_relay_core::Error::Validation(msg) => {
                CallbackError::Configuration(msg)
            }
            other => CallbackError::Storage(other.to_string()),
        }
    }
}

/// Outbound send failures.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("configuration '{0}' not found")]
    NotFound(String),

    /// Callback-only configuration: corpsecret, agent id or recipients are missing.
    #[error("configuration '{0}' is callback-only; complete it before sending")]
    IncompleteConfiguration(String),

    #[error("stored secret could not be decrypted: {0}")]
    Secret(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// `gettoken` refused the corp id / corpsecret pair.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("WeCom request failed: {0}")]
    Http(String),

    #[error("WeCom API error {errcode}: {errmsg}")]
    Api { errcode: i64, errmsg: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl NotifyError {
    /// Caller mistakes map to 400, upstream/internal failures to 502/500.
    pub fn status_code(&self) -> u16 {
        match self {
            NotifyError::NotFound(_) => 404,
            NotifyError::IncompleteConfiguration(_)
            | NotifyError::InvalidMessage(_)
            | NotifyError::InvalidCredentials(_) => 400,
            NotifyError::Http(_) | NotifyError::Api { .. } => 502,
            NotifyError::Secret(_) | NotifyError::Storage(_) => 500,
        }
    }
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
