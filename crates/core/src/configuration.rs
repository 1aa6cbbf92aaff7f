use serde::{Deserialize, Serialize};

/// A notification channel bound to one 企业微信 app, addressed by its opaque `code`.
///
/// Created in two steps: callback credentials first, then corpsecret/agent/recipients.
/// Until the second step lands the configuration is callback-only and cannot send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub code: String,
    pub corp_id: String,
    #[serde(default)]
    pub encrypted_corp_secret: Option<String>,
    #[serde(default)]
    pub agent_id: Option<i64>,
    /// Ordered recipient user ids, sent as `touser` joined with `|`.
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub callback_token: Option<String>,
    #[serde(default)]
    pub encrypted_encoding_aes_key: Option<String>,
    #[serde(default)]
    pub callback_enabled: bool,
    pub created_at: String,
}

impl Configuration {
    /// Start a callback-only configuration with a freshly generated code.
    pub fn new_callback(
        corp_id: impl Into<String>,
        callback_token: impl Into<String>,
        encrypted_encoding_aes_key: impl Into<String>,
    ) -> Self {
        Self {
            code: uuid::Uuid::new_v4().to_string(),
            corp_id: corp_id.into(),
            encrypted_corp_secret: None,
            agent_id: None,
            recipients: Vec::new(),
            description: None,
            callback_token: Some(callback_token.into()),
            encrypted_encoding_aes_key: Some(encrypted_encoding_aes_key.into()),
            callback_enabled: true,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// True once outbound sending has everything it needs.
    pub fn is_complete(&self) -> bool {
        self.encrypted_corp_secret
            .as_deref()
            .map_or(false, |s| !s.is_empty())
            && self.agent_id.is_some()
            && !self.recipients.is_empty()
    }

    pub fn touser(&self) -> String {
        self.recipients.join("|")
    }

    /// Split a `|` or `,` separated recipient list, dropping blanks and duplicates.
    pub fn parse_recipients(raw: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for id in raw.split(['|', ',']).map(str::trim).filter(|s| !s.is_empty()) {
            if !out.iter().any(|existing| existing == id) {
                out.push(id.to_string());
            }
        }
        out
    }
}
