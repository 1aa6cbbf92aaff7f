//! Per-request orchestration of the two callback flows.
//!
//! Nothing is cached between requests: token, key and corp id are read from the
//! [`ConfigStore`] on every call.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};
use wecom_relay_core::{local_time_parts, Configuration, ReceivedMessage, SecretCipher};
use wecom_relay_storage::{AuditLogger, ConfigStore, MessageStore};

use crate::cipher::CallbackCipher;
use crate::envelope::extract_encrypt;
use crate::error::{CallbackError, CallbackErrorKind};
use crate::xml::{parse_message, ParsedMessage};

/// Optional lookup of a display name for a sender id.
///
/// Returning `None` is not an error; the raw id is kept.
#[async_trait]
pub trait SenderNameResolver: Send + Sync {
    async fn resolve(&self, config: &Configuration, user_id: &str) -> Option<String>;
}

/// Everything needed to open one callback, decrypted fresh for each request.
struct CallbackMaterial {
    config: Configuration,
    token: String,
    cipher: CallbackCipher,
}

/// Wire shape of a controller outcome: `{success, data}` or `{success, kind, error}`.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<CallbackErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> From<Result<T, CallbackError>> for CallbackResponse<T> {
    fn from(result: Result<T, CallbackError>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                kind: None,
                error: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                kind: Some(e.kind()),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Id used when a callback carries no `MsgId` (events). Derived from the body so
/// redelivery of the same event lands on the same record.
pub fn fallback_message_id(xml: &str) -> String {
    let digest = hex::encode(Sha1::digest(xml.as_bytes()));
    format!("gen-{}", &digest[..32])
}

pub struct CallbackController {
    config_store: Arc<dyn ConfigStore>,
    message_store: Arc<dyn MessageStore>,
    secrets: SecretCipher,
    resolver: Option<Arc<dyn SenderNameResolver>>,
    audit: Option<Arc<AuditLogger>>,
    tz: Tz,
}

impl CallbackController {
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        message_store: Arc<dyn MessageStore>,
        secrets: SecretCipher,
    ) -> Self {
        Self {
            config_store,
            message_store,
            secrets,
            resolver: None,
            audit: None,
            tz: chrono_tz::Asia::Shanghai,
        }
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SenderNameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Configuration guard shared by both flows. A missing or disabled
    /// configuration is rejected before any secret is decrypted.
    fn load_material(&self, code: &str) -> Result<CallbackMaterial, CallbackError> {
        let config = self
            .config_store
            .get_by_code(code)
            .map_err(|e| CallbackError::Storage(e.to_string()))?
            .ok_or_else(|| CallbackError::Configuration(format!("unknown configuration '{}'", code)))?;

        if !config.callback_enabled {
            return Err(CallbackError::Configuration(format!(
                "callback disabled for '{}'",
                code
            )));
        }

        let token = config
            .callback_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CallbackError::Configuration(format!("no callback token for '{}'", code)))?;
        let encrypted_key = config
            .encrypted_encoding_aes_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                CallbackError::Configuration(format!("no EncodingAESKey for '{}'", code))
            })?;

        let encoding_aes_key = self
            .secrets
            .decrypt(encrypted_key)
            .map_err(|e| CallbackError::Secret(e.to_string()))?;
        let cipher = CallbackCipher::from_encoding_aes_key(&encoding_aes_key)?;

        Ok(CallbackMaterial {
            config,
            token,
            cipher,
        })
    }

    /// URL verification handshake. Returns the plaintext echo.
    pub fn handle_verification(
        &self,
        code: &str,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        echostr: &str,
    ) -> Result<String, CallbackError> {
        let result = self.load_material(code).and_then(|m| {
            m.cipher
                .verify_url(msg_signature, timestamp, nonce, echostr, &m.token, &m.config.corp_id)
        });

        match &result {
            Ok(_) => {
                info!(config_code = %code, "Callback URL verified");
                if let Some(audit) = &self.audit {
                    if let Err(e) = audit.log_url_verified(code) {
                        warn!(error = %e, "Failed to write audit event");
                    }
                }
            }
            Err(e) => self.log_rejection(code, "verify", e),
        }
        result
    }

    /// Message intake: signature, decrypt, parse, enrich, upsert.
    /// Nothing is stored unless every step succeeds.
    pub async fn handle_message(
        &self,
        code: &str,
        body: &str,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
    ) -> Result<ReceivedMessage, CallbackError> {
        let result = self
            .receive(code, body, msg_signature, timestamp, nonce)
            .await;

        match &result {
            Ok(message) => {
                info!(
                    config_code = %code,
                    message_id = %message.message_id,
                    msg_type = %message.msg_type,
                    from_user = %message.from_user,
                    "Callback message stored"
                );
                if let Some(audit) = &self.audit {
                    if let Err(e) = audit.log_message_stored(
                        code,
                        &message.message_id,
                        message.msg_type.as_str(),
                        &message.from_user,
                    ) {
                        warn!(error = %e, "Failed to write audit event");
                    }
                }
            }
            Err(e) => self.log_rejection(code, "message", e),
        }
        result
    }

    async fn receive(
        &self,
        code: &str,
        body: &str,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
    ) -> Result<ReceivedMessage, CallbackError> {
        let material = self.load_material(code)?;
        let encrypted = extract_encrypt(body)?;
        let xml = material.cipher.open_message(
            msg_signature,
            timestamp,
            nonce,
            &encrypted,
            &material.token,
            &material.config.corp_id,
        )?;
        debug!(config_code = %code, xml = %xml, "Decrypted callback body");

        let parsed = parse_message(&xml)?;
        let mut message = self.normalize(&material.config, parsed, &xml);
        self.attach_names(&material.config, &mut message).await;

        self.message_store
            .upsert(&message)
            .map_err(|e| CallbackError::Storage(e.to_string()))?;
        Ok(message)
    }

    fn normalize(&self, config: &Configuration, parsed: ParsedMessage, xml: &str) -> ReceivedMessage {
        let message_id = parsed
            .msg_id
            .unwrap_or_else(|| fallback_message_id(xml));
        let create_time = parsed.create_time.unwrap_or_else(|| Utc::now().timestamp());
        let (created_time, created_date) = local_time_parts(create_time, &self.tz);
        let is_reply = parsed.quote.is_some();

        ReceivedMessage {
            message_id,
            config_code: config.code.clone(),
            from_user: parsed.from_user,
            from_user_name: None,
            to_user: parsed.to_user,
            agent_id: parsed.agent_id.or(config.agent_id),
            msg_type: parsed.msg_type,
            content: parsed.content,
            media_id: parsed.media_id,
            pic_url: parsed.pic_url,
            format: parsed.format,
            recognition: parsed.recognition,
            thumb_media_id: parsed.thumb_media_id,
            location_x: parsed.location_x,
            location_y: parsed.location_y,
            scale: parsed.scale,
            label: parsed.label,
            title: parsed.title,
            description: parsed.description,
            url: parsed.url,
            file_name: parsed.file_name,
            file_size: parsed.file_size,
            quote: parsed.quote,
            event_type: parsed.event,
            event_key: parsed.event_key,
            create_time,
            created_time,
            created_date,
            is_reply,
            is_read: false,
        }
    }

    /// Best-effort display names; falls back to the raw ids.
    async fn attach_names(&self, config: &Configuration, message: &mut ReceivedMessage) {
        let mut sender_name = None;
        let mut quoted_name = None;
        if let Some(resolver) = &self.resolver {
            sender_name = resolver.resolve(config, &message.from_user).await;
            if let Some(quoted_user) = message.quote.as_ref().and_then(|q| q.quoted_from_user.clone()) {
                quoted_name = resolver.resolve(config, &quoted_user).await;
            }
        }

        message.from_user_name = Some(sender_name.unwrap_or_else(|| message.from_user.clone()));
        if let Some(quote) = message.quote.as_mut() {
            quote.quoted_from_user_name = quoted_name.or_else(|| quote.quoted_from_user.clone());
        }
    }

    fn log_rejection(&self, code: &str, phase: &str, err: &CallbackError) {
        let kind = err.kind();
        if kind.status_code() >= 500 {
            warn!(config_code = %code, phase, kind = %kind, error = %err, "Callback failed");
        } else {
            info!(config_code = %code, phase, kind = %kind, error = %err, "Callback rejected");
        }
        if let CallbackError::XmlParse { input, .. } = err {
            debug!(config_code = %code, input = %input, "Offending callback XML");
        }
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_callback_rejected(code, phase, kind.as_str(), &err.to_string()) {
                warn!(error = %e, "Failed to write audit event");
            }
        }
    }
}
