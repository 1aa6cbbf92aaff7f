use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;
use tracing::error;
use wecom_relay_core::{Error, Paths, Result};

/// One line of the daily callback audit trail. Never carries key material or message bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    UrlVerified {
        config_code: String,
        timestamp_ms: i64,
    },
    MessageStored {
        config_code: String,
        message_id: String,
        msg_type: String,
        from_user: String,
        timestamp_ms: i64,
    },
    CallbackRejected {
        config_code: String,
        /// `verification` or `message`.
        phase: String,
        kind: String,
        detail: String,
        timestamp_ms: i64,
    },
    NotificationSent {
        config_code: String,
        msg_type: String,
        chunks: usize,
        timestamp_ms: i64,
    },
}

/// Appends [`AuditEvent`]s to `audit/YYYY-MM-DD.jsonl` (UTC date).
pub struct AuditLogger {
    paths: Paths,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            write_lock: Mutex::new(()),
        }
    }

    pub fn log_url_verified(&self, config_code: &str) -> Result<()> {
        self.write_event(&AuditEvent::UrlVerified {
            config_code: config_code.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }

    pub fn log_message_stored(
        &self,
        config_code: &str,
        message_id: &str,
        msg_type: &str,
        from_user: &str,
    ) -> Result<()> {
        self.write_event(&AuditEvent::MessageStored {
            config_code: config_code.to_string(),
            message_id: message_id.to_string(),
            msg_type: msg_type.to_string(),
            from_user: from_user.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }

    pub fn log_callback_rejected(
        &self,
        config_code: &str,
        phase: &str,
        kind: &str,
        detail: &str,
    ) -> Result<()> {
        self.write_event(&AuditEvent::CallbackRejected {
            config_code: config_code.to_string(),
            phase: phase.to_string(),
            kind: kind.to_string(),
            detail: detail.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }

    pub fn log_notification_sent(&self, config_code: &str, msg_type: &str, chunks: usize) -> Result<()> {
        self.write_event(&AuditEvent::NotificationSent {
            config_code: config_code.to_string(),
            msg_type: msg_type.to_string(),
            chunks,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }

    fn write_event(&self, event: &AuditEvent) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| Error::Storage(format!("Audit lock error: {}", e)))?;

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let log_file = self.paths.audit_file(&today);
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    /// Read audit events from a specific date
    pub fn read_events(&self, date: &str) -> Result<Vec<AuditEvent>> {
        let log_file = self.paths.audit_file(date);
        if !log_file.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&log_file)?;
        let mut events = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    error!(error = %e, "Failed to parse audit event");
                }
            }
        }
        Ok(events)
    }

    pub fn read_today(&self) -> Result<Vec<AuditEvent>> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        self.read_events(&today)
    }
}
