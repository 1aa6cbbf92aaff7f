use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wecom_relay_core::{Configuration, MsgType, ReceivedMessage, Result};

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Lookup and persistence of channel configurations.
pub trait ConfigStore: Send + Sync {
    fn get_by_code(&self, code: &str) -> Result<Option<Configuration>>;

    /// Insert or replace by `code`.
    fn save(&self, config: &Configuration) -> Result<()>;

    fn list(&self) -> Result<Vec<Configuration>>;
}

/// Persistence of inbound callback messages.
///
/// `upsert` is keyed by `message_id`: redelivery overwrites content in place and keeps `is_read`.
pub trait MessageStore: Send + Sync {
    fn upsert(&self, message: &ReceivedMessage) -> Result<()>;

    /// Returns false when no message has this id.
    fn mark_read(&self, message_id: &str) -> Result<bool>;

    /// Marks the listed messages of one configuration as read; ids belonging to
    /// another configuration are skipped. Returns how many rows matched.
    fn mark_read_many(&self, config_code: &str, message_ids: &[String]) -> Result<usize>;

    fn get(&self, message_id: &str) -> Result<Option<ReceivedMessage>>;

    fn query(&self, query: &MessageQuery) -> Result<MessagePage>;

    fn stats(&self, config_code: &str) -> Result<MessageStats>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filters for listing stored messages. Dates are `YYYY-MM-DD` and inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageQuery {
    pub config_code: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub msg_type: Option<MsgType>,
    /// Substring match on the sender id.
    pub from_user: Option<String>,
    pub to_user: Option<String>,
    /// Substring match on the message content.
    pub keyword: Option<String>,
    pub is_read: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_order: SortOrder,
}

impl MessageQuery {
    pub fn for_config(code: impl Into<String>) -> Self {
        Self {
            config_code: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> u64 {
        (self.page() as u64 - 1) * self.limit() as u64
    }

    /// In-process evaluation of the filters, mirroring the SQL built by `SqliteStore`.
    pub fn matches(&self, msg: &ReceivedMessage) -> bool {
        fn non_empty(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.is_empty())
        }

        if let Some(code) = non_empty(&self.config_code) {
            if msg.config_code != code {
                return false;
            }
        }
        if let Some(start) = non_empty(&self.start_date) {
            if msg.created_date.as_str() < start {
                return false;
            }
        }
        if let Some(end) = non_empty(&self.end_date) {
            if msg.created_date.as_str() > end {
                return false;
            }
        }
        if let Some(t) = self.msg_type {
            if msg.msg_type != t {
                return false;
            }
        }
        if let Some(from) = non_empty(&self.from_user) {
            if !msg.from_user.contains(from) {
                return false;
            }
        }
        if let Some(to) = non_empty(&self.to_user) {
            if !msg.to_user.as_deref().unwrap_or("").contains(to) {
                return false;
            }
        }
        if let Some(kw) = non_empty(&self.keyword) {
            if !msg.content.as_deref().unwrap_or("").contains(kw) {
                return false;
            }
        }
        if let Some(read) = self.is_read {
            if msg.is_read != read {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<ReceivedMessage>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl MessagePage {
    pub fn new(messages: Vec<ReceivedMessage>, total: u64, query: &MessageQuery) -> Self {
        let limit = query.limit();
        Self {
            messages,
            total,
            page: query.page(),
            limit,
            total_pages: total.div_ceil(limit as u64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DateCount {
    pub date: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    pub total_messages: u64,
    pub unread_count: u64,
    pub reply_count: u64,
    pub user_count: u64,
    pub by_type: BTreeMap<String, u64>,
    /// Most recent buckets first, at most [`STATS_DATE_BUCKETS`].
    pub by_date: Vec<DateCount>,
    pub first_message_time: Option<String>,
    pub last_message_time: Option<String>,
}

pub const STATS_DATE_BUCKETS: usize = 30;
