use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;

/// Refresh this many seconds before the token actually expires.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// `gettoken` default lifetime when the response omits `expires_in`.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 7200;

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Access tokens keyed by corp id and agent id, each with its own expiry.
pub struct TokenCache {
    entries: Mutex<HashMap<(String, i64), CachedToken>>,
    margin_secs: i64,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::with_margin(TOKEN_REFRESH_MARGIN_SECS)
    }

    pub fn with_margin(margin_secs: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            margin_secs,
        }
    }

    pub async fn get(&self, corp_id: &str, agent_id: i64) -> Option<String> {
        self.get_at(corp_id, agent_id, Utc::now().timestamp()).await
    }

    async fn get_at(&self, corp_id: &str, agent_id: i64, now: i64) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(&(corp_id.to_string(), agent_id))
            .filter(|t| now < t.expires_at - self.margin_secs)
            .map(|t| t.token.clone())
    }

    pub async fn insert(&self, corp_id: &str, agent_id: i64, token: String, expires_in: i64) {
        self.insert_at(corp_id, agent_id, token, expires_in, Utc::now().timestamp())
            .await
    }

    async fn insert_at(&self, corp_id: &str, agent_id: i64, token: String, expires_in: i64, now: i64) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            (corp_id.to_string(), agent_id),
            CachedToken {
                token,
                expires_at: now + expires_in,
            },
        );
    }

    /// Drop a token the API has rejected (errcode 40014 / 42001).
    pub async fn invalidate(&self, corp_id: &str, agent_id: i64) {
        self.entries
            .lock()
            .await
            .remove(&(corp_id.to_string(), agent_id));
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_token_is_served() {
        let cache = TokenCache::new();
        cache.insert_at("ww1", 1000002, "tok".into(), 7200, 1_000).await;
        assert_eq!(cache.get_at("ww1", 1000002, 1_001).await.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_refresh_margin() {
        let cache = TokenCache::new();
        cache.insert_at("ww1", 1, "tok".into(), 7200, 0).await;
        assert!(cache.get_at("ww1", 1, 7200 - 301).await.is_some());
        assert!(cache.get_at("ww1", 1, 7200 - 300).await.is_none());
    }

    #[tokio::test]
    async fn test_keys_are_per_corp_and_agent() {
        let cache = TokenCache::new();
        cache.insert_at("ww1", 1, "a".into(), 7200, 0).await;
        cache.insert_at("ww1", 2, "b".into(), 7200, 0).await;
        assert_eq!(cache.get_at("ww1", 1, 10).await.as_deref(), Some("a"));
        assert_eq!(cache.get_at("ww1", 2, 10).await.as_deref(), Some("b"));
        assert!(cache.get_at("ww2", 1, 10).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = TokenCache::new();
        cache.insert("ww1", 1, "a".into(), 7200).await;
        assert!(cache.get("ww1", 1).await.is_some());
        cache.invalidate("ww1", 1).await;
        assert!(cache.get("ww1", 1).await.is_none());
    }
}
