//! Outbound side of a configuration: `message/send` through the app's agent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use wecom_relay_core::config::WeComConfig;
use wecom_relay_core::{Configuration, SecretCipher};
use wecom_relay_storage::{AuditLogger, ConfigStore};

use crate::controller::SenderNameResolver;
use crate::error::NotifyError;
use crate::rate_limit::SendRateLimiter;
use crate::token_cache::{TokenCache, DEFAULT_TOKEN_TTL_SECS};

/// Characters per text/markdown message; longer bodies go out as several messages.
pub const WECOM_MSG_LIMIT: usize = 2048;
/// `news` accepts 1..=8 articles.
pub const MAX_NEWS_ARTICLES: usize = 8;

/// `errcode`s meaning the cached access token is no longer accepted.
const TOKEN_REJECTED: [i64; 3] = [40001, 40014, 42001];
/// `user/get`: no such member.
const USER_NOT_FOUND: i64 = 60111;
/// Root department; `fetch_child` walks the whole tree from here.
const ROOT_DEPARTMENT: &str = "1";

const CHUNK_PAUSE: Duration = Duration::from_millis(300);

fn default_btntxt() -> String {
    "详情".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsArticle {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picurl: Option<String>,
}

/// Message bodies accepted by the app message API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyMessage {
    Text {
        content: String,
    },
    Markdown {
        content: String,
    },
    Textcard {
        title: String,
        description: String,
        url: String,
        #[serde(default = "default_btntxt")]
        btntxt: String,
    },
    News {
        articles: Vec<NewsArticle>,
    },
    Image {
        media_id: String,
    },
    File {
        media_id: String,
    },
}

impl NotifyMessage {
    pub fn text(content: impl Into<String>) -> Self {
        NotifyMessage::Text {
            content: content.into(),
        }
    }

    pub fn msg_type(&self) -> &'static str {
        match self {
            NotifyMessage::Text { .. } => "text",
            NotifyMessage::Markdown { .. } => "markdown",
            NotifyMessage::Textcard { .. } => "textcard",
            NotifyMessage::News { .. } => "news",
            NotifyMessage::Image { .. } => "image",
            NotifyMessage::File { .. } => "file",
        }
    }

    pub fn validate(&self) -> Result<(), NotifyError> {
        let missing = |field: &str| -> Result<(), NotifyError> {
            Err(NotifyError::InvalidMessage(format!(
                "{} message needs a non-empty {}",
                self.msg_type(),
                field
            )))
        };
        match self {
            NotifyMessage::Text { content } | NotifyMessage::Markdown { content } => {
                if content.trim().is_empty() {
                    return missing("content");
                }
            }
            NotifyMessage::Textcard {
                title,
                description,
                url,
                ..
            } => {
                if title.trim().is_empty() {
                    return missing("title");
                }
                if description.trim().is_empty() {
                    return missing("description");
                }
                if url.trim().is_empty() {
                    return missing("url");
                }
            }
            NotifyMessage::News { articles } => {
                if articles.is_empty() || articles.len() > MAX_NEWS_ARTICLES {
                    return Err(NotifyError::InvalidMessage(format!(
                        "news needs 1 to {} articles, got {}",
                        MAX_NEWS_ARTICLES,
                        articles.len()
                    )));
                }
                if articles.iter().any(|a| a.title.trim().is_empty()) {
                    return missing("article title");
                }
            }
            NotifyMessage::Image { media_id } | NotifyMessage::File { media_id } => {
                if media_id.trim().is_empty() {
                    return missing("media_id");
                }
            }
        }
        Ok(())
    }

    /// `message/send` request bodies, one per chunk.
    pub fn request_bodies(&self, touser: &str, agent_id: i64) -> Vec<Value> {
        let payloads: Vec<Value> = match self {
            NotifyMessage::Text { content } | NotifyMessage::Markdown { content } => {
                split_message(content, WECOM_MSG_LIMIT)
                    .into_iter()
                    .map(|chunk| json!({ "content": chunk }))
                    .collect()
            }
            NotifyMessage::Textcard {
                title,
                description,
                url,
                btntxt,
            } => vec![json!({
                "title": title,
                "description": description,
                "url": url,
                "btntxt": btntxt,
            })],
            NotifyMessage::News { articles } => vec![json!({ "articles": articles })],
            NotifyMessage::Image { media_id } | NotifyMessage::File { media_id } => {
                vec![json!({ "media_id": media_id })]
            }
        };

        let msgtype = self.msg_type();
        payloads
            .into_iter()
            .map(|payload| {
                let mut body = json!({
                    "touser": touser,
                    "msgtype": msgtype,
                    "agentid": agent_id,
                    "safe": 0,
                });
                body[msgtype] = payload;
                body
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    errcode: i64,
    errmsg: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    errcode: i64,
    errmsg: String,
    #[serde(default)]
    invaliduser: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserListResponse {
    errcode: i64,
    errmsg: String,
    #[serde(default)]
    userlist: Vec<Member>,
}

/// Enterprise member as returned by `user/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub userid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub department: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    errcode: i64,
    errmsg: String,
    #[serde(default)]
    name: Option<String>,
}

/// Outcome of [`NotificationGateway::send`].
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub chunks: usize,
    /// Recipients the API reported as unknown.
    pub invalid_users: Vec<String>,
}

fn http_error(e: reqwest::Error) -> NotifyError {
    // Request URLs carry corpsecret / access_token in the query string.
    NotifyError::Http(e.without_url().to_string())
}

/// Sends notifications for stored configurations and resolves member names.
pub struct NotificationGateway {
    client: Client,
    api_base: String,
    config_store: Arc<dyn ConfigStore>,
    secrets: SecretCipher,
    tokens: TokenCache,
    limiter: SendRateLimiter,
    audit: Option<Arc<AuditLogger>>,
}

impl NotificationGateway {
    pub fn new(
        settings: &WeComConfig,
        config_store: Arc<dyn ConfigStore>,
        secrets: SecretCipher,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .map_err(http_error)?;
        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            config_store,
            secrets,
            tokens: TokenCache::new(),
            limiter: SendRateLimiter::per_second(settings.send_rate_per_sec),
            audit: None,
        })
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn load_sendable(&self, code: &str) -> Result<(Configuration, i64), NotifyError> {
        let config = self
            .config_store
            .get_by_code(code)
            .map_err(|e| NotifyError::Storage(e.to_string()))?
            .ok_or_else(|| NotifyError::NotFound(code.to_string()))?;
        if !config.is_complete() {
            return Err(NotifyError::IncompleteConfiguration(code.to_string()));
        }
        let agent_id = config
            .agent_id
            .ok_or_else(|| NotifyError::IncompleteConfiguration(code.to_string()))?;
        Ok((config, agent_id))
    }

    /// Send to every recipient of the configuration. Long text is split and
    /// delivered in order.
    pub async fn send(&self, code: &str, message: &NotifyMessage) -> Result<SendReceipt, NotifyError> {
        message.validate()?;
        let (config, agent_id) = self.load_sendable(code)?;

        let bodies = message.request_bodies(&config.touser(), agent_id);
        let mut receipt = SendReceipt {
            chunks: bodies.len(),
            invalid_users: Vec::new(),
        };
        for (i, body) in bodies.iter().enumerate() {
            self.limiter.acquire().await;
            let resp = self.post_message(&config, agent_id, body).await?;
            if let Some(invalid) = resp.invaliduser.filter(|s| !s.is_empty()) {
                for user in invalid.split('|') {
                    if !receipt.invalid_users.iter().any(|u| u == user) {
                        receipt.invalid_users.push(user.to_string());
                    }
                }
            }
            if i + 1 < bodies.len() {
                tokio::time::sleep(CHUNK_PAUSE).await;
            }
        }

        info!(
            config_code = %code,
            msg_type = message.msg_type(),
            chunks = receipt.chunks,
            "Notification sent"
        );
        if !receipt.invalid_users.is_empty() {
            warn!(config_code = %code, invalid = ?receipt.invalid_users, "WeCom reported unknown recipients");
        }
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_notification_sent(code, message.msg_type(), receipt.chunks) {
                warn!(error = %e, "Failed to write audit event");
            }
        }
        Ok(receipt)
    }

    /// Text notification with an optional title line.
    pub async fn send_text(
        &self,
        code: &str,
        title: Option<&str>,
        content: &str,
    ) -> Result<SendReceipt, NotifyError> {
        let text = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => format!("{}\n{}", title, content),
            None => content.to_string(),
        };
        self.send(code, &NotifyMessage::text(text)).await
    }

    async fn post_message(
        &self,
        config: &Configuration,
        agent_id: i64,
        body: &Value,
    ) -> Result<SendResponse, NotifyError> {
        let mut retried = false;
        loop {
            let token = self.access_token(config, agent_id).await?;
            let resp: SendResponse = self
                .client
                .post(format!("{}/message/send", self.api_base))
                .query(&[("access_token", token.as_str())])
                .json(body)
                .send()
                .await
                .map_err(http_error)?
                .json()
                .await
                .map_err(http_error)?;

            if resp.errcode == 0 {
                return Ok(resp);
            }
            if !retried && TOKEN_REJECTED.contains(&resp.errcode) {
                debug!(config_code = %config.code, errcode = resp.errcode, "Access token rejected, refreshing");
                self.tokens.invalidate(&config.corp_id, agent_id).await;
                retried = true;
                continue;
            }
            return Err(NotifyError::Api {
                errcode: resp.errcode,
                errmsg: resp.errmsg,
            });
        }
    }

    /// Raw `gettoken` call: `(access_token, expires_in)`.
    async fn request_token(&self, corp_id: &str, corp_secret: &str) -> Result<(String, i64), NotifyError> {
        let body: TokenResponse = self
            .client
            .get(format!("{}/gettoken", self.api_base))
            .query(&[("corpid", corp_id), ("corpsecret", corp_secret)])
            .send()
            .await
            .map_err(http_error)?
            .json()
            .await
            .map_err(http_error)?;

        if body.errcode != 0 {
            return Err(NotifyError::Api {
                errcode: body.errcode,
                errmsg: body.errmsg,
            });
        }
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| NotifyError::Http("no access_token in gettoken response".to_string()))?;
        Ok((token, body.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS)))
    }

    /// Check a corp id / corpsecret pair before it is stored and list the
    /// members it can reach.
    pub async fn validate_credentials(
        &self,
        corp_id: &str,
        corp_secret: &str,
    ) -> Result<Vec<Member>, NotifyError> {
        let (corp_id, corp_secret) = (corp_id.trim(), corp_secret.trim());
        if corp_id.is_empty() || corp_secret.is_empty() {
            return Err(NotifyError::InvalidCredentials(
                "corp id and corp secret are required".to_string(),
            ));
        }

        let (token, _) = self
            .request_token(corp_id, corp_secret)
            .await
            .map_err(|e| match e {
                NotifyError::Api { errcode, errmsg } => {
                    NotifyError::InvalidCredentials(format!("{} ({})", errmsg, errcode))
                }
                other => other,
            })?;

        let body: UserListResponse = self
            .client
            .get(format!("{}/user/list", self.api_base))
            .query(&[
                ("access_token", token.as_str()),
                ("department_id", ROOT_DEPARTMENT),
                ("fetch_child", "1"),
            ])
            .send()
            .await
            .map_err(http_error)?
            .json()
            .await
            .map_err(http_error)?;
        if body.errcode != 0 {
            return Err(NotifyError::Api {
                errcode: body.errcode,
                errmsg: body.errmsg,
            });
        }

        let mut members: Vec<Member> = Vec::with_capacity(body.userlist.len());
        for member in body.userlist {
            if !members.iter().any(|m| m.userid == member.userid) {
                members.push(member);
            }
        }
        info!(corp_id, members = members.len(), "WeCom credentials validated");
        Ok(members)
    }

    async fn access_token(&self, config: &Configuration, agent_id: i64) -> Result<String, NotifyError> {
        if let Some(token) = self.tokens.get(&config.corp_id, agent_id).await {
            return Ok(token);
        }

        let encrypted = config
            .encrypted_corp_secret
            .as_deref()
            .ok_or_else(|| NotifyError::IncompleteConfiguration(config.code.clone()))?;
        let corp_secret = self
            .secrets
            .decrypt(encrypted)
            .map_err(|e| NotifyError::Secret(e.to_string()))?;

        let (token, expires_in) = self.request_token(&config.corp_id, &corp_secret).await?;

        self.tokens
            .insert(&config.corp_id, agent_id, token.clone(), expires_in)
            .await;
        info!(config_code = %config.code, expires_in, "WeCom access_token refreshed");
        Ok(token)
    }

    /// Member display name via `user/get`; `Ok(None)` for unknown members.
    pub async fn fetch_user_name(
        &self,
        config: &Configuration,
        user_id: &str,
    ) -> Result<Option<String>, NotifyError> {
        let agent_id = config
            .agent_id
            .ok_or_else(|| NotifyError::IncompleteConfiguration(config.code.clone()))?;
        let token = self.access_token(config, agent_id).await?;

        let body: UserResponse = self
            .client
            .get(format!("{}/user/get", self.api_base))
            .query(&[("access_token", token.as_str()), ("userid", user_id)])
            .send()
            .await
            .map_err(http_error)?
            .json()
            .await
            .map_err(http_error)?;

        match body.errcode {
            0 => Ok(body.name.filter(|n| !n.is_empty())),
            USER_NOT_FOUND => Ok(None),
            errcode => Err(NotifyError::Api {
                errcode,
                errmsg: body.errmsg,
            }),
        }
    }
}

#[async_trait]
impl SenderNameResolver for NotificationGateway {
    async fn resolve(&self, config: &Configuration, user_id: &str) -> Option<String> {
        match self.fetch_user_name(config, user_id).await {
            Ok(name) => name,
            Err(e) => {
                debug!(config_code = %config.code, user_id, error = %e, "Sender name lookup failed");
                None
            }
        }
    }
}

/// Split on newlines where possible so that no chunk exceeds `max_len` characters.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }
        let byte_limit = remaining
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let split_at = remaining[..byte_limit]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(byte_limit);
        chunks.push(remaining[..split_at].to_string());
        remaining = &remaining[split_at..];
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use axum::extract::{Query, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use wecom_relay_storage::InMemoryStore;

    #[test]
    fn test_split_message_short() {
        let chunks = split_message("hello world", WECOM_MSG_LIMIT);
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn test_split_message_prefers_newlines() {
        let line = "a".repeat(100);
        let text = (0..25).map(|_| line.clone()).collect::<Vec<_>>().join("\n");
        let chunks = split_message(&text, WECOM_MSG_LIMIT);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= WECOM_MSG_LIMIT);
        }
        assert!(chunks[0].ends_with('\n'));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_message_chinese() {
        let text = "中".repeat(3000);
        let chunks = split_message(&text, WECOM_MSG_LIMIT);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), WECOM_MSG_LIMIT);
    }

    #[test]
    fn test_notify_message_json() {
        let msg: NotifyMessage = serde_json::from_str(
            r#"{"type":"textcard","title":"构建完成","description":"main #42","url":"https://ci.example.com/42"}"#,
        )
        .unwrap();
        assert_eq!(msg.msg_type(), "textcard");

        let bodies = msg.request_bodies("a|b", 1000002);
        assert_eq!(bodies.len(), 1);
        assert_eq!(
            bodies[0],
            json!({
                "touser": "a|b",
                "msgtype": "textcard",
                "agentid": 1000002,
                "safe": 0,
                "textcard": {
                    "title": "构建完成",
                    "description": "main #42",
                    "url": "https://ci.example.com/42",
                    "btntxt": "详情"
                }
            })
        );
    }

    #[test]
    fn test_news_and_media_bodies() {
        let news = NotifyMessage::News {
            articles: vec![NewsArticle {
                title: "t".into(),
                description: None,
                url: "https://example.com".into(),
                picurl: None,
            }],
        };
        let body = &news.request_bodies("u", 1)[0];
        assert_eq!(body["news"]["articles"][0], json!({"title": "t", "url": "https://example.com"}));

        let file = NotifyMessage::File {
            media_id: "MEDIA".into(),
        };
        assert_eq!(file.request_bodies("u", 1)[0]["file"], json!({"media_id": "MEDIA"}));
    }

    #[test]
    fn test_validate() {
        assert!(NotifyMessage::text("hi").validate().is_ok());
        assert!(NotifyMessage::text("  ").validate().is_err());
        assert!(NotifyMessage::News { articles: vec![] }.validate().is_err());
        assert!(NotifyMessage::Image {
            media_id: String::new()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_token_response_deserialize() {
        let json = r#"{"errcode":0,"errmsg":"ok","access_token":"test_token","expires_in":7200}"#;
        let resp: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.errcode, 0);
        assert_eq!(resp.access_token.as_deref(), Some("test_token"));

        let resp: SendResponse =
            serde_json::from_str(r#"{"errcode":40014,"errmsg":"invalid access_token"}"#).unwrap();
        assert_eq!(resp.errcode, 40014);
        assert!(resp.invaliduser.is_none());
    }

    // ── local stand-in for qyapi.weixin.qq.com ────────────────────────────

    #[derive(Default)]
    struct MockApi {
        token_calls: AtomicUsize,
        reject_next_send: AtomicBool,
        sent: Mutex<Vec<Value>>,
    }

    async fn mock_gettoken(
        State(api): State<Arc<MockApi>>,
        Query(q): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        let n = api.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if q.get("corpsecret").map(String::as_str) != Some("s3cret") {
            return Json(json!({"errcode": 40001, "errmsg": "invalid credential"}));
        }
        Json(json!({"errcode": 0, "errmsg": "ok", "access_token": format!("tok-{}", n), "expires_in": 7200}))
    }

    async fn mock_send(State(api): State<Arc<MockApi>>, Json(body): Json<Value>) -> Json<Value> {
        if api.reject_next_send.swap(false, Ordering::SeqCst) {
            return Json(json!({"errcode": 42001, "errmsg": "access_token expired"}));
        }
        api.sent.lock().unwrap().push(body);
        Json(json!({"errcode": 0, "errmsg": "ok", "invaliduser": ""}))
    }

    async fn mock_user(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
        match q.get("userid").map(String::as_str) {
            Some("zhangsan") => Json(json!({"errcode": 0, "errmsg": "ok", "name": "张三"})),
            _ => Json(json!({"errcode": 60111, "errmsg": "userid not found"})),
        }
    }

    async fn mock_user_list(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
        if !q.get("access_token").is_some_and(|t| t.starts_with("tok-")) {
            return Json(json!({"errcode": 40014, "errmsg": "invalid access_token"}));
        }
        assert_eq!(q.get("department_id").map(String::as_str), Some("1"));
        Json(json!({
            "errcode": 0,
            "errmsg": "ok",
            "userlist": [
                {"userid": "zhangsan", "name": "张三", "department": [1, 2]},
                {"userid": "lisi", "name": "李四", "department": [2]},
                {"userid": "zhangsan", "name": "张三", "department": [3]}
            ]
        }))
    }

    async fn spawn_mock() -> (String, Arc<MockApi>) {
        let api = Arc::new(MockApi::default());
        let app = Router::new()
            .route("/gettoken", get(mock_gettoken))
            .route("/message/send", post(mock_send))
            .route("/user/get", get(mock_user))
            .route("/user/list", get(mock_user_list))
            .with_state(api.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), api)
    }

    fn gateway_for(base: &str, complete: bool) -> (NotificationGateway, String) {
        let secrets = SecretCipher::new("unit-test-password").unwrap();
        let mut config = Configuration::new_callback("ww1", "token", "unused");
        if complete {
            config.encrypted_corp_secret = Some(secrets.encrypt("s3cret").unwrap());
            config.agent_id = Some(1000002);
            config.recipients = vec!["zhangsan".into(), "lisi".into()];
        }
        let store = Arc::new(InMemoryStore::new());
        store.save(&config).unwrap();

        let settings = WeComConfig {
            api_base: base.to_string(),
            ..Default::default()
        };
        let gateway = NotificationGateway::new(&settings, store, secrets).unwrap();
        (gateway, config.code)
    }

    #[tokio::test]
    async fn test_send_text_reuses_cached_token() {
        let (base, api) = spawn_mock().await;
        let (gateway, code) = gateway_for(&base, true);

        let receipt = gateway.send_text(&code, Some("告警"), "disk full").await.unwrap();
        assert_eq!(receipt.chunks, 1);
        gateway.send(&code, &NotifyMessage::text("again")).await.unwrap();

        assert_eq!(api.token_calls.load(Ordering::SeqCst), 1);
        let sent = api.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["touser"], "zhangsan|lisi");
        assert_eq!(sent[0]["agentid"], 1000002);
        assert_eq!(sent[0]["text"]["content"], "告警\ndisk full");
    }

    #[tokio::test]
    async fn test_rejected_token_is_refreshed_once() {
        let (base, api) = spawn_mock().await;
        let (gateway, code) = gateway_for(&base, true);

        gateway.send(&code, &NotifyMessage::text("warm up")).await.unwrap();
        api.reject_next_send.store(true, Ordering::SeqCst);
        gateway.send(&code, &NotifyMessage::text("after expiry")).await.unwrap();

        assert_eq!(api.token_calls.load(Ordering::SeqCst), 2);
        assert_eq!(api.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_callback_only_configuration_cannot_send() {
        let (base, api) = spawn_mock().await;
        let (gateway, code) = gateway_for(&base, false);

        let err = gateway.send(&code, &NotifyMessage::text("hi")).await.unwrap_err();
        assert!(matches!(err, NotifyError::IncompleteConfiguration(_)));
        assert_eq!(api.token_calls.load(Ordering::SeqCst), 0);

        let err = gateway.send("missing", &NotifyMessage::text("hi")).await.unwrap_err();
        assert!(matches!(err, NotifyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_long_text_goes_out_in_chunks() {
        let (base, api) = spawn_mock().await;
        let (gateway, code) = gateway_for(&base, true);

        let receipt = gateway
            .send(&code, &NotifyMessage::text("中".repeat(3000)))
            .await
            .unwrap();
        assert_eq!(receipt.chunks, 2);
        assert_eq!(api.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sender_name_resolution() {
        let (base, _api) = spawn_mock().await;
        let (gateway, code) = gateway_for(&base, true);
        let store_config = {
            let (config, _) = gateway.load_sendable(&code).unwrap();
            config
        };

        assert_eq!(
            gateway.resolve(&store_config, "zhangsan").await.as_deref(),
            Some("张三")
        );
        assert_eq!(gateway.resolve(&store_config, "ghost").await, None);
    }

    #[tokio::test]
    async fn test_validate_credentials_lists_members() {
        let (base, api) = spawn_mock().await;
        let (gateway, _) = gateway_for(&base, false);

        let members = gateway.validate_credentials("ww1", " s3cret ").await.unwrap();
        let ids: Vec<&str> = members.iter().map(|m| m.userid.as_str()).collect();
        assert_eq!(ids, vec!["zhangsan", "lisi"]);
        assert_eq!(members[0].name, "张三");
        assert_eq!(api.token_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validate_credentials_rejects_bad_secret() {
        let (base, api) = spawn_mock().await;
        let (gateway, _) = gateway_for(&base, false);

        let err = gateway.validate_credentials("ww1", "wrong").await.unwrap_err();
        assert!(matches!(err, NotifyError::InvalidCredentials(_)));
        assert_eq!(err.status_code(), 400);

        let err = gateway.validate_credentials("ww1", "  ").await.unwrap_err();
        assert!(matches!(err, NotifyError::InvalidCredentials(_)));
        assert_eq!(api.token_calls.load(Ordering::SeqCst), 1);
    }
}
