use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path as AxumPath, Query, RawQuery, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use wecom_relay_channels::{CallbackController, NotificationGateway, NotifyMessage};
use wecom_relay_core::Config;
use wecom_relay_storage::{AuditLogger, MessageQuery, MessageStore};

use super::Context;

const FAILED: &str = "failed";
const OK: &str = "ok";

#[derive(Clone)]
pub struct GatewayState {
    controller: Arc<CallbackController>,
    messages: Arc<dyn MessageStore>,
    notifier: Arc<NotificationGateway>,
    api_token: Option<String>,
    started: Instant,
}

fn secure_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Percent-decodes query pairs. `+` is kept literally: base64 echostr and
/// signatures contain it.
fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some(raw) = raw else {
        return out;
    };
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        match (urlencoding::decode(k), urlencoding::decode(v)) {
            (Ok(k), Ok(v)) => {
                out.insert(k.into_owned(), v.into_owned());
            }
            _ => debug!(key = %k, "Skipping undecodable query parameter"),
        }
    }
    out
}

/// Signature parameters shared by both callback flows.
struct CallbackParams {
    msg_signature: String,
    timestamp: String,
    nonce: String,
}

impl CallbackParams {
    fn from_query(query: &HashMap<String, String>) -> Option<Self> {
        let get = |k: &str| query.get(k).filter(|v| !v.is_empty()).cloned();
        Some(Self {
            msg_signature: get("msg_signature").or_else(|| get("signature"))?,
            timestamp: get("timestamp")?,
            nonce: get("nonce")?,
        })
    }
}

fn failed(status: u16) -> Response {
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
        FAILED,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Bearer token authentication middleware
// ---------------------------------------------------------------------------

async fn auth_middleware(
    State(state): State<GatewayState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let token = match &state.api_token {
        Some(t) if !t.is_empty() => t,
        _ => return next.run(req).await,
    };

    if req.uri().path() == "/v1/health" {
        return next.run(req).await;
    }

    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|provided| secure_eq(provided, token))
        .unwrap_or(false);

    if authorized {
        next.run(req).await
    } else {
        (StatusCode::UNAUTHORIZED, "Unauthorized: invalid or missing Bearer token").into_response()
    }
}

// ---------------------------------------------------------------------------
// Callback endpoints (public, authenticated by msg_signature)
// ---------------------------------------------------------------------------

/// GET /callback/:code: URL verification handshake.
async fn handle_callback_verify(
    State(state): State<GatewayState>,
    AxumPath(code): AxumPath<String>,
    RawQuery(raw): RawQuery,
) -> Response {
    let query = parse_query(raw.as_deref());
    let (Some(params), Some(echostr)) = (
        CallbackParams::from_query(&query),
        query.get("echostr").filter(|v| !v.is_empty()),
    ) else {
        warn!(config_code = %code, "Verification request is missing parameters");
        return failed(400);
    };

    match state.controller.handle_verification(
        &code,
        &params.msg_signature,
        &params.timestamp,
        &params.nonce,
        echostr,
    ) {
        Ok(echo) => (StatusCode::OK, echo).into_response(),
        Err(e) => failed(e.status_code()),
    }
}

/// POST /callback/:code: encrypted message delivery.
async fn handle_callback_message(
    State(state): State<GatewayState>,
    AxumPath(code): AxumPath<String>,
    RawQuery(raw): RawQuery,
    body: Bytes,
) -> Response {
    let query = parse_query(raw.as_deref());
    let Some(params) = CallbackParams::from_query(&query) else {
        warn!(config_code = %code, "Callback request is missing parameters");
        return failed(400);
    };
    let Ok(body) = std::str::from_utf8(&body) else {
        warn!(config_code = %code, "Callback body is not UTF-8");
        return failed(400);
    };

    match state
        .controller
        .handle_message(&code, body, &params.msg_signature, &params.timestamp, &params.nonce)
        .await
    {
        Ok(_) => (StatusCode::OK, OK).into_response(),
        Err(e) => failed(e.status_code()),
    }
}

// ---------------------------------------------------------------------------
// Message API
// ---------------------------------------------------------------------------

fn storage_error(e: impl std::fmt::Display) -> Response {
    warn!(error = %e, "Message store request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    )
        .into_response()
}

/// GET /api/messages/:code
async fn handle_messages_list(
    State(state): State<GatewayState>,
    AxumPath(code): AxumPath<String>,
    Query(mut query): Query<MessageQuery>,
) -> Response {
    query.config_code = Some(code);
    match state.messages.query(&query) {
        Ok(page) => Json(serde_json::json!({ "success": true, "data": page })).into_response(),
        Err(e) => storage_error(e),
    }
}

/// GET /api/messages/:code/stats
async fn handle_messages_stats(
    State(state): State<GatewayState>,
    AxumPath(code): AxumPath<String>,
) -> Response {
    match state.messages.stats(&code) {
        Ok(stats) => Json(serde_json::json!({ "success": true, "data": stats })).into_response(),
        Err(e) => storage_error(e),
    }
}

/// PATCH /api/messages/:code/:message_id/read (POST accepted too)
async fn handle_message_read(
    State(state): State<GatewayState>,
    AxumPath((code, message_id)): AxumPath<(String, String)>,
) -> Response {
    let owned = match state.messages.get(&message_id) {
        Ok(Some(m)) => m.config_code == code,
        Ok(None) => false,
        Err(e) => return storage_error(e),
    };
    if !owned {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "success": false, "error": "message not found" })),
        )
            .into_response();
    }
    match state.messages.mark_read(&message_id) {
        Ok(updated) => Json(serde_json::json!({ "success": updated })).into_response(),
        Err(e) => storage_error(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchReadRequest {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// PATCH /api/messages/:code/batch/read
async fn handle_messages_batch_read(
    State(state): State<GatewayState>,
    AxumPath(code): AxumPath<String>,
    Json(req): Json<BatchReadRequest>,
) -> Response {
    let ids: Vec<String> = req
        .message_ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "success": false, "error": "messageIds must be a non-empty list" })),
        )
            .into_response();
    }
    match state.messages.mark_read_many(&code, &ids) {
        Ok(updated) => Json(serde_json::json!({
            "success": true,
            "data": { "updated": updated, "requested": ids.len() },
        }))
        .into_response(),
        Err(e) => storage_error(e),
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ValidateRequest {
    #[serde(default)]
    corpid: String,
    #[serde(default)]
    corpsecret: String,
}

/// POST /api/validate: check a corp id / corpsecret pair and list members.
async fn handle_validate(
    State(state): State<GatewayState>,
    Json(req): Json<ValidateRequest>,
) -> Response {
    match state
        .notifier
        .validate_credentials(&req.corpid, &req.corpsecret)
        .await
    {
        Ok(users) => Json(serde_json::json!({ "success": true, "data": { "users": users } })).into_response(),
        Err(e) => notify_error(e),
    }
}

fn notify_error(e: wecom_relay_channels::NotifyError) -> Response {
    (
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Either a fully typed message or the plain `{title, content}` shorthand.
#[derive(Deserialize)]
#[serde(untagged)]
enum NotifyRequest {
    Typed(NotifyMessage),
    Text {
        #[serde(default)]
        title: Option<String>,
        content: String,
    },
}

/// POST /api/notify/:code
async fn handle_notify(
    State(state): State<GatewayState>,
    AxumPath(code): AxumPath<String>,
    Json(req): Json<NotifyRequest>,
) -> Response {
    let result = match &req {
        NotifyRequest::Typed(message) => state.notifier.send(&code, message).await,
        NotifyRequest::Text { title, content } => {
            state
                .notifier
                .send_text(&code, title.as_deref(), content)
                .await
        }
    };

    match result {
        Ok(receipt) => Json(serde_json::json!({ "success": true, "data": receipt })).into_response(),
        Err(e) => {
            warn!(config_code = %code, error = %e, "Notification failed");
            notify_error(e)
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    uptime_secs: u64,
    version: String,
}

async fn handle_health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

fn build_api_cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .gateway
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
        .collect();
    if origins.is_empty() {
        return CorsLayer::permissive().allow_credentials(false);
    }
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

pub fn build_router(state: GatewayState, config: &Config) -> Router {
    Router::new()
        .route("/v1/health", get(handle_health))
        .route("/api/messages/:code", get(handle_messages_list))
        .route("/api/messages/:code/stats", get(handle_messages_stats))
        .route("/api/messages/:code/batch/read", patch(handle_messages_batch_read))
        .route(
            "/api/messages/:code/:message_id/read",
            patch(handle_message_read).post(handle_message_read),
        )
        .route("/api/notify/:code", post(handle_notify))
        .route("/api/validate", post(handle_validate))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(build_api_cors_layer(config))
        // Callback endpoints are public and must stay outside the auth middleware
        .route(
            "/callback/:code",
            get(handle_callback_verify).post(handle_callback_message),
        )
        .route(
            "/api/callback/:code",
            get(handle_callback_verify).post(handle_callback_message),
        )
        .layer(DefaultBodyLimit::max(config.gateway.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let ctx = Context::load()?;
    // No encryption key means no callback can be opened; refuse to start.
    let secrets = ctx.secrets()?;
    let tz = ctx.config.display_timezone()?;
    ctx.paths.ensure_dirs()?;

    let audit = Arc::new(AuditLogger::new(ctx.paths.clone()));
    let notifier = Arc::new(
        NotificationGateway::new(&ctx.config.wecom, ctx.store.clone(), secrets.clone())?
            .with_audit(audit.clone()),
    );

    let mut controller = CallbackController::new(ctx.store.clone(), ctx.store.clone(), secrets)
        .with_timezone(tz)
        .with_audit(audit);
    if ctx.config.wecom.resolve_sender_names {
        info!("Sender names will be resolved through user/get");
        controller = controller.with_resolver(notifier.clone());
    }

    let state = GatewayState {
        controller: Arc::new(controller),
        messages: ctx.store.clone(),
        notifier,
        api_token: ctx.config.gateway.api_token.clone(),
        started: Instant::now(),
    };
    let app = build_router(state, &ctx.config);

    let host = host.unwrap_or_else(|| ctx.config.gateway.host.clone());
    let port = port.unwrap_or(ctx.config.gateway.port);
    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    println!("wecom-relay gateway listening on http://{}", bind_addr);
    println!("  Callback URL: http://{}/callback/<code>", bind_addr);
    println!("  Message API:  http://{}/api/messages/<code>", bind_addr);
    if ctx.config.gateway.api_token.is_none() {
        println!("  ⚠ No gateway.apiToken set: the message and notify API is unauthenticated");
    }
    info!(addr = %bind_addr, "Gateway started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}
