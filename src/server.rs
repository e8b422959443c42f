//!
//! usermeta HTTP server
//! --------------------
//! Axum front end for the RPC procedures and the local session endpoints.
//!
//! Responsibilities:
//! - `GET|POST /api/rpc/{path}`: decode the wire input, dispatch, encode the result or error envelope.
//! - `OPTIONS /api/rpc/{path}`: CORS preflight; CORS headers are also set on every RPC response.
//! - `/auth/signin`, `/auth/session/refresh`, `/auth/signout`: cookie session lifecycle.
//! - Demo account seeding and a background sweeper for expired sessions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ErrorShape, RpcError};
use crate::identity::{self, clear_cookie, set_cookie, Cookies, LocalSessionProvider, RequestMeta, SessionTokens, SignInError, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::rpc::{self, ProcedureKind, ProcedureRouter, RpcCall, RpcServices, TimingOptions};
use crate::store::{IdentityStore, MemoryIdentityStore, MemoryMetadataStore, MetadataStore};
use crate::wire::{self, Envelope};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<RpcServices>,
    pub procedures: Arc<ProcedureRouter>,
    pub sessions: Arc<LocalSessionProvider>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the local session provider in as the verifier and mount the application procedures.
    pub fn new(config: ServerConfig, identity: Arc<dyn IdentityStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        let sessions = Arc::new(LocalSessionProvider::new(config.access_ttl, config.refresh_ttl));
        let services = Arc::new(RpcServices {
            verifier: sessions.clone(),
            identity,
            metadata,
            timing: TimingOptions { artificial_delay: config.timing_enabled() },
        });
        AppState { services, procedures: Arc::new(rpc::app_router()), sessions, config: Arc::new(config) }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "usermeta ok" }))
        .route("/api/rpc/{path}", get(rpc_query).post(rpc_mutation).options(rpc_preflight))
        .route("/auth/signin", post(signin))
        .route("/auth/session/refresh", post(refresh_session))
        .route("/auth/signout", post(signout))
        .with_state(state)
}

/// Periodically drop sessions whose refresh token has expired. Returns `None` when disabled.
pub fn spawn_session_sweeper(sessions: Arc<LocalSessionProvider>, interval_secs: u64) -> Option<tokio::task::JoinHandle<()>> {
    if interval_secs == 0 {
        info!(target: "startup", "session sweeper disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(interval_secs)).await;
            let removed = sessions.sweep_expired();
            if removed > 0 { debug!(target: "auth", removed = removed, "session_sweep"); }
        }
    }))
}

/// Start the usermeta HTTP server with in-memory stores.
pub async fn run_with_config(config: ServerConfig) -> anyhow::Result<()> {
    info!(
        target: "startup",
        "usermeta starting: http_port={}, env={}, allowed_origin='{}', secure_cookies={}, artificial_delay={}",
        config.http_port, config.environment.as_str(), config.allowed_origin, config.cookie_secure, config.timing_enabled()
    );

    let identity = Arc::new(MemoryIdentityStore::new());
    if let Some((email, password)) = config.demo_account() {
        let user = identity
            .ensure_user(email, password)
            .with_context(|| format!("While creating demo account {}", email))?;
        info!(target: "startup", user_id = %user.id, "demo account ready: {}", email);
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let sweep_secs = config.sweep_interval_secs;
    let state = AppState::new(config, identity, Arc::new(MemoryMetadataStore::new()));
    let _sweeper = spawn_session_sweeper(state.sessions.clone(), sweep_secs);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("While binding {}", addr))?;
    info!("Starting server on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(target: "startup", "shutdown requested");
        })
        .await?;
    Ok(())
}

/// Environment-only entry point.
pub async fn run() -> anyhow::Result<()> {
    run_with_config(ServerConfig::from_env()).await
}

// ---- RPC ----

#[derive(Serialize)]
struct SuccessBody {
    result: ResultData,
}

#[derive(Serialize)]
struct ResultData {
    data: Envelope,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorShape,
}

fn cors_headers(config: &ServerConfig) -> HeaderMap {
    let mut h = HeaderMap::new();
    match HeaderValue::from_str(&config.allowed_origin) {
        Ok(v) => { h.insert("Access-Control-Allow-Origin", v); }
        Err(_) => warn!(target: "rpc", "allowed origin '{}' is not a valid header value", config.allowed_origin),
    }
    h.insert("Access-Control-Allow-Methods", HeaderValue::from_static("OPTIONS, GET, POST"));
    h.insert("Access-Control-Allow-Credentials", HeaderValue::from_static("true"));
    h.insert("Access-Control-Expose-Headers", HeaderValue::from_static("Content-Length, Content-Type"));
    h.insert("Access-Control-Allow-Headers", HeaderValue::from_static("Content-Type, Authorization"));
    h
}

fn rpc_headers(config: &ServerConfig, request_id: &str) -> HeaderMap {
    let mut h = cors_headers(config);
    if let Ok(v) = HeaderValue::from_str(request_id) { h.insert(REQUEST_ID_HEADER, v); }
    h
}

fn parse_input(raw: Option<&str>) -> Result<Value, RpcError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Value::Null),
        Some(text) => wire::decode_str(text).map_err(|e| RpcError::bad_request(format!("Invalid input: {}", e))),
    }
}

fn error_response(config: &ServerConfig, request_id: &str, path: &str, err: &RpcError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, rpc_headers(config, request_id), Json(ErrorBody { error: err.to_shape(Some(path)) })).into_response()
}

async fn handle_rpc(state: &AppState, path: String, kind: ProcedureKind, headers: &HeaderMap, raw: Option<&str>) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let input = match parse_input(raw) {
        Ok(v) => v,
        Err(e) => {
            rpc::report_error(&path, &Value::Null, &e);
            return error_response(&state.config, &request_id, &path, &e);
        }
    };
    let meta = RequestMeta { request_id: request_id.clone(), path: path.clone(), cookies: Cookies::from_headers(headers) };
    let call = RpcCall { meta, kind, input: input.clone() };
    match rpc::dispatch(&state.services, &state.procedures, call).await {
        Ok(value) => {
            let body = SuccessBody { result: ResultData { data: wire::encode(value) } };
            (StatusCode::OK, rpc_headers(&state.config, &request_id), Json(body)).into_response()
        }
        Err(e) => {
            rpc::report_error(&path, &input, &e);
            error_response(&state.config, &request_id, &path, &e)
        }
    }
}

async fn rpc_query(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    handle_rpc(&state, path, ProcedureKind::Query, &headers, params.get("input").map(|s| s.as_str())).await
}

async fn rpc_mutation(State(state): State<AppState>, Path(path): Path<String>, headers: HeaderMap, body: Bytes) -> Response {
    let text = String::from_utf8_lossy(&body);
    handle_rpc(&state, path, ProcedureKind::Mutation, &headers, Some(text.as_ref())).await
}

async fn rpc_preflight(State(state): State<AppState>) -> Response {
    (StatusCode::NO_CONTENT, cors_headers(&state.config)).into_response()
}

// ---- Session endpoints ----

#[derive(Debug, Deserialize)]
pub struct SignInPayload {
    pub email: String,
    pub password: String,
}

fn append_cookie(h: &mut HeaderMap, cookie: String) {
    match HeaderValue::from_str(&cookie) {
        Ok(v) => { h.append("Set-Cookie", v); }
        Err(e) => error!(target: "auth", "unencodable cookie header: {}", e),
    }
}

fn session_cookies(config: &ServerConfig, tokens: &SessionTokens) -> HeaderMap {
    // The access cookie outlives its token so an expired token reaches the server and yields NEEDS_REFRESH.
    let mut h = HeaderMap::new();
    append_cookie(&mut h, set_cookie(ACCESS_COOKIE, &tokens.access_token, config.refresh_ttl, config.cookie_secure));
    append_cookie(&mut h, set_cookie(REFRESH_COOKIE, &tokens.refresh_token, config.refresh_ttl, config.cookie_secure));
    h
}

fn cleared_cookies(config: &ServerConfig) -> HeaderMap {
    let mut h = HeaderMap::new();
    append_cookie(&mut h, clear_cookie(ACCESS_COOKIE, config.cookie_secure));
    append_cookie(&mut h, clear_cookie(REFRESH_COOKIE, config.cookie_secure));
    h
}

async fn signin(State(state): State<AppState>, Json(payload): Json<SignInPayload>) -> impl IntoResponse {
    match identity::sign_in(state.services.identity.as_ref(), &state.sessions, &payload.email, &payload.password).await {
        Ok(signed) => {
            info!(target: "auth", user_id = %signed.user_id, "signed in");
            let headers = session_cookies(&state.config, &signed.tokens);
            (StatusCode::OK, headers, Json(serde_json::json!({"status": "OK", "user": {"id": signed.user_id}})))
        }
        Err(SignInError::WrongCredentials) => {
            (StatusCode::UNAUTHORIZED, HeaderMap::new(), Json(serde_json::json!({"status": "WRONG_CREDENTIALS_ERROR"})))
        }
        Err(e) => {
            error!(target: "auth", "sign-in error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new(), Json(serde_json::json!({"status": "error", "error": e.to_string()})))
        }
    }
}

async fn refresh_session(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let cookies = Cookies::from_headers(&headers);
    let Some(refresh_token) = cookies.refresh_token() else {
        debug!(target: "auth", "refresh without refresh cookie");
        return (StatusCode::UNAUTHORIZED, cleared_cookies(&state.config), Json(serde_json::json!({"status": "UNAUTHORISED"})));
    };
    match state.sessions.refresh(refresh_token) {
        Ok(tokens) => {
            debug!(target: "auth", user_id = %tokens.subject_id, "session refreshed");
            (StatusCode::OK, session_cookies(&state.config, &tokens), Json(serde_json::json!({"status": "OK"})))
        }
        Err(e) => {
            debug!(target: "auth", "refresh rejected: {}", e);
            (StatusCode::UNAUTHORIZED, cleared_cookies(&state.config), Json(serde_json::json!({"status": "UNAUTHORISED"})))
        }
    }
}

async fn signout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let cookies = Cookies::from_headers(&headers);
    let revoked = state.sessions.revoke(&cookies);
    debug!(target: "auth", revoked = revoked, "signed out");
    (StatusCode::OK, cleared_cookies(&state.config), Json(serde_json::json!({"status": "OK"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn empty_input_is_null_and_garbage_is_bad_request() {
        assert_eq!(parse_input(None).unwrap(), Value::Null);
        assert_eq!(parse_input(Some("  ")).unwrap(), Value::Null);
        assert_eq!(parse_input(Some(r#"{"json":{"a":1}}"#)).unwrap(), json!({"a": 1}));
        let err = parse_input(Some("{not json")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
    }

    #[test]
    fn cors_headers_follow_config() {
        let cfg = ServerConfig { allowed_origin: "https://app.example.com".into(), ..Default::default() };
        let h = cors_headers(&cfg);
        assert_eq!(h.get("Access-Control-Allow-Origin").unwrap(), "https://app.example.com");
        assert_eq!(h.get("Access-Control-Allow-Methods").unwrap(), "OPTIONS, GET, POST");
        assert_eq!(h.get("Access-Control-Allow-Credentials").unwrap(), "true");
    }

    #[test]
    fn session_cookies_are_set_together() {
        let cfg = ServerConfig { cookie_secure: true, ..Default::default() };
        let tokens = SessionTokens {
            session_handle: "h".into(),
            subject_id: "u1".into(),
            access_token: "at".into(),
            refresh_token: "rt".into(),
        };
        let h = session_cookies(&cfg, &tokens);
        let all: Vec<&str> = h.get_all("Set-Cookie").iter().filter_map(|v| v.to_str().ok()).collect();
        assert_eq!(all.len(), 2);
        assert!(all[0].starts_with("access_token=at;"));
        assert!(all[1].starts_with("refresh_token=rt;"));
        assert!(all.iter().all(|c| c.contains("HttpOnly") && c.ends_with("Secure")));
    }
}
