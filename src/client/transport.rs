use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::ClientError;
use crate::error::{AuthErrorCode, ErrorShape, RpcError};
use crate::identity::{ACCESS_COOKIE, REFRESH_COOKIE};
use crate::rpc::ProcedureKind;
use crate::wire::{self, Envelope};

/// Where the client sends the user when the session cannot be refreshed.
pub const REFRESH_FAILED_LOCATION: &str = "/?refreshFailed=true";

/// Attempts to renew the session; `true` when new tokens are in place.
pub trait SessionRefresher: Send + Sync {
    fn attempt_refresh(&self) -> BoxFuture<'_, bool>;
}

/// Navigation side effect on a failed refresh.
pub trait LoginRedirect: Send + Sync {
    fn redirect(&self, location: &str);
}

/// Default redirect: remembers the last location and logs it.
#[derive(Default)]
pub struct RecordingRedirect {
    last: Mutex<Option<String>>,
}

impl RecordingRedirect {
    pub fn new() -> Self { Self::default() }

    pub fn last(&self) -> Option<String> { self.last.lock().clone() }
}

impl LoginRedirect for RecordingRedirect {
    fn redirect(&self, location: &str) {
        warn!(target: "client", "redirecting to {}", location);
        *self.last.lock() = Some(location.to_string());
    }
}

/// Posts to `/auth/session/refresh` through the client's cookie jar.
/// `RpcClient` decides when to call it; concurrent calls on one client share one refresh.
pub struct HttpSessionRefresher {
    http: reqwest::Client,
    url: Url,
}

impl HttpSessionRefresher {
    pub fn new(http: reqwest::Client, base_url: &Url) -> Result<Self, ClientError> {
        let url = base_url.join("auth/session/refresh").map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        Ok(HttpSessionRefresher { http, url })
    }
}

impl SessionRefresher for HttpSessionRefresher {
    fn attempt_refresh(&self) -> BoxFuture<'_, bool> {
        async move {
            match self.http.post(self.url.clone()).send().await {
                Ok(resp) => {
                    let ok = resp.status().is_success();
                    debug!(target: "client", status = resp.status().as_u16(), "session refresh attempted");
                    ok
                }
                Err(e) => {
                    error!(target: "client", "session refresh request failed: {}", e);
                    false
                }
            }
        }
        .boxed()
    }
}

/// Status and body of one HTTP exchange, before interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Deserialize)]
struct ErrorOnlyBody {
    error: Option<ErrorShape>,
}

#[derive(Deserialize)]
struct ResponseBody {
    #[serde(default)]
    result: Option<ResultBody>,
    #[serde(default)]
    error: Option<ErrorShape>,
}

#[derive(Deserialize)]
struct ResultBody {
    data: Envelope,
}

impl RawResponse {
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    /// Auth cause tag of a failed response, if it carries one.
    pub fn auth_cause(&self) -> Option<AuthErrorCode> {
        if self.is_success() {
            return None;
        }
        let parsed: ErrorOnlyBody = serde_json::from_str(&self.body).ok()?;
        parsed.error.and_then(|e| e.data.cause).map(|c| c.kind)
    }

    pub fn needs_refresh(&self) -> bool { self.auth_cause() == Some(AuthErrorCode::NeedsRefresh) }

    /// Interpret the body as an RPC result or error envelope.
    pub fn into_value(self) -> Result<Value, ClientError> {
        let Ok(body) = serde_json::from_str::<ResponseBody>(&self.body) else {
            return Err(ClientError::Http { status: self.status, body: self.body });
        };
        match (body.result, body.error) {
            (_, Some(shape)) => Err(ClientError::Rpc(RpcError::from_shape(shape))),
            (Some(result), None) if self.is_success() => Ok(wire::decode(result.data)?),
            _ => Err(ClientError::Http { status: self.status, body: self.body }),
        }
    }
}

#[derive(Debug, Clone)]
struct RpcRequest {
    kind: ProcedureKind,
    url: Url,
    body: Option<String>,
}

pub struct RpcClient {
    http: reqwest::Client,
    jar: Arc<Jar>,
    base: Url,
    refresher: Arc<dyn SessionRefresher>,
    redirect: Arc<dyn LoginRedirect>,
    // Held while deciding on and running a refresh.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl RpcClient {
    /// Client with its own cookie jar, the HTTP refresher and a recording redirect.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let mut base = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if !base.path().ends_with('/') {
            let p = format!("{}/", base.path());
            base.set_path(&p);
        }
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder().cookie_provider(jar.clone()).build()?;
        let refresher = Arc::new(HttpSessionRefresher::new(http.clone(), &base)?);
        Ok(RpcClient {
            http,
            jar,
            base,
            refresher,
            redirect: Arc::new(RecordingRedirect::new()),
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn SessionRefresher>) -> Self {
        self.refresher = refresher;
        self
    }

    pub fn with_redirect(mut self, redirect: Arc<dyn LoginRedirect>) -> Self {
        self.redirect = redirect;
        self
    }

    /// The underlying HTTP client; shares this client's cookie jar.
    pub fn http(&self) -> &reqwest::Client { &self.http }

    pub fn base_url(&self) -> &Url { &self.base }

    fn endpoint(&self, rel: &str) -> Result<Url, ClientError> {
        self.base.join(rel).map_err(|e| ClientError::InvalidUrl(e.to_string()))
    }

    /// Non-empty value of a cookie the jar would send to the base URL.
    fn cookie(&self, name: &str) -> Option<String> {
        let header = self.jar.cookies(&self.base)?;
        let text = header.to_str().ok()?;
        text.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name && !v.is_empty()).then(|| v.to_string())
        })
    }

    /// True when the jar holds a session cookie for the base URL.
    pub fn session_exists(&self) -> bool {
        self.cookie(ACCESS_COOKIE).is_some() || self.cookie(REFRESH_COOKIE).is_some()
    }

    async fn send_once(&self, req: &RpcRequest) -> Result<RawResponse, ClientError> {
        let builder = match req.kind {
            ProcedureKind::Query => self.http.get(req.url.clone()),
            ProcedureKind::Mutation => self
                .http
                .post(req.url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(req.body.clone().unwrap_or_default()),
        };
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(RawResponse { status, body })
    }

    /// One attempt, plus one refresh-and-retry when the server asks for a refresh.
    /// When another call rotated the tokens after this one was sent, the retry goes out
    /// with the new tokens and no second refresh is posted.
    async fn send_with_refresh(&self, req: &RpcRequest) -> Result<RawResponse, ClientError> {
        let sent_with = self.cookie(REFRESH_COOKIE);
        let first = self.send_once(req).await?;
        if !first.needs_refresh() {
            return Ok(first);
        }
        debug!(target: "client", url = %req.url, "session needs refresh");
        let refreshed = {
            let _gate = self.refresh_gate.lock().await;
            let current = self.cookie(REFRESH_COOKIE);
            if current.is_some() && current != sent_with {
                debug!(target: "client", url = %req.url, "session already refreshed by a concurrent call");
                true
            } else {
                self.refresher.attempt_refresh().await
            }
        };
        if refreshed {
            return self.send_once(req).await;
        }
        self.redirect.redirect(REFRESH_FAILED_LOCATION);
        Err(ClientError::RefreshFailed)
    }

    fn rpc_url(&self, path: &str) -> Result<Url, ClientError> { self.endpoint(&format!("api/rpc/{}", path)) }

    /// Run a read procedure. `input` travels as the `input` query parameter.
    pub async fn query(&self, path: &str, input: Option<Value>) -> Result<Value, ClientError> {
        let mut url = self.rpc_url(path)?;
        if let Some(v) = input {
            let text = serde_json::to_string(&wire::encode(v))?;
            url.query_pairs_mut().append_pair("input", &text);
        }
        let req = RpcRequest { kind: ProcedureKind::Query, url, body: None };
        self.send_with_refresh(&req).await?.into_value()
    }

    /// Run a write procedure with `input` as the request body.
    pub async fn mutate(&self, path: &str, input: Value) -> Result<Value, ClientError> {
        let url = self.rpc_url(path)?;
        let body = serde_json::to_string(&wire::encode(input))?;
        let req = RpcRequest { kind: ProcedureKind::Mutation, url, body: Some(body) };
        self.send_with_refresh(&req).await?.into_value()
    }

    /// Exchange credentials for session cookies. Query caches are not touched here;
    /// `ClientContext::sign_in` clears its own.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(self.endpoint("auth/signin")?)
            .json(&serde_json::json!({"email": email, "password": password}))
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(ClientError::WrongCredentials),
            s => Err(ClientError::Http { status: s.as_u16(), body: resp.text().await.unwrap_or_default() }),
        }
    }

    pub async fn sign_out(&self) -> Result<(), ClientError> {
        let resp = self.http.post(self.endpoint("auth/signout")?).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::Http { status: resp.status().as_u16(), body: resp.text().await.unwrap_or_default() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn raw(status: u16, body: Value) -> RawResponse { RawResponse { status, body: body.to_string() } }

    #[test]
    fn detects_needs_refresh_only_from_cause_tag() {
        let stale = raw(401, json!({"error": RpcError::needs_refresh().to_shape(Some("user.getMetadata"))}));
        assert!(stale.needs_refresh());
        let anon = raw(401, json!({"error": RpcError::forbidden().to_shape(None)}));
        assert_eq!(anon.auth_cause(), Some(AuthErrorCode::Forbidden));
        assert!(!anon.needs_refresh());
        assert!(!raw(500, json!("not an envelope")).needs_refresh());
    }

    #[test]
    fn success_and_error_envelopes() {
        let ok = raw(200, json!({"result": {"data": {"json": {"a": 1}}}}));
        assert_eq!(ok.into_value().unwrap(), json!({"a": 1}));

        let err = raw(404, json!({"error": RpcError::not_found("User not found").to_shape(None)})).into_value().unwrap_err();
        assert_eq!(err.rpc().map(|e| e.code()), Some(ErrorCode::NotFound));

        let garbage = RawResponse { status: 502, body: "bad gateway".into() }.into_value().unwrap_err();
        assert!(matches!(garbage, ClientError::Http { status: 502, .. }));
    }

    #[test]
    fn recording_redirect_keeps_last_location() {
        let r = RecordingRedirect::new();
        assert!(r.last().is_none());
        r.redirect(REFRESH_FAILED_LOCATION);
        assert_eq!(r.last().as_deref(), Some("/?refreshFailed=true"));
    }

    #[test]
    fn base_url_gets_trailing_slash_and_no_session() {
        let c = RpcClient::new("http://127.0.0.1:7878").unwrap();
        assert_eq!(c.rpc_url("user.getInfo").unwrap().as_str(), "http://127.0.0.1:7878/api/rpc/user.getInfo");
        assert!(!c.session_exists());
        assert!(matches!(RpcClient::new("not a url"), Err(ClientError::InvalidUrl(_))));
    }
}
