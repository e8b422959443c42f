//!
//! RPC procedures and dispatch
//! ---------------------------
//! A procedure is a tagged function: public reads take a `RequestContext`, protected reads
//! and writes take a `ProtectedContext` that only the authorization middleware can build.
//!
//! Dispatch order per call:
//! 1. resolve the path and check the transport method (GET for reads, POST for writes);
//! 2. build the request context (fails with NEEDS_REFRESH on a stale session);
//! 3. optional artificial latency (development only);
//! 4. for protected procedures, run the authorization middleware;
//! 5. run the handler, converting panics into internal errors.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::{panic_message, RpcError, RpcResult};
use crate::identity::{self, ProtectedContext, RequestContext, RequestMeta, SessionVerifier};
use crate::store::{IdentityStore, MetadataStore};

pub mod user;

pub type PublicHandler = fn(Arc<RpcServices>, RequestContext, Value) -> BoxFuture<'static, RpcResult<Value>>;
pub type ProtectedHandler = fn(Arc<RpcServices>, ProtectedContext, Value) -> BoxFuture<'static, RpcResult<Value>>;

#[derive(Clone, Copy)]
pub enum Procedure {
    PublicRead(PublicHandler),
    ProtectedRead(ProtectedHandler),
    ProtectedWrite(ProtectedHandler),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    /// Served over GET
    Query,
    /// Served over POST
    Mutation,
}

impl ProcedureKind {
    pub fn method(self) -> &'static str {
        match self {
            ProcedureKind::Query => "GET",
            ProcedureKind::Mutation => "POST",
        }
    }
}

impl Procedure {
    pub fn kind(&self) -> ProcedureKind {
        match self {
            Procedure::PublicRead(_) | Procedure::ProtectedRead(_) => ProcedureKind::Query,
            Procedure::ProtectedWrite(_) => ProcedureKind::Mutation,
        }
    }

    pub fn is_protected(&self) -> bool { !matches!(self, Procedure::PublicRead(_)) }
}

#[derive(Clone, Default)]
pub struct ProcedureRouter {
    procedures: BTreeMap<String, Procedure>,
}

impl ProcedureRouter {
    pub fn new() -> Self { Self::default() }

    pub fn register(mut self, path: &str, procedure: Procedure) -> Self {
        self.procedures.insert(path.to_string(), procedure);
        self
    }

    /// Mount every procedure of `sub` under `prefix.`.
    pub fn nest(mut self, prefix: &str, sub: ProcedureRouter) -> Self {
        for (path, p) in sub.procedures {
            self.procedures.insert(format!("{}.{}", prefix, path), p);
        }
        self
    }

    pub fn get(&self, path: &str) -> Option<Procedure> { self.procedures.get(path).copied() }

    pub fn paths(&self) -> impl Iterator<Item = &str> { self.procedures.keys().map(|k| k.as_str()) }
}

/// The application's procedure tree.
pub fn app_router() -> ProcedureRouter {
    ProcedureRouter::new().nest("user", user::procedures())
}

/// Artificial latency for exercising loading states locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingOptions {
    pub artificial_delay: bool,
}

/// Collaborators shared by every call.
pub struct RpcServices {
    pub verifier: Arc<dyn SessionVerifier>,
    pub identity: Arc<dyn IdentityStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub timing: TimingOptions,
}

#[derive(Debug, Clone)]
pub struct RpcCall {
    pub meta: RequestMeta,
    pub kind: ProcedureKind,
    pub input: Value,
}

fn jitter_ms() -> u64 {
    // 100..500ms
    let mut b = [0u8; 2];
    let _ = getrandom::getrandom(&mut b);
    100 + (u16::from_le_bytes(b) as u64 % 400)
}

async fn run_guarded(fut: BoxFuture<'static, RpcResult<Value>>, path: &str) -> RpcResult<Value> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => res,
        Err(panic_payload) => {
            let msg = panic_message(&*panic_payload);
            error!(target: "panic", "procedure '{}' panicked: {}", path, msg);
            Err(RpcError::internal_with("internal server error", msg))
        }
    }
}

/// Resolve and execute one call.
pub async fn dispatch(services: &Arc<RpcServices>, router: &ProcedureRouter, call: RpcCall) -> RpcResult<Value> {
    let RpcCall { meta, kind, input } = call;
    let Some(procedure) = router.get(&meta.path) else {
        return Err(RpcError::not_found(format!("No procedure found on path \"{}\"", meta.path)));
    };
    if procedure.kind() != kind {
        return Err(RpcError::method_not_supported(format!(
            "Unsupported {} request to {} procedure at path \"{}\"",
            kind.method(),
            match procedure.kind() { ProcedureKind::Query => "query", ProcedureKind::Mutation => "mutation" },
            meta.path
        )));
    }

    let path = meta.path.clone();
    let ctx = identity::create_context(services.verifier.as_ref(), meta).await?;

    let start = Instant::now();
    let wait_ms = if services.timing.artificial_delay {
        let ms = jitter_ms();
        tokio::time::sleep(Duration::from_millis(ms)).await;
        ms
    } else { 0 };

    let result = match procedure {
        Procedure::PublicRead(handler) => run_guarded(handler(services.clone(), ctx, input), &path).await,
        Procedure::ProtectedRead(handler) | Procedure::ProtectedWrite(handler) => {
            let pctx = identity::authenticate(services.verifier.as_ref(), &ctx).await?;
            run_guarded(handler(services.clone(), pctx, input), &path).await
        }
    };

    if services.timing.artificial_delay {
        let total = start.elapsed().as_millis() as u64;
        info!(target: "rpc", "{} took {}ms to execute. Artificial {}ms. Real {}ms", path, total, wait_ms, total.saturating_sub(wait_ms));
    }
    result
}

/// Error reporting at the RPC boundary. Expected auth outcomes are debug-only.
pub fn report_error(path: &str, input: &Value, err: &RpcError) {
    if err.is_expected_auth() {
        debug!(target: "rpc", path = %path, "expected auth error: {}", err);
        return;
    }
    error!(
        target: "rpc",
        path = %path,
        input = %input,
        detail = err.detail().unwrap_or(""),
        "rpc error on '{}': {}", path, err
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthErrorCode, ErrorCode};
    use crate::identity::{Cookies, LocalSessionProvider, SessionState, VerifyError, ACCESS_COOKIE};
    use crate::store::{MemoryIdentityStore, MemoryMetadataStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static PROTECTED_RUNS: AtomicUsize = AtomicUsize::new(0);

    fn echo_subject(_s: Arc<RpcServices>, ctx: ProtectedContext, _input: Value) -> BoxFuture<'static, RpcResult<Value>> {
        PROTECTED_RUNS.fetch_add(1, Ordering::SeqCst);
        async move { Ok(json!(ctx.subject_id.as_str())) }.boxed()
    }

    fn explode(_s: Arc<RpcServices>, _ctx: RequestContext, _input: Value) -> BoxFuture<'static, RpcResult<Value>> {
        async move {
            let missing: Option<Value> = None;
            Ok(missing.expect("handler bug"))
        }
        .boxed()
    }

    fn setup() -> (Arc<RpcServices>, Arc<LocalSessionProvider>, ProcedureRouter) {
        let sessions = Arc::new(LocalSessionProvider::default());
        let services = Arc::new(RpcServices {
            verifier: sessions.clone(),
            identity: Arc::new(MemoryIdentityStore::new()),
            metadata: Arc::new(MemoryMetadataStore::new()),
            timing: TimingOptions::default(),
        });
        let router = ProcedureRouter::new()
            .nest("t", ProcedureRouter::new()
                .register("whoami", Procedure::ProtectedRead(echo_subject))
                .register("explode", Procedure::PublicRead(explode)));
        (services, sessions, router)
    }

    fn call(path: &str, kind: ProcedureKind, cookies: Cookies) -> RpcCall {
        RpcCall { meta: RequestMeta { request_id: "r".into(), path: path.into(), cookies }, kind, input: Value::Null }
    }

    #[test]
    fn app_router_exposes_user_procedures() {
        let r = app_router();
        let paths: Vec<&str> = r.paths().collect();
        assert_eq!(paths, vec!["user.editMetadata", "user.getInfo", "user.getMetadata"]);
        assert_eq!(r.get("user.getInfo").map(|p| p.is_protected()), Some(false));
        assert_eq!(r.get("user.editMetadata").map(|p| p.kind()), Some(ProcedureKind::Mutation));
    }

    #[tokio::test]
    async fn unknown_path_and_wrong_method() {
        let (services, _, router) = setup();
        let err = dispatch(&services, &router, call("t.nope", ProcedureKind::Query, Cookies::default())).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        let err = dispatch(&services, &router, call("t.whoami", ProcedureKind::Mutation, Cookies::default())).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MethodNotSupported);
    }

    #[tokio::test]
    async fn protected_handler_runs_only_when_authenticated() {
        let (services, sessions, router) = setup();
        let before = PROTECTED_RUNS.load(Ordering::SeqCst);

        let err = dispatch(&services, &router, call("t.whoami", ProcedureKind::Query, Cookies::default())).await.unwrap_err();
        assert_eq!(err.auth_cause(), Some(AuthErrorCode::Forbidden));
        let stale = Cookies::default().with(ACCESS_COOKIE, "stale");
        let err = dispatch(&services, &router, call("t.whoami", ProcedureKind::Query, stale)).await.unwrap_err();
        assert_eq!(err.auth_cause(), Some(AuthErrorCode::NeedsRefresh));
        assert_eq!(PROTECTED_RUNS.load(Ordering::SeqCst), before);

        let t = sessions.create_session("u-42");
        let ok = dispatch(&services, &router, call("t.whoami", ProcedureKind::Query, Cookies::default().with(ACCESS_COOKIE, &t.access_token)))
            .await
            .unwrap();
        assert_eq!(ok, json!("u-42"));
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_error() {
        let (services, _, router) = setup();
        let err = dispatch(&services, &router, call("t.explode", ProcedureKind::Query, Cookies::default())).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalServerError);
        assert_eq!(err.message(), "internal server error");
    }

    struct CrashingVerifier;

    impl SessionVerifier for CrashingVerifier {
        fn verify<'a>(&'a self, _cookies: &'a Cookies) -> BoxFuture<'a, Result<SessionState, VerifyError>> {
            async move {
                let state: Option<SessionState> = None;
                Ok(state.expect("session core crashed"))
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn verifier_panic_is_an_internal_error_on_every_path() {
        let (services, _, router) = setup();
        let services = Arc::new(RpcServices {
            verifier: Arc::new(CrashingVerifier),
            identity: services.identity.clone(),
            metadata: services.metadata.clone(),
            timing: TimingOptions::default(),
        });
        for path in ["t.whoami", "t.explode"] {
            let cookies = Cookies::default().with(ACCESS_COOKIE, "anything");
            let err = dispatch(&services, &router, call(path, ProcedureKind::Query, cookies)).await.unwrap_err();
            assert_eq!(err.code(), ErrorCode::InternalServerError);
            assert_eq!(err.message(), "Authentication failed");
        }
    }
}
