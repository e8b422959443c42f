use std::fmt::{Display, Formatter};

use tracing::{error, warn};

use super::cookies::Cookies;
use super::verifier::{verify_guarded, SessionState, SessionVerifier, VerifyError};
use crate::error::{RpcError, RpcResult};

/// What the transport knows about an inbound call before any session check.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub request_id: String,
    pub path: String,
    pub cookies: Cookies,
}

/// Per-request context seen by public procedures. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub meta: RequestMeta,
    pub subject_id: Option<String>,
}

impl RequestContext {
    pub fn anonymous(meta: RequestMeta) -> Self { Self { meta, subject_id: None } }
}

/// Subject identifier that is known to be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() { None } else { Some(SubjectId(id)) }
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl Display for SubjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

/// Context seen by protected procedures; only the authorization middleware builds one.
#[derive(Debug, Clone)]
pub struct ProtectedContext {
    pub meta: RequestMeta,
    pub subject_id: SubjectId,
}

/// Build the per-request context. A stale session fails the call with NEEDS_REFRESH even
/// for public procedures so every endpoint takes part in the refresh protocol.
/// A verifier that panics fails the call with an internal error.
pub async fn create_context(verifier: &dyn SessionVerifier, meta: RequestMeta) -> RpcResult<RequestContext> {
    match verify_guarded(verifier, &meta.cookies).await {
        Err(VerifyError::Panicked(msg)) => {
            error!(target: "auth", request_id = %meta.request_id, path = %meta.path, "Unexpected authentication error: {}", msg);
            Err(RpcError::internal_with("Authentication failed", msg))
        }
        Ok(SessionState::NeedsRefresh) => Err(RpcError::needs_refresh()),
        Ok(state) => {
            let subject_id = state.subject_id().map(|s| s.to_string());
            Ok(RequestContext { meta, subject_id })
        }
        Err(e) => {
            warn!(target: "auth", request_id = %meta.request_id, path = %meta.path, "session check failed while building context: {}", e);
            Ok(RequestContext::anonymous(meta))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthErrorCode, ErrorCode};
    use crate::identity::ACCESS_COOKIE;
    use futures_util::future::{BoxFuture, FutureExt};

    struct Fixed(Result<SessionState, String>);

    impl SessionVerifier for Fixed {
        fn verify<'a>(&'a self, _cookies: &'a Cookies) -> BoxFuture<'a, Result<SessionState, VerifyError>> {
            let out = self.0.clone().map_err(VerifyError::Unavailable);
            async move { out }.boxed()
        }
    }

    fn meta() -> RequestMeta {
        RequestMeta { request_id: "r1".into(), path: "user.getInfo".into(), cookies: Cookies::default().with(ACCESS_COOKIE, "x") }
    }

    #[tokio::test]
    async fn authenticated_subject_is_carried() {
        let v = Fixed(Ok(SessionState::Authenticated { subject_id: "u1".into() }));
        let ctx = create_context(&v, meta()).await.unwrap();
        assert_eq!(ctx.subject_id.as_deref(), Some("u1"));
        assert_eq!(ctx.meta.request_id, "r1");
    }

    #[tokio::test]
    async fn anonymous_caller_gets_empty_context() {
        let ctx = create_context(&Fixed(Ok(SessionState::NoToken)), meta()).await.unwrap();
        assert!(ctx.subject_id.is_none());
    }

    #[tokio::test]
    async fn stale_session_fails_even_public_calls() {
        let err = create_context(&Fixed(Ok(SessionState::NeedsRefresh)), meta()).await.unwrap_err();
        assert_eq!(err.auth_cause(), Some(AuthErrorCode::NeedsRefresh));
    }

    #[tokio::test]
    async fn verifier_error_degrades_to_anonymous() {
        let ctx = create_context(&Fixed(Err("down".into())), meta()).await.unwrap();
        assert!(ctx.subject_id.is_none());
    }

    struct Panicking;

    impl SessionVerifier for Panicking {
        fn verify<'a>(&'a self, _cookies: &'a Cookies) -> BoxFuture<'a, Result<SessionState, VerifyError>> {
            async move {
                let crashed: Option<SessionState> = None;
                Ok(crashed.expect("session core crashed"))
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn verifier_panic_fails_the_call() {
        let err = create_context(&Panicking, meta()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalServerError);
        assert_eq!(err.message(), "Authentication failed");
        assert_eq!(err.detail(), Some("session core crashed"));
    }

    #[test]
    fn subject_id_rejects_blank() {
        assert!(SubjectId::new("").is_none());
        assert!(SubjectId::new("  ").is_none());
        assert_eq!(SubjectId::new("u1").unwrap().as_str(), "u1");
    }
}
