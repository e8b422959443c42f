use tracing::{debug, error};

use super::request_context::{ProtectedContext, RequestContext, SubjectId};
use super::verifier::{verify_guarded, SessionState, SessionVerifier, VerifyError};
use crate::error::{RpcError, RpcResult};

/// Gate for protected procedures. Re-verifies the request cookies independently of the
/// context builder and only yields a `ProtectedContext` for an authenticated caller.
pub async fn authenticate(verifier: &dyn SessionVerifier, ctx: &RequestContext) -> RpcResult<ProtectedContext> {
    let cookies = &ctx.meta.cookies;
    match verify_guarded(verifier, cookies).await {
        Err(VerifyError::Panicked(msg)) => {
            error!(target: "auth", request_id = %ctx.meta.request_id, "Unexpected authentication error: {}", msg);
            Err(RpcError::internal_with("Authentication failed", msg))
        }
        Err(e) => {
            error!(target: "auth", request_id = %ctx.meta.request_id, "Session verification error: {}", e);
            Err(RpcError::internal_with("Session verification failed", e))
        }
        Ok(SessionState::NeedsRefresh) => {
            debug!(target: "auth", path = %ctx.meta.path, "access token rejected, refresh required");
            Err(RpcError::needs_refresh())
        }
        Ok(SessionState::NoToken) => Err(RpcError::forbidden()),
        Ok(SessionState::Authenticated { subject_id }) => match SubjectId::new(subject_id) {
            Some(subject_id) => Ok(ProtectedContext { meta: ctx.meta.clone(), subject_id }),
            None => Err(RpcError::internal_with("Authentication failed", "verifier returned an empty subject")),
        },
    }
}
