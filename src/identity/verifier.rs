use std::panic::AssertUnwindSafe;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::cookies::Cookies;
use crate::error::panic_message;

/// Outcome of checking the session cookies of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// A valid access token was presented.
    Authenticated { subject_id: String },
    /// No session cookie at all: an anonymous caller.
    NoToken,
    /// A session cookie is present but the access token could not be validated.
    /// A refresh exchange may recover the session.
    NeedsRefresh,
}

impl SessionState {
    pub fn has_token(&self) -> bool { !matches!(self, SessionState::NoToken) }

    pub fn subject_id(&self) -> Option<&str> {
        match self {
            SessionState::Authenticated { subject_id } => Some(subject_id.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("session backend unavailable: {0}")]
    Unavailable(String),
    #[error("session verification failed: {0}")]
    Other(String),
    #[error("session verifier panicked: {0}")]
    Panicked(String),
}

/// The auth provider's session check.
pub trait SessionVerifier: Send + Sync {
    fn verify<'a>(&'a self, cookies: &'a Cookies) -> BoxFuture<'a, Result<SessionState, VerifyError>>;
}

/// Run `verifier.verify`, turning a panic inside the verifier into `VerifyError::Panicked`.
pub(crate) async fn verify_guarded(verifier: &dyn SessionVerifier, cookies: &Cookies) -> Result<SessionState, VerifyError> {
    match AssertUnwindSafe(verifier.verify(cookies)).catch_unwind().await {
        Ok(verified) => verified,
        Err(payload) => Err(VerifyError::Panicked(panic_message(&*payload).to_string())),
    }
}
