//!
//! usermeta client
//! ---------------
//! Cookie-jar HTTP client for the RPC surface. Every call goes through a retry
//! wrapper: a NEEDS_REFRESH failure triggers one session refresh and one retry;
//! a failed refresh redirects to the sign-in entry point and fails the call.
//! `UserApi` adds a small query cache on top.

mod cache;
mod transport;
mod user;

pub use cache::{QueryCache, QueryKey, DEFAULT_STALE_TIME};
pub use transport::{
    HttpSessionRefresher, LoginRedirect, RawResponse, RecordingRedirect, RpcClient, SessionRefresher,
    REFRESH_FAILED_LOCATION,
};
pub use user::{ClientContext, Notify, UserApi, GENERIC_ERROR_MSG};

use crate::error::{AuthErrorCode, RpcError};
use crate::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Rpc(RpcError),
    #[error("session refresh failed")]
    RefreshFailed,
    #[error("wrong credentials")]
    WrongCredentials,
    #[error("unexpected response ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("wire decode failed: {0}")]
    Wire(#[from] WireError),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    pub fn rpc(&self) -> Option<&RpcError> {
        match self {
            ClientError::Rpc(e) => Some(e),
            _ => None,
        }
    }

    pub fn auth_cause(&self) -> Option<AuthErrorCode> { self.rpc().and_then(|e| e.auth_cause()) }
}
