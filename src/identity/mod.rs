//! Session authentication for the RPC surface.
//! Keep the public surface thin and split implementation across sub-modules.

mod cookies;
mod verifier;
mod session;
mod provider;
mod request_context;
mod authorizer;

pub use cookies::{Cookies, ACCESS_COOKIE, REFRESH_COOKIE, set_cookie, clear_cookie};
pub use verifier::{SessionState, SessionVerifier, VerifyError};
pub use session::{LocalSessionProvider, RefreshError, SessionTokens, SessionToken};
pub use provider::{sign_in, hash_password, verify_password, SignInError, SignedIn};
pub use request_context::{create_context, ProtectedContext, RequestContext, RequestMeta, SubjectId};
pub use authorizer::authenticate;
