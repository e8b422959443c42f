use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use tracing::debug;

use super::session::{LocalSessionProvider, SessionTokens};
use crate::store::{IdentityStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SignInError {
    #[error("wrong credentials")]
    WrongCredentials,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user_id: String,
    pub tokens: SessionTokens,
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|_| password_hash::Error::Crypto)?;
    let salt = SaltString::encode_b64(&salt_bytes)?;
    let argon2 = Argon2::default();
    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// Email/password sign-in against the identity store; issues a new session on success.
pub async fn sign_in(
    identity: &dyn IdentityStore,
    sessions: &LocalSessionProvider,
    email: &str,
    password: &str,
) -> Result<SignedIn, SignInError> {
    let Some(creds) = identity.find_credentials(email).await? else {
        debug!(target: "auth", "sign-in for unknown email");
        return Err(SignInError::WrongCredentials);
    };
    if !verify_password(&creds.password_hash, password) {
        debug!(target: "auth", user_id = %creds.user_id, "sign-in with wrong password");
        return Err(SignInError::WrongCredentials);
    }
    let tokens = sessions.create_session(&creds.user_id);
    Ok(SignedIn { user_id: creds.user_id, tokens })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryIdentityStore;

    #[test]
    fn password_hash_round_trip() {
        let phc = hash_password("hunter2").unwrap();
        assert!(verify_password(&phc, "hunter2"));
        assert!(!verify_password(&phc, "hunter3"));
        assert!(!verify_password("not-a-phc-string", "hunter2"));
    }

    #[tokio::test]
    async fn sign_in_issues_session_only_for_right_password() {
        let store = MemoryIdentityStore::new();
        let user = store.create_user("ada@example.com", "pw-1").unwrap();
        let sessions = LocalSessionProvider::default();

        let ok = sign_in(&store, &sessions, "ADA@example.com", "pw-1").await.unwrap();
        assert_eq!(ok.user_id, user.id);
        assert_eq!(sessions.validate_access(&ok.tokens.access_token), Some(user.id.clone()));

        assert!(matches!(sign_in(&store, &sessions, "ada@example.com", "nope").await, Err(SignInError::WrongCredentials)));
        assert!(matches!(sign_in(&store, &sessions, "bob@example.com", "pw-1").await, Err(SignInError::WrongCredentials)));
        assert_eq!(sessions.session_count(), 1);
    }
}
