use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine;
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use crate::tprintln;

use super::cookies::Cookies;
use super::verifier::{SessionState, SessionVerifier, VerifyError};

pub type SessionToken = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub session_handle: String,
    pub subject_id: String,
    pub access_token: SessionToken,
    pub refresh_token: SessionToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("unknown refresh token")]
    Unknown,
    #[error("refresh token expired")]
    Expired,
}

#[derive(Debug)]
struct SessionEntry {
    subject_id: String,
    access_token: SessionToken,
    refresh_token: SessionToken,
    access_expires_at: Instant,
    refresh_expires_at: Instant,
}

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<String, SessionEntry>,
    by_access: HashMap<SessionToken, String>,
    by_refresh: HashMap<SessionToken, String>,
}

impl Tables {
    fn remove(&mut self, handle: &str) -> Option<SessionEntry> {
        let ent = self.sessions.remove(handle)?;
        self.by_access.remove(&ent.access_token);
        self.by_refresh.remove(&ent.refresh_token);
        Some(ent)
    }
}

fn gen_id() -> String {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// In-process auth provider: issues opaque access/refresh token pairs, validates access
/// tokens, rotates pairs on refresh and revokes them on sign-out.
pub struct LocalSessionProvider {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    tables: RwLock<Tables>,
}

impl Default for LocalSessionProvider {
    fn default() -> Self { Self::new(Duration::from_secs(60 * 60), Duration::from_secs(100 * 24 * 60 * 60)) }
}

impl LocalSessionProvider {
    pub fn new(access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self { access_ttl, refresh_ttl, tables: RwLock::new(Tables::default()) }
    }

    pub fn create_session(&self, subject_id: &str) -> SessionTokens {
        let now = Instant::now();
        let handle = gen_id();
        let tokens = SessionTokens {
            session_handle: handle.clone(),
            subject_id: subject_id.to_string(),
            access_token: gen_id(),
            refresh_token: gen_id(),
        };
        let entry = SessionEntry {
            subject_id: subject_id.to_string(),
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            access_expires_at: now + self.access_ttl,
            refresh_expires_at: now + self.refresh_ttl,
        };
        {
            let mut t = self.tables.write();
            t.by_access.insert(tokens.access_token.clone(), handle.clone());
            t.by_refresh.insert(tokens.refresh_token.clone(), handle.clone());
            t.sessions.insert(handle, entry);
        }
        tprintln!("session.issue user={} ttl_secs={}", subject_id, self.access_ttl.as_secs());
        tokens
    }

    /// Subject of a live access token.
    pub fn validate_access(&self, token: &str) -> Option<String> {
        let now = Instant::now();
        let t = self.tables.read();
        let handle = t.by_access.get(token)?;
        let ent = t.sessions.get(handle)?;
        if ent.access_expires_at > now { Some(ent.subject_id.clone()) } else { None }
    }

    /// Exchange a refresh token for a fresh pair. The presented refresh token and the
    /// session's previous access token stop working.
    pub fn refresh(&self, refresh_token: &str) -> Result<SessionTokens, RefreshError> {
        let now = Instant::now();
        let mut t = self.tables.write();
        let handle = t.by_refresh.get(refresh_token).cloned().ok_or(RefreshError::Unknown)?;
        let expired = t.sessions.get(&handle).map(|e| e.refresh_expires_at <= now).ok_or(RefreshError::Unknown)?;
        if expired {
            t.remove(&handle);
            return Err(RefreshError::Expired);
        }
        let access_token = gen_id();
        let new_refresh = gen_id();
        let Some(ent) = t.sessions.get_mut(&handle) else { return Err(RefreshError::Unknown) };
        let old_access = std::mem::replace(&mut ent.access_token, access_token.clone());
        let old_refresh = std::mem::replace(&mut ent.refresh_token, new_refresh.clone());
        ent.access_expires_at = now + self.access_ttl;
        ent.refresh_expires_at = now + self.refresh_ttl;
        let subject_id = ent.subject_id.clone();
        t.by_access.remove(&old_access);
        t.by_refresh.remove(&old_refresh);
        t.by_access.insert(access_token.clone(), handle.clone());
        t.by_refresh.insert(new_refresh.clone(), handle.clone());
        tprintln!("session.refresh user={}", subject_id);
        Ok(SessionTokens { session_handle: handle, subject_id, access_token, refresh_token: new_refresh })
    }

    /// Revoke the session that either cookie belongs to.
    pub fn revoke(&self, cookies: &Cookies) -> bool {
        let mut t = self.tables.write();
        let handle = cookies
            .access_token()
            .and_then(|a| t.by_access.get(a).cloned())
            .or_else(|| cookies.refresh_token().and_then(|r| t.by_refresh.get(r).cloned()));
        match handle {
            Some(h) => t.remove(&h).is_some(),
            None => false,
        }
    }

    /// Expire every access token of a user while keeping their refresh tokens usable.
    /// Clients recover through a silent refresh.
    pub fn expire_access_tokens(&self, subject_id: &str) -> usize {
        let now = Instant::now();
        let mut count = 0usize;
        for ent in self.tables.write().sessions.values_mut() {
            if ent.subject_id == subject_id && ent.access_expires_at > now {
                ent.access_expires_at = now;
                count += 1;
            }
        }
        tprintln!("session.expire_access user={} count={}", subject_id, count);
        count
    }

    /// Drop every session of a user; a refresh will fail and the user must sign in again.
    pub fn revoke_user(&self, subject_id: &str) -> usize {
        let mut t = self.tables.write();
        let handles: Vec<String> = t
            .sessions
            .iter()
            .filter(|(_, e)| e.subject_id == subject_id)
            .map(|(h, _)| h.clone())
            .collect();
        for h in handles.iter() {
            t.remove(h);
        }
        tprintln!("session.revoke user={} count={}", subject_id, handles.len());
        handles.len()
    }

    /// Remove sessions whose refresh token has expired.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut t = self.tables.write();
        let dead: Vec<String> = t
            .sessions
            .iter()
            .filter(|(_, e)| e.refresh_expires_at <= now)
            .map(|(h, _)| h.clone())
            .collect();
        for h in dead.iter() {
            t.remove(h);
        }
        dead.len()
    }

    pub fn session_count(&self) -> usize { self.tables.read().sessions.len() }

    pub fn check(&self, cookies: &Cookies) -> SessionState {
        if let Some(subject_id) = cookies.access_token().and_then(|a| self.validate_access(a)) {
            return SessionState::Authenticated { subject_id };
        }
        if cookies.has_session_cookie() { SessionState::NeedsRefresh } else { SessionState::NoToken }
    }
}

impl SessionVerifier for LocalSessionProvider {
    fn verify<'a>(&'a self, cookies: &'a Cookies) -> BoxFuture<'a, Result<SessionState, VerifyError>> {
        let state = self.check(cookies);
        async move { Ok(state) }.boxed()
    }
}
