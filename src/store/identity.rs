use std::collections::HashMap;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::wire::Date;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub emails: Vec<String>,
    pub time_joined: Date,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    /// Argon2 PHC string
    pub password_hash: String,
}

pub trait IdentityStore: Send + Sync {
    fn get_user<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<UserRecord>, StoreError>>;

    /// Lookup used by password sign-in. Emails compare case-insensitively.
    fn find_credentials<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<Credentials>, StoreError>>;
}

#[derive(Default)]
struct Tables {
    users: HashMap<String, UserRecord>,
    // lowercased email -> credentials
    by_email: HashMap<String, Credentials>,
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    tables: RwLock<Tables>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self { Self::default() }

    pub fn create_user(&self, email: &str, password: &str) -> Result<UserRecord, StoreError> {
        let key = email.trim().to_lowercase();
        if key.is_empty() {
            return Err(StoreError::Conflict("email must not be empty".into()));
        }
        let password_hash = crate::identity::hash_password(password).map_err(|e| StoreError::Hash(e.to_string()))?;
        let mut t = self.tables.write();
        if t.by_email.contains_key(&key) {
            return Err(StoreError::Conflict(format!("user with email '{}' already exists", key)));
        }
        let user = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            emails: vec![email.trim().to_string()],
            time_joined: Date::now(),
        };
        t.users.insert(user.id.clone(), user.clone());
        t.by_email.insert(key, Credentials { user_id: user.id.clone(), password_hash });
        tracing::debug!(target: "store", user_id = %user.id, "identity.create_user");
        Ok(user)
    }

    /// Create the user unless one with this email already exists.
    pub fn ensure_user(&self, email: &str, password: &str) -> Result<UserRecord, StoreError> {
        let existing = {
            let t = self.tables.read();
            t.by_email
                .get(&email.trim().to_lowercase())
                .and_then(|c| t.users.get(&c.user_id).cloned())
        };
        match existing {
            Some(u) => Ok(u),
            None => self.create_user(email, password),
        }
    }

    pub fn delete_user(&self, id: &str) -> bool {
        let mut t = self.tables.write();
        let removed = t.users.remove(id).is_some();
        t.by_email.retain(|_, c| c.user_id != id);
        removed
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get_user<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<UserRecord>, StoreError>> {
        let out = self.tables.read().users.get(id).cloned();
        async move { Ok(out) }.boxed()
    }

    fn find_credentials<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<Credentials>, StoreError>> {
        let out = self.tables.read().by_email.get(&email.trim().to_lowercase()).cloned();
        async move { Ok(out) }.boxed()
    }
}
