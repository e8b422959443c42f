use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use super::cache::{QueryCache, QueryKey};
use super::transport::RpcClient;
use super::ClientError;
use crate::store::UserRecord;
use crate::validation::UserMetadata;

pub const GENERIC_ERROR_MSG: &str = "Oof! An error occured";

pub const GET_INFO: &str = "user.getInfo";
pub const GET_METADATA: &str = "user.getMetadata";
pub const EDIT_METADATA: &str = "user.editMetadata";

/// User-facing notification sink (e.g. a toast).
pub trait Notify: Send + Sync {
    fn show(&self, message: &str);
}

/// Client plus its query cache, built once and passed to whoever needs them.
#[derive(Clone)]
pub struct ClientContext {
    pub client: Arc<RpcClient>,
    pub cache: Arc<QueryCache>,
    pub notifier: Option<Arc<dyn Notify>>,
}

impl ClientContext {
    pub fn new(client: RpcClient) -> Self {
        ClientContext { client: Arc::new(client), cache: Arc::new(QueryCache::default()), notifier: None }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notify>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn user(&self) -> UserApi<'_> { UserApi { ctx: self } }

    /// Sign in and drop every cached result from the previous session.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), ClientError> {
        self.client.sign_in(email, password).await?;
        self.cache.clear();
        debug!(target: "client", "signed in; query cache cleared");
        Ok(())
    }

    /// Sign out. The cache is cleared even when the server call fails.
    pub async fn sign_out(&self) -> Result<(), ClientError> {
        let outcome = self.client.sign_out().await;
        self.cache.clear();
        outcome
    }

    /// Global mutation failure hook.
    fn on_mutation_error(&self, err: &ClientError) {
        error!(target: "client", "Client error: {}", err);
        if let Some(n) = &self.notifier {
            n.show(GENERIC_ERROR_MSG);
        }
    }

    async fn cached_query<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let key = QueryKey::new(path, None);
        let value = match self.cache.get_fresh(&key) {
            Some(v) => v,
            None => {
                let v = match self.client.query(path, None).await {
                    Ok(v) => v,
                    Err(ClientError::RefreshFailed) => {
                        self.cache.clear();
                        return Err(ClientError::RefreshFailed);
                    }
                    Err(e) => return Err(e),
                };
                self.cache.put(key, v.clone());
                v
            }
        };
        Ok(serde_json::from_value(value)?)
    }
}

pub struct UserApi<'a> {
    ctx: &'a ClientContext,
}

impl UserApi<'_> {
    /// Account record, `None` when signed out.
    pub async fn info(&self) -> Result<Option<UserRecord>, ClientError> {
        self.ctx.cached_query(GET_INFO).await
    }

    /// Stored metadata; skipped (`None`) while no session cookie exists.
    pub async fn metadata(&self) -> Result<Option<UserMetadata>, ClientError> {
        if !self.ctx.client.session_exists() {
            return Ok(None);
        }
        self.ctx.cached_query::<UserMetadata>(GET_METADATA).await.map(Some)
    }

    /// Replace the stored metadata. The cached `getMetadata` result is dropped whatever the outcome.
    pub async fn edit_metadata(&self, metadata: &UserMetadata) -> Result<UserMetadata, ClientError> {
        let outcome = self.send_edit(metadata).await;
        self.ctx.cache.invalidate_path(GET_METADATA);
        if let Err(e) = &outcome {
            self.ctx.on_mutation_error(e);
        }
        outcome
    }

    async fn send_edit(&self, metadata: &UserMetadata) -> Result<UserMetadata, ClientError> {
        let input: Value = serde_json::to_value(metadata)?;
        let stored = self.ctx.client.mutate(EDIT_METADATA, input).await?;
        Ok(serde_json::from_value(stored)?)
    }
}
