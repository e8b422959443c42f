use std::collections::HashMap;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::StoreError;

/// Status of a store reply. Unknown users read back `{}` with `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Ok,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreReply {
    pub status: StoreStatus,
    pub value: Value,
}

impl StoreReply {
    pub fn ok(value: Value) -> Self { StoreReply { status: StoreStatus::Ok, value } }
    pub fn is_ok(&self) -> bool { self.status == StoreStatus::Ok }
}

/// Per-user JSON document keyed by subject id. Writes replace the whole document.
pub trait MetadataStore: Send + Sync {
    fn get_metadata<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<StoreReply, StoreError>>;
    fn set_metadata<'a>(&'a self, id: &'a str, value: Value) -> BoxFuture<'a, Result<StoreReply, StoreError>>;
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    docs: RwLock<HashMap<String, Value>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.docs.read().len() }

    pub fn is_empty(&self) -> bool { self.docs.read().is_empty() }
}

impl MetadataStore for MemoryMetadataStore {
    fn get_metadata<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<StoreReply, StoreError>> {
        // Users that never wrote anything read back an empty document.
        let value = self.docs.read().get(id).cloned().unwrap_or_else(|| Value::Object(Map::new()));
        async move { Ok(StoreReply::ok(value)) }.boxed()
    }

    fn set_metadata<'a>(&'a self, id: &'a str, value: Value) -> BoxFuture<'a, Result<StoreReply, StoreError>> {
        self.docs.write().insert(id.to_string(), value.clone());
        async move { Ok(StoreReply::ok(value)) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_user_reads_empty_document() {
        let store = MemoryMetadataStore::new();
        let reply = store.get_metadata("u1").await.unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.value, json!({}));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn writes_replace_wholesale() {
        let store = MemoryMetadataStore::new();
        store.set_metadata("u1", json!({"preferences": {"theme": "dark"}})).await.unwrap();
        let reply = store.set_metadata("u1", json!({"personalData": {"name": "Ada"}})).await.unwrap();
        assert_eq!(reply.value, json!({"personalData": {"name": "Ada"}}));
        assert_eq!(store.get_metadata("u1").await.unwrap().value, json!({"personalData": {"name": "Ada"}}));
        assert_eq!(store.len(), 1);
    }
}
