//! Collaborator seams for user records and per-user metadata, with in-memory implementations.

mod identity;
mod metadata;

pub use identity::{Credentials, IdentityStore, MemoryIdentityStore, UserRecord};
pub use metadata::{MemoryMetadataStore, MetadataStore, StoreReply, StoreStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}
