#![allow(dead_code)]

use std::sync::Arc;

use tokio::task::JoinHandle;

use usermeta::config::ServerConfig;
use usermeta::server::{router, AppState};
use usermeta::store::{MemoryIdentityStore, MemoryMetadataStore, UserRecord};

pub const EMAIL: &str = "ada@example.com";
pub const PASSWORD: &str = "correct horse";

/// Server bound to an ephemeral port; aborted on drop.
pub struct TestServer {
    pub base: String,
    pub state: AppState,
    pub identity: Arc<MemoryIdentityStore>,
    pub metadata: Arc<MemoryMetadataStore>,
    pub user: UserRecord,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) { self.handle.abort(); }
}

pub async fn start_server() -> TestServer { start_server_with(ServerConfig::default()).await }

pub async fn start_server_with(config: ServerConfig) -> TestServer {
    let identity = Arc::new(MemoryIdentityStore::new());
    let user = identity.create_user(EMAIL, PASSWORD).expect("seed user");
    let metadata = Arc::new(MemoryMetadataStore::new());
    let state = AppState::new(config, identity.clone(), metadata.clone());

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.expect("bind 127.0.0.1:0");
    let port = listener.local_addr().expect("local addr").port();
    let app = router(state.clone());
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("server task error: {e:?}");
        }
    });
    TestServer { base: format!("http://127.0.0.1:{}", port), state, identity, metadata, user, handle }
}
