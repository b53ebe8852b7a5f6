//! Shared helpers for the integration tests: a throwaway HTTP server and an
//! engine wired to the real network fetcher and the in-memory store.

#![allow(dead_code)]

use std::sync::Arc;

use ativeplay_sync::{Config, MemoryStore, NetworkFetcher, SyncEngine};
use axum::Router;
use tokio::net::TcpListener;

/// Serve `app` on an ephemeral port, returning its base URL
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Fast retries so failure paths finish quickly
pub fn test_config() -> Config {
    Config {
        max_retries: 2,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..Config::default()
    }
}

pub fn engine(config: &Config) -> (SyncEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(config.removal_policy));
    let fetcher = Arc::new(NetworkFetcher::with_client(reqwest::Client::new(), config));
    (SyncEngine::new(store.clone(), fetcher, config), store)
}

pub const GUIDE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv>
  <channel id="bbc1.uk"><display-name>BBC One</display-name></channel>
  <programme start="20261019100000 +0000" stop="20261019110000 +0000" channel="bbc1.uk">
    <title>Breakfast</title>
  </programme>
  <programme start="20261019110000 +0000" stop="20261019120000 +0000" channel="bbc1.uk">
    <title>Homes Under the Hammer</title>
  </programme>
</tv>
"#;
