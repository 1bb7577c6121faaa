// Integration test for the AdminServer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use media_fetch_engine::config::EngineConfig;
use media_fetch_engine::engine::integrity::ArtifactName;
use media_fetch_engine::engine::{Collaborators, Orchestrator};
use media_fetch_engine::fetch::traits::Fetcher;
use media_fetch_engine::ledger::reservations::ReservationBook;
use media_fetch_engine::ledger::traits::{Ledger, RefundRequest};
use media_fetch_engine::server::admin::AdminServer;
use media_fetch_engine::store::memory::MemoryStore;
use media_fetch_engine::transport::{Requester, Transport};

struct SlowFetcher;

#[async_trait]
impl Fetcher for SlowFetcher {
    async fn fetch(&self, _key: &str, name: &ArtifactName, work_dir: &Path) -> Result<PathBuf> {
        tokio::time::sleep(Duration::from_millis(400)).await;
        let path = name.path_in(work_dir, "mp4");
        tokio::fs::write(&path, b"video").await?;
        Ok(path)
    }
}

struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn deliver(&self, _to: &Requester, _artifact: &Path) -> Result<String> {
        Ok("T1".to_string())
    }

    async fn redeliver(&self, _to: &Requester, _token: &str) -> Result<()> {
        Ok(())
    }

    async fn notify(&self, _to: &Requester, _message: &str) -> Result<()> {
        Ok(())
    }
}

struct NullLedger;

#[async_trait]
impl Ledger for NullLedger {
    async fn compensate(&self, _refund: &RefundRequest) -> Result<()> {
        Ok(())
    }
}

async fn get_json(client: &reqwest::Client, url: String) -> Value {
    let resp = client.get(url).send().await.unwrap();
    assert!(resp.status().is_success());
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_admin_endpoints() {
    let work = TempDir::new().unwrap();
    let config = EngineConfig {
        work_dir: work.path().to_path_buf(),
        lock_cleanup_delay_ms: 10,
        ..Default::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(
        config,
        Collaborators {
            fetcher: Arc::new(SlowFetcher),
            transport: Arc::new(NullTransport),
            ledger: Arc::new(NullLedger),
            store: Arc::new(MemoryStore::new()),
            reservations: Arc::new(ReservationBook::new()),
        },
    ));
    let server = AdminServer::start(orchestrator.clone()).await.unwrap();
    assert!(server.port() > 0);
    let client = reqwest::Client::new();

    let request = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .request_artifact("https://v/admin", Requester::direct(31), None)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let active = get_json(&client, server.url("/admin/active")).await;
    let active = active.as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["key"], "https://v/admin");
    assert_eq!(active[0]["requester"], 31);

    request.await.unwrap().unwrap();

    let cache = get_json(&client, server.url("/admin/cache")).await;
    assert_eq!(cache["size"], 1);

    let stats = get_json(&client, server.url("/admin/stats")).await;
    assert_eq!(stats["requests"], 1);
    assert_eq!(stats["fetches_started"], 1);
    assert_eq!(stats["active_workers"], 0);

    let empty = get_json(&client, server.url("/admin/active")).await;
    assert!(empty.as_array().unwrap().is_empty());

    server.shutdown();
}
