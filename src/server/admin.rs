// Axum admin surface: read-only views of in-flight fetches, cache size and counters.

use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::engine::inflight::ActiveFetch;
use crate::engine::stats::StatsSnapshot;
use crate::engine::Orchestrator;

#[derive(Debug, Serialize)]
struct CacheSize {
    size: usize,
}

pub struct AdminServer {
    port: u16,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl AdminServer {
    /// Bind on a random loopback port and serve in the background.
    pub async fn start(orchestrator: Arc<Orchestrator>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = router(orchestrator);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!("admin server listening on 127.0.0.1:{}", port);
        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/admin/active", get(active_handler))
        .route("/admin/cache", get(cache_handler))
        .route("/admin/stats", get(stats_handler))
        .with_state(orchestrator)
}

/// GET /admin/active
async fn active_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Vec<ActiveFetch>> {
    let active = orchestrator.active_fetches();
    debug!("admin: {} active fetches", active.len());
    Json(active)
}

/// GET /admin/cache
async fn cache_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Json<CacheSize> {
    Json(CacheSize {
        size: orchestrator.cache_size().await,
    })
}

/// GET /admin/stats
async fn stats_handler(State(orchestrator): State<Arc<Orchestrator>>) -> Json<StatsSnapshot> {
    Json(orchestrator.stats())
}
