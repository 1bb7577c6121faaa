// Fetcher backed by an external downloader binary, tried with fallback format strategies.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::traits::Fetcher;
use crate::config::ARTIFACT_EXTENSIONS;
use crate::engine::integrity::ArtifactName;

/// One attempt: a format selector passed to the tool.
#[derive(Debug, Clone)]
pub struct FetchStrategy {
    pub name: String,
    pub format: String,
}

impl FetchStrategy {
    pub fn new(name: &str, format: &str) -> Self {
        Self {
            name: name.to_string(),
            format: format.to_string(),
        }
    }

    /// Best quality first, then progressively safer selectors.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "best_quality",
                "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
            ),
            Self::new("simple_best", "best[ext=mp4]/best"),
            Self::new("worst_quality", "worst[ext=mp4]/worst"),
        ]
    }
}

pub struct CommandFetcher {
    program: PathBuf,
    base_args: Vec<String>,
    strategies: Vec<FetchStrategy>,
    timeout: Option<Duration>,
}

impl CommandFetcher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            strategies: FetchStrategy::defaults(),
            timeout: None,
        }
    }

    /// Arguments placed before the per-strategy ones (e.g. a script path).
    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<FetchStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Kill a single strategy run after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run_strategy(&self, strategy: &FetchStrategy, key: &str, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("-f")
            .arg(&strategy.format)
            .arg("-o")
            .arg(output)
            .arg("--no-mtime")
            .arg("--no-warnings")
            .arg(key)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let run = cmd.output();
        let out = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| anyhow!("strategy {} timed out after {:?}", strategy.name, limit))??,
            None => run.await?,
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(anyhow!(
                "tool exited {} (strategy {}): {}",
                out.status.code().map_or_else(|| "by signal".to_string(), |c| c.to_string()),
                strategy.name,
                stderr.trim()
            ));
        }
        Ok(())
    }
}

/// The tool may switch containers; accept the same stem with a known extension.
fn locate_output(work_dir: &Path, name: &ArtifactName) -> Option<PathBuf> {
    ARTIFACT_EXTENSIONS
        .iter()
        .map(|ext| name.path_in(work_dir, ext))
        .find(|candidate| candidate.is_file())
}

#[async_trait]
impl Fetcher for CommandFetcher {
    async fn fetch(&self, key: &str, name: &ArtifactName, work_dir: &Path) -> Result<PathBuf> {
        let output = name.path_in(work_dir, ARTIFACT_EXTENSIONS[0]);
        let mut last_error = anyhow!("no fetch strategies configured");

        for (i, strategy) in self.strategies.iter().enumerate() {
            debug!(
                "[{}] user {}: trying strategy {} ({})",
                name.request_id,
                name.requester,
                i + 1,
                strategy.name
            );
            match self.run_strategy(strategy, key, &output).await {
                Ok(()) => {
                    if let Some(found) = locate_output(work_dir, name) {
                        info!(
                            "[{}] fetched {} with strategy {}",
                            name.request_id,
                            found.display(),
                            strategy.name
                        );
                        return Ok(found);
                    }
                    last_error = anyhow!("no output file after strategy {}", strategy.name);
                }
                Err(e) => {
                    warn!(
                        "[{}] strategy {} failed: {:#}",
                        name.request_id, strategy.name, e
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error.context(format!(
            "all fetch strategies failed for user {} (request {}, key {})",
            name.requester, name.request_id, name.key_hash
        )))
    }
}
