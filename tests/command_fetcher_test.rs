// Integration tests for CommandFetcher using small shell scripts as the tool.

#![cfg(unix)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use media_fetch_engine::engine::integrity::ArtifactName;
use media_fetch_engine::fetch::command::{CommandFetcher, FetchStrategy};
use media_fetch_engine::fetch::traits::Fetcher;

/// Write `body` as a script and return a fetcher running it through `sh`.
fn script_fetcher(dir: &Path, body: &str) -> CommandFetcher {
    let script: PathBuf = dir.join("tool.sh");
    std::fs::write(&script, body).unwrap();
    CommandFetcher::new("sh").with_base_args(vec![script.to_string_lossy().to_string()])
}

// The tool is called as: -f FORMAT -o OUTPUT --no-mtime --no-warnings KEY
const WRITES_OUTPUT: &str = "#!/bin/sh\nprintf video > \"$4\"\n";

#[tokio::test]
async fn test_fetch_writes_expected_name() {
    let tools = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let fetcher = script_fetcher(tools.path(), WRITES_OUTPUT);
    let name = ArtifactName::new(5, "req1", "https://v/1");

    let path = fetcher.fetch("https://v/1", &name, work.path()).await.unwrap();

    assert_eq!(path, name.path_in(work.path(), "mp4"));
    assert!(name.verify(&path));
}

#[tokio::test]
async fn test_fetch_accepts_other_container() {
    let tools = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let body = "#!/bin/sh\nout=\"$4\"\nprintf video > \"${out%.mp4}.webm\"\n";
    let fetcher = script_fetcher(tools.path(), body);
    let name = ArtifactName::new(5, "req2", "https://v/2");

    let path = fetcher.fetch("https://v/2", &name, work.path()).await.unwrap();
    assert_eq!(path, name.path_in(work.path(), "webm"));
}

#[tokio::test]
async fn test_falls_back_to_next_strategy() {
    let tools = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let body = "#!/bin/sh\nif [ \"$2\" = \"first\" ]; then echo nope >&2; exit 1; fi\nprintf video > \"$4\"\n";
    let fetcher = script_fetcher(tools.path(), body).with_strategies(vec![
        FetchStrategy::new("a", "first"),
        FetchStrategy::new("b", "second"),
    ]);
    let name = ArtifactName::new(6, "req3", "https://v/3");

    let path = fetcher.fetch("https://v/3", &name, work.path()).await.unwrap();
    assert!(path.is_file());
}

#[tokio::test]
async fn test_all_strategies_fail() {
    let tools = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let fetcher = script_fetcher(tools.path(), "#!/bin/sh\necho unsupported >&2\nexit 1\n");
    let name = ArtifactName::new(7, "req4", "https://v/4");

    let err = fetcher.fetch("https://v/4", &name, work.path()).await.unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("all fetch strategies failed"));
    assert!(msg.contains("tool exited 1"));
    assert!(msg.contains("unsupported"));
}

#[tokio::test]
async fn test_zero_exit_without_output_is_failure() {
    let tools = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let fetcher = script_fetcher(tools.path(), "#!/bin/sh\nexit 0\n")
        .with_strategies(vec![FetchStrategy::new("only", "best")]);
    let name = ArtifactName::new(8, "req5", "https://v/5");

    let err = fetcher.fetch("https://v/5", &name, work.path()).await.unwrap_err();
    assert!(format!("{:#}", err).contains("no output file"));
}
