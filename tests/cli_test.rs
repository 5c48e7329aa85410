//! Runs the fetchpool binary end to end, including process isolation

use axum::{Router, routing::get};
use fetchpool::sink::FetchRecord;
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::process::Output;
use tempfile::TempDir;
use tokio::process::Command;

async fn start_mock_server() -> Result<String, Box<dyn std::error::Error>> {
    let app = Router::new().route("/page/{id}", get(|| async { "page" }));

    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Ok(format!("http://{}", bound_addr))
}

/// Config with `batches` batches of `items` URLs each
fn write_config(dir: &Path, base: &str, batches: usize, items: usize) -> std::path::PathBuf {
    let mut toml = String::from("[pool]\nworkers = 5\n\n[output]\nformat = \"json\"\n");
    for b in 0..batches {
        let urls: Vec<String> = (0..items)
            .map(|i| format!("\"{}/page/{}-{}\"", base, b, i))
            .collect();
        toml.push_str(&format!(
            "\n[[batches]]\nname = \"batch-{}\"\nurls = [{}]\n",
            b,
            urls.join(", ")
        ));
    }

    let path = dir.join("fetchpool.toml");
    fs::write(&path, toml).unwrap();
    path
}

async fn fetchpool(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fetchpool"))
        .args(args)
        .env_remove("FETCHPOOL_CONFIG")
        .output()
        .await
        .expect("failed to run fetchpool binary")
}

fn parse_records(output: &Output) -> Vec<FetchRecord> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn per_context(records: &[FetchRecord]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for record in records {
        *counts.entry(record.context.clone()).or_default() += 1;
    }
    counts
}

#[tokio::test]
async fn test_run_with_process_isolation() {
    let base = start_mock_server().await.unwrap();
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), &base, 3, 10);

    let output = fetchpool(&[
        "run",
        "--config",
        config.to_str().unwrap(),
        "--isolation",
        "process",
        "--parallelism",
        "3",
    ])
    .await;

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let records = parse_records(&output);
    assert_eq!(records.len(), 30);
    assert!(records.iter().all(|r| r.status == Some(200)));

    let counts = per_context(&records);
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&n| n == 10));
}

#[tokio::test]
async fn test_run_with_task_isolation() {
    let base = start_mock_server().await.unwrap();
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), &base, 2, 6);

    let output = fetchpool(&[
        "run",
        "--config",
        config.to_str().unwrap(),
        "--isolation",
        "task",
        "--workers",
        "2",
    ])
    .await;

    assert!(output.status.success());

    let counts = per_context(&parse_records(&output));
    assert_eq!(counts.get("ctx-0"), Some(&6));
    assert_eq!(counts.get("ctx-1"), Some(&6));
}

#[tokio::test]
async fn test_context_with_unknown_batch_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), "http://127.0.0.1:9", 1, 1);

    let output = fetchpool(&[
        "context",
        "--config",
        config.to_str().unwrap(),
        "--batch",
        "no-such-batch",
    ])
    .await;

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[tokio::test]
async fn test_invalid_override_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), "http://127.0.0.1:9", 1, 1);

    let output = fetchpool(&["run", "--config", config.to_str().unwrap(), "--workers", "0"]).await;

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("at least one worker"));
}
