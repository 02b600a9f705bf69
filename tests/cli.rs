//! Tests for the `rag` binary.
//!
//! Each test writes a config into a fresh temp directory and points both
//! model providers at a small Ollama-compatible mock served from a
//! background thread, so ingestion and chat run end to end offline.

mod common;

use axum::{
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rag"))
}

// ============ Mock Ollama ============

async fn mock_embed(Json(body): Json<Value>) -> Json<Value> {
    let embeddings: Vec<Vec<f32>> = body["input"]
        .as_array()
        .map(|inputs| {
            inputs
                .iter()
                .map(|t| common::keyword_vector(t.as_str().unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();
    Json(json!({ "embeddings": embeddings }))
}

async fn mock_chat(Json(body): Json<Value>) -> Response {
    let question = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();
    let answer = format!("Mock answer to: {}", question);

    if body["stream"].as_bool().unwrap_or(false) {
        let mut lines = String::new();
        for word in answer.split_inclusive(' ') {
            lines.push_str(&json!({ "message": { "content": word }, "done": false }).to_string());
            lines.push('\n');
        }
        lines.push_str(&json!({ "message": { "content": "" }, "done": true }).to_string());
        lines.push('\n');
        return ([(header::CONTENT_TYPE, "application/x-ndjson")], lines).into_response();
    }

    Json(json!({
        "message": { "role": "assistant", "content": answer },
        "done": true
    }))
    .into_response()
}

fn start_mock_ollama() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let app = Router::new()
                .route("/api/embed", post(mock_embed))
                .route("/api/chat", post(mock_chat));
            axum::serve(listener, app).await.unwrap();
        });
    });

    format!("http://{}", addr)
}

// ============ Harness ============

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let mock = start_mock_ollama();

    fs::create_dir_all(root.join("config")).unwrap();
    let docs = root.join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("refunds.txt"), common::REFUND_DOC).unwrap();
    fs::write(
        docs.join("warranty.md"),
        "# Warranty\n\nEvery device carries a two-year warranty.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/rag.sqlite"

[embedding]
provider = "ollama"
model = "mock-embed"
url = "{mock}"
dims = 5
max_retries = 0

[llm]
provider = "ollama"
model = "mock-chat"
url = "{mock}"
max_retries = 0

[memory]
backend = "file"
dir = "{root}/data/history"
"#,
        root = root.display(),
        mock = mock
    );

    let config_path = root.join("config").join("rag.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_rag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn docs_dir(config_path: &Path) -> String {
    config_path
        .parent()
        .and_then(|p| p.parent())
        .unwrap()
        .join("docs")
        .display()
        .to_string()
}

// ============ Tests ============

#[test]
fn test_init_is_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rag(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data").join("rag.sqlite").exists());

    let (_, stderr, success) = run_rag(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_files_empty_index() {
    let (_tmp, config_path) = setup_test_env();
    run_rag(&config_path, &["init"]);

    let (stdout, _, success) = run_rag(&config_path, &["files"]);
    assert!(success);
    assert!(stdout.contains("No files indexed."));
}

#[test]
fn test_ingest_directory_and_list() {
    let (_tmp, config_path) = setup_test_env();
    let docs = docs_dir(&config_path);

    let (stdout, stderr, success) = run_rag(&config_path, &["ingest", &docs]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 ingested, 0 failed, 0 skipped"), "{}", stdout);

    let (stdout, _, success) = run_rag(&config_path, &["files"]);
    assert!(success);
    assert!(stdout.contains("refunds.txt"));
    assert!(stdout.contains("warranty.md"));
}

#[test]
fn test_reingest_reports_replacement() {
    let (_tmp, config_path) = setup_test_env();
    let docs = docs_dir(&config_path);
    let file = format!("{}/refunds.txt", docs);

    let (stdout, _, success) = run_rag(&config_path, &["ingest", &file]);
    assert!(success);
    assert!(!stdout.contains("(replaced)"));

    let (stdout, _, success) = run_rag(&config_path, &["ingest", &file]);
    assert!(success);
    assert!(stdout.contains("(replaced)"), "{}", stdout);

    let (stdout, _, _) = run_rag(&config_path, &["files"]);
    assert_eq!(stdout.lines().filter(|l| l.contains("refunds.txt")).count(), 1);
}

#[test]
fn test_delete_by_fingerprint() {
    let (_tmp, config_path) = setup_test_env();
    let file = format!("{}/refunds.txt", docs_dir(&config_path));
    run_rag(&config_path, &["ingest", &file]);

    let (stdout, _, _) = run_rag(&config_path, &["files"]);
    let fingerprint = stdout
        .lines()
        .find(|l| l.contains("refunds.txt"))
        .and_then(|l| l.split_whitespace().next())
        .unwrap()
        .to_string();
    assert_eq!(fingerprint.len(), 64);

    let (stdout, _, success) = run_rag(&config_path, &["delete", &fingerprint]);
    assert!(success);
    assert!(stdout.contains("Deleted"));

    let (stdout, _, _) = run_rag(&config_path, &["files"]);
    assert!(stdout.contains("No files indexed."));

    let (_, stderr, success) = run_rag(&config_path, &["delete", &fingerprint]);
    assert!(!success);
    assert!(stderr.contains("no file with fingerprint"));
}

#[test]
fn test_chat_prints_answer_and_sources() {
    let (_tmp, config_path) = setup_test_env();
    run_rag(&config_path, &["ingest", &docs_dir(&config_path)]);

    let (stdout, stderr, success) = run_rag(
        &config_path,
        &["chat", "What is the refund policy?", "--session", "s1"],
    );
    assert!(success, "chat failed: {}", stderr);
    assert!(stdout.contains("Mock answer to: What is the refund policy?"), "{}", stdout);
    assert!(stdout.contains("Sources:"));
    assert!(stdout.contains("[1] refunds.txt"));
}

#[test]
fn test_chat_stream_and_history_across_invocations() {
    let (tmp, config_path) = setup_test_env();
    run_rag(&config_path, &["ingest", &docs_dir(&config_path)]);

    let (stdout, stderr, success) = run_rag(
        &config_path,
        &["chat", "What is the refund policy?", "--session", "s1", "--stream"],
    );
    assert!(success, "stream chat failed: {}", stderr);
    assert!(stdout.contains("Mock answer to: What is the refund policy?"));
    assert!(tmp.path().join("data").join("history").read_dir().unwrap().count() >= 1);

    // The follow-up is rewritten using the persisted first exchange.
    let (stdout, _, success) = run_rag(
        &config_path,
        &["chat", "And for international orders?", "--session", "s1"],
    );
    assert!(success);
    assert!(stdout.contains("(searched for: "), "{}", stdout);
}

#[test]
fn test_ingest_reports_broken_file() {
    let (tmp, config_path) = setup_test_env();
    let broken = tmp.path().join("docs").join("broken.docx");
    fs::write(&broken, b"not a zip archive").unwrap();

    let (stdout, stderr, success) = run_rag(&config_path, &["ingest", &docs_dir(&config_path)]);
    assert!(!success);
    assert!(stdout.contains("FAILED"), "{}", stdout);
    assert!(stdout.contains("load_error"));
    assert!(stdout.contains("2 ingested, 1 failed"));
    assert!(stderr.contains("failed to ingest"));
}

#[test]
fn test_missing_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_rag(&tmp.path().join("absent.toml"), &["files"]);
    assert!(!success);
    assert!(stderr.contains("failed to read config file"));
}
