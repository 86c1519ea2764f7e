//! Runs the `checkmate` binary against a filesystem bucket and a SQLite
//! warehouse in a temp directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use base64::Engine;
use checkmate::warehouse::sqlite::SqliteWarehouse;
use checkmate::warehouse::{TableRef, Warehouse};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn checkmate_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_checkmate"))
}

fn write_config(root: &Path, base_url: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[storage]
backend = "fs"
root = "{root}/bucket"

[warehouse]
path = "{root}/data/warehouse.sqlite"
dataset = "chess_raw"

[api]
base_url = "{base_url}"
user_agent = "checkmate-cli-test"

[retry]
max_retries = 2
base_delay_ms = 1
max_delay_ms = 5
jitter_ms = 0

[run]
app_env = "PROD"
script_setting = "manual"
manual_start_date = "2024-01-15"
manual_end_date = "2024-02-10"
date_endpoint = "2024/01"
"#,
        root = root.display(),
        base_url = base_url,
    );

    let config_path = config_dir.join("checkmate.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "https://api.chess.com/pub");
    (tmp, config_path)
}

fn game(id: i64) -> serde_json::Value {
    serde_json::json!({
        "url": format!("https://www.chess.com/game/live/{}", id),
        "end_time": 1704412800,
        "time_control": "600",
        "rated": true,
        "time_class": "rapid",
        "rules": "chess",
        "white": {"uuid": "w", "username": "alice", "rating": 2800, "result": "win"},
        "black": {"uuid": "b", "username": "bob", "rating": 2790, "result": "timeout"},
        "eco": "https://www.chess.com/openings/Ruy-Lopez-Opening"
    })
}

fn seed_artifact(root: &Path, key: &str, content: &str) -> PathBuf {
    let file = root.join("bucket").join(key);
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(&file, content).unwrap();
    file
}

fn run_checkmate(config_path: &Path, args: &[&str], message: Option<&str>) -> (String, String, bool) {
    let binary = checkmate_binary();
    let mut cmd = Command::new(&binary);
    cmd.arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("MESSAGE")
        .env("RUST_LOG", "warn");
    if let Some(message) = message {
        cmd.env("MESSAGE", message);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run checkmate binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_warehouse() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_checkmate(&config_path, &["init"], None);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(stdout.contains("chess_raw.games"));
    assert!(stdout.contains("chess_raw.loading_completed"));
    assert!(tmp.path().join("data/warehouse.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_checkmate(&config_path, &["init"], None);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_checkmate(&config_path, &["init"], None);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_load_commits_and_purges_then_is_idempotent() {
    let (tmp, config_path) = setup_test_env();
    let games = serde_json::json!({"games": [game(101), game(102)]}).to_string();
    let shared = serde_json::json!({"games": [game(102)]}).to_string();
    seed_artifact(tmp.path(), "player/alice/games/2024/01", &games);
    seed_artifact(tmp.path(), "player/bob/games/2024/01", &shared);
    let empty = seed_artifact(tmp.path(), "player/carol/games/2024/01", r#"{"games": []}"#);

    let (stdout, stderr, success) = run_checkmate(&config_path, &["load"], None);
    assert!(success, "load failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("processed: 3"), "stdout={}", stdout);
    assert!(stdout.contains("duplicates removed: 1"));
    assert!(stdout.contains("new records: 2"));
    assert!(stdout.contains("artifacts deleted: 1"));
    assert!(stdout.contains("ok"));
    assert!(!empty.exists());

    let (stdout, stderr, success) = run_checkmate(&config_path, &["load"], None);
    assert!(success, "second load failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("processed: 0"));
    assert!(stdout.contains("new records: 0"));
}

#[test]
fn test_message_switches_to_dry_run() {
    let (tmp, config_path) = setup_test_env();
    let empty = seed_artifact(tmp.path(), "player/carol/games/2024/01", r#"{"games": []}"#);

    let message = base64::engine::general_purpose::STANDARD.encode(
        r#"{"app_env": "TEST", "test_volume": 5, "date_endpoint": "2024/01"}"#,
    );
    let (stdout, stderr, success) = run_checkmate(&config_path, &["load"], Some(&message));
    assert!(success, "load failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(TEST)"));
    assert!(stdout.contains("dry run"));
    assert!(empty.exists());
}

#[test]
fn test_invalid_message_fails_fast() {
    let (_tmp, config_path) = setup_test_env();
    let message = base64::engine::general_purpose::STANDARD.encode(r#"{"app_env": "STAGING"}"#);
    let (_, _, success) = run_checkmate(&config_path, &["load"], Some(&message));
    assert!(!success);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_checkmate(&tmp.path().join("nope.toml"), &["init"], None);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_plan_lists_remaining_archives() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/leaderboards"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"daily": [{"username": "Alice"}, {"username": "bob"}]}"#,
        ))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), &server.uri());
    seed_artifact(tmp.path(), "player/bob/games/2024/01", r#"{"games": []}"#);

    let (stdout, stderr, success) = run_checkmate(&config_path, &["plan"], None);
    assert!(success, "plan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("player/alice/games/2024/01"));
    assert!(!stdout.contains("player/bob/games/2024/01\n"));
    assert!(stdout.contains("1 remaining of 2 planned"));
    assert!(stdout.contains("ok"));
}

#[tokio::test]
async fn test_startup_failure_is_recorded_by_monitor() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("secrets")).unwrap();
    let config_path = root.join("checkmate.toml");
    fs::write(
        &config_path,
        format!(
            r#"[storage]
backend = "s3"
bucket = "chess-api"
endpoint_url = "http://127.0.0.1:9"

[warehouse]
path = "{root}/data/warehouse.sqlite"
dataset = "chess_raw"

[secrets]
provider = "file"
dir = "{root}/secrets"

[monitor]
enabled = true

[run]
app_env = "PROD"
"#,
            root = root.display()
        ),
    )
    .unwrap();

    // The storage credentials are missing, so building the run fails.
    let (_, stderr, success) = run_checkmate(&config_path, &["load"], None);
    assert!(!success);
    assert!(stderr.contains("storage-access-key-id"), "stderr={}", stderr);

    let warehouse = SqliteWarehouse::open(&root.join("data/warehouse.sqlite"))
        .await
        .unwrap();
    let triggers = warehouse
        .distinct_values(&TableRef::new("run_monitor", "run_triggers"), "run_id")
        .await
        .unwrap();
    let failures = warehouse
        .distinct_values(&TableRef::new("run_monitor", "run_failures"), "run_id")
        .await
        .unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(failures, triggers);
    warehouse.close().await;
}
