//! Channel independence against a local stand-in for the Bot API.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use napy::capture::Capture;
use napy::config::{AppConfig, ChannelSetting, EmailSettings, TelegramSettings};
use napy::notify::{Notifier, RunReport};
use napy::storage::RunId;

type Seen = Arc<Mutex<Vec<(String, Value)>>>;

async fn send_message(
    State(seen): State<Seen>,
    Path(bot): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    seen.lock().unwrap().push((bot, body));
    Json(json!({ "ok": true, "result": { "message_id": 1 } }))
}

async fn reject(Json(_body): Json<Value>) -> (axum::http::StatusCode, Json<Value>) {
    (
        axum::http::StatusCode::UNAUTHORIZED,
        Json(json!({ "ok": false, "error_code": 401, "description": "Unauthorized" })),
    )
}

/// Serve a fake Bot API on an ephemeral port and return its base URL.
async fn fake_bot_api(seen: Seen) -> String {
    let app = Router::new()
        .route("/{bot}/sendMessage", post(send_message))
        .route("/rejected/{bot}/sendMessage", post(reject))
        .with_state(seen);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn unreachable_email() -> EmailSettings {
    EmailSettings {
        // Nothing listens on port 1, so the connection is refused at once.
        smtp_host: "127.0.0.1".into(),
        smtp_port: 1,
        smtp_user: "user".into(),
        smtp_pass: "pass".into(),
        sender: "napy@example.com".into(),
        recipient: "ops@example.com".into(),
    }
}

fn report<'a>(out: &'a Capture, err: &'a Capture) -> RunReport<'a> {
    let now = Utc::now();
    RunReport {
        run_id: Some(RunId(7)),
        command: "make test",
        shell: "/bin/sh",
        started_at: now,
        finished_at: now,
        exit_code: 2,
        stdout: out,
        stderr: err,
    }
}

#[tokio::test]
async fn test_chat_delivered_when_email_fails() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let base = fake_bot_api(seen.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::with_base_dir(dir.path());
    cfg.telegram = ChannelSetting::Enabled(TelegramSettings {
        api_key: "123:token".into(),
        chat_id: "4242".into(),
        api_base: base,
    });
    cfg.email = ChannelSetting::Enabled(unreachable_email());

    let notifier = Notifier::from_config(&cfg);
    assert_eq!(notifier.channel_count(), 2);

    let out = Capture::from_text("\x1b[32mok\x1b[0m 3 passed", 1024);
    let err = Capture::from_text("1 failed", 1024);
    let result = notifier.notify(&report(&out, &err)).await;

    assert_eq!(result.delivered().collect::<Vec<_>>(), vec!["telegram"]);
    let failed: Vec<_> = result.failed().map(|(name, _)| name).collect();
    assert_eq!(failed, vec!["email"]);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (bot, body) = &seen[0];
    assert_eq!(bot, "bot123:token");
    assert_eq!(body["chat_id"], "4242");
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("Command: make test"));
    assert!(text.contains("failed with exit code 2"));
    assert!(text.contains("ok 3 passed"));
    assert!(!text.contains('\x1b'));
    assert!(text.contains("1 failed"));
}

#[tokio::test]
async fn test_rejected_chat_message_is_reported() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let base = fake_bot_api(seen.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::with_base_dir(dir.path());
    cfg.telegram = ChannelSetting::Enabled(TelegramSettings {
        api_key: "bad".into(),
        chat_id: "1".into(),
        api_base: format!("{base}/rejected"),
    });

    let out = Capture::default();
    let result = Notifier::from_config(&cfg).notify(&report(&out, &out)).await;

    let (name, error) = result.failed().next().unwrap();
    assert_eq!(name, "telegram");
    assert!(error.to_string().contains("Unauthorized"));
}

#[tokio::test]
async fn test_unreachable_chat_api_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::with_base_dir(dir.path());
    cfg.telegram = ChannelSetting::Enabled(TelegramSettings {
        api_key: "123:token".into(),
        chat_id: "1".into(),
        api_base: "http://127.0.0.1:1".into(),
    });

    let out = Capture::default();
    let result = Notifier::from_config(&cfg).notify(&report(&out, &out)).await;
    assert_eq!(result.deliveries.len(), 1);
    assert!(result.deliveries[0].result.is_err());
}
