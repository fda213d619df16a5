use std::time::Duration;

use futures::{SinkExt, StreamExt};
use panelcast_core::{Config, server};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const SCRIPT: &str = r#"
title = "Energy Talk"
opening = "Host: Welcome to the panel."

[[topics]]
name = "Growth"
[[topics.lines]]
speaker = "host"
text = "How was the year?"
[[topics.lines]]
speaker = "guest"
text = "Busy and good."

[[topics]]
name = "Vision"
[[topics.lines]]
speaker = "guest"
text = "We are expanding."
"#;

/// A viewer that reports every delivered line as finished and returns
/// the texts it saw, stopping after `count` lines. Nothing is reported
/// finished until `release` turns true.
fn spawn_viewer(
    url: String,
    channel: &'static str,
    count: usize,
    mut release: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let (mut client, _) = connect_async(url).await.unwrap();
        let mut seen = Vec::new();
        while seen.len() < count {
            let Some(Ok(message)) = client.next().await else {
                break;
            };
            if let Message::Text(text) = message {
                let payload: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(payload["session"], channel);
                seen.push(payload["text"].as_str().unwrap().to_string());
                release.wait_for(|released| *released).await.unwrap();
                let done = json!({ "type": "speaking_state", channel: false });
                client
                    .send(Message::Text(done.to_string().into()))
                    .await
                    .unwrap();
            }
        }
        seen
    })
}

#[tokio::test]
async fn scripted_conversation_plays_across_channels() {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("script.toml");
    let submissions_path = dir.path().join("submissions.json");
    std::fs::write(&script_path, SCRIPT).unwrap();

    let mut config = Config::default();
    config.server.bind = "127.0.0.1:0".to_string();
    config.dispatch.busy_backoff_ms = 20;
    config.conversation.script_path = Some(script_path);
    config.audience.submissions_path = submissions_path.clone();
    config.audience.clear_on_start = true;

    let handle = server::start(&config).await.unwrap();
    let addr = handle.local_addr();

    let (release, released) = watch::channel(false);
    let left = spawn_viewer(format!("ws://{}/ws/left", addr), "left", 2, released.clone());
    let right = spawn_viewer(format!("ws://{}/ws/right", addr), "right", 2, released);
    for _ in 0..100 {
        if handle.relay().registry().counts().values().sum::<usize>() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let client = reqwest::Client::new();
    let started = client
        .post(format!("http://{}/conversation/start", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(started.status(), 200);

    let again = client
        .post(format!("http://{}/conversation/start", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);
    release.send_replace(true);

    let left = tokio::time::timeout(Duration::from_secs(5), left).await.unwrap().unwrap();
    let right = tokio::time::timeout(Duration::from_secs(5), right).await.unwrap().unwrap();
    assert_eq!(left, vec!["Welcome to the panel.", "How was the year?"]);
    assert_eq!(right, vec!["Busy and good.", "We are expanding."]);

    assert_eq!(std::fs::read_to_string(&submissions_path).unwrap().trim(), "[]");
    handle.shutdown().await;
}
