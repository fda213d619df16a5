use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use panelcast_core::{Config, ServerHandle, server};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> ServerHandle {
    let mut config = Config::default();
    config.server.bind = "127.0.0.1:0".to_string();
    config.dispatch.busy_backoff_ms = 20;
    config.dispatch.error_backoff_ms = 20;
    config.dispatch.send_timeout_ms = 500;
    server::start(&config).await.unwrap()
}

async fn health(addr: SocketAddr) -> Value {
    reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Connect and wait until the relay has registered the subscriber.
async fn subscribe(addr: SocketAddr, channel: &str) -> Client {
    let before = health(addr).await["connections"][channel].as_u64().unwrap_or(0);
    let (client, _) = connect_async(format!("ws://{}/ws/{}", addr, channel))
        .await
        .unwrap();

    for _ in 0..100 {
        let now = health(addr).await["connections"][channel].as_u64().unwrap_or(0);
        if now > before {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} subscriber never registered", channel);
}

async fn post_message(addr: SocketAddr, text: &str, channel: &str) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(format!("http://{}/messages", addr))
        .json(&json!({ "text": text, "channel": channel }))
        .send()
        .await
        .unwrap()
        .status()
}

/// Next text frame as JSON, or `None` if nothing arrives within `wait`.
async fn next_payload(client: &mut Client, wait: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let message = tokio::time::timeout_at(deadline, client.next()).await.ok()??;
        match message.unwrap() {
            Message::Text(text) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

async fn report_speaking(client: &mut Client, channel: &str, speaking: bool) {
    let update = json!({ "type": "speaking_state", channel: speaking });
    client
        .send(Message::Text(update.to_string().into()))
        .await
        .unwrap();
}

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(300);

#[tokio::test]
async fn invalid_channel_is_closed_with_4000() {
    let handle = start_server().await;
    let (mut client, _) = connect_async(format!("ws://{}/ws/backstage", handle.local_addr()))
        .await
        .unwrap();

    let frame = loop {
        match tokio::time::timeout(WAIT, client.next()).await.unwrap() {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected close frame, got {:?}", other),
        }
    };
    let frame = frame.unwrap();
    assert_eq!(u16::from(frame.code), 4000);
    assert_eq!(frame.reason.as_str(), "invalid channel");

    let body = health(handle.local_addr()).await;
    assert_eq!(body["connections"]["left"], 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn message_reaches_only_its_channel() {
    let handle = start_server().await;
    let addr = handle.local_addr();
    let mut left = subscribe(addr, "left").await;
    let mut right = subscribe(addr, "right").await;

    assert_eq!(post_message(addr, "Host: Welcome", "left").await, 202);

    let payload = next_payload(&mut left, WAIT).await.unwrap();
    assert_eq!(payload, json!({ "text": "Welcome", "session": "left" }));
    assert!(next_payload(&mut right, QUIET).await.is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn second_message_waits_for_speaker_to_finish() {
    let handle = start_server().await;
    let addr = handle.local_addr();
    let mut left = subscribe(addr, "left").await;
    let mut right = subscribe(addr, "right").await;

    post_message(addr, "A", "left").await;
    post_message(addr, "B", "right").await;

    assert_eq!(next_payload(&mut left, WAIT).await.unwrap()["text"], "A");
    assert!(next_payload(&mut right, QUIET).await.is_none());

    let body = health(addr).await;
    assert_eq!(body["speaking"]["left"], true);
    assert_eq!(body["drained"], false);

    report_speaking(&mut left, "left", false).await;
    let payload = next_payload(&mut right, WAIT).await.unwrap();
    assert_eq!(payload, json!({ "text": "B", "session": "right" }));

    handle.shutdown().await;
}

#[tokio::test]
async fn messages_are_delivered_in_arrival_order() {
    let handle = start_server().await;
    let addr = handle.local_addr();
    let mut audience = subscribe(addr, "audience").await;

    for text in ["first", "second", "third"] {
        post_message(addr, text, "audience").await;
    }

    for expected in ["first", "second", "third"] {
        let payload = next_payload(&mut audience, WAIT).await.unwrap();
        assert_eq!(payload["text"], expected);
        report_speaking(&mut audience, "audience", false).await;
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn message_for_empty_channel_is_dropped() {
    let handle = start_server().await;
    let addr = handle.local_addr();
    let mut left = subscribe(addr, "left").await;

    post_message(addr, "nobody listens", "right").await;
    post_message(addr, "after the drop", "left").await;

    let payload = next_payload(&mut left, WAIT).await.unwrap();
    assert_eq!(payload["text"], "after the drop");

    let body = health(addr).await;
    assert_eq!(body["speaking"]["right"], false);
    handle.shutdown().await;
}

#[tokio::test]
async fn subscriber_frames_are_queued_on_their_own_channel() {
    let handle = start_server().await;
    let addr = handle.local_addr();
    let mut right = subscribe(addr, "right").await;

    right
        .send(Message::Text("Host: from the guest side".into()))
        .await
        .unwrap();
    let payload = next_payload(&mut right, WAIT).await.unwrap();
    assert_eq!(
        payload,
        json!({ "text": "from the guest side", "session": "right" })
    );

    report_speaking(&mut right, "right", false).await;
    right
        .send(Message::Text(r#"{"text":"structured"}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_payload(&mut right, WAIT).await.unwrap()["text"], "structured");

    handle.shutdown().await;
}

#[tokio::test]
async fn dispatcher_follows_subscriber_presence() {
    let handle = start_server().await;
    let addr = handle.local_addr();
    assert!(!handle.relay().dispatcher_running());

    let mut left = subscribe(addr, "left").await;
    assert!(handle.relay().dispatcher_running());

    left.close(None).await.unwrap();
    for _ in 0..100 {
        if !handle.relay().dispatcher_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!handle.relay().dispatcher_running());

    // Queued while idle, delivered once someone subscribes again.
    post_message(addr, "held", "left").await;
    let mut left = subscribe(addr, "left").await;
    assert_eq!(next_payload(&mut left, WAIT).await.unwrap()["text"], "held");

    handle.shutdown().await;
}

#[tokio::test]
async fn admin_rejects_unknown_channel_and_missing_script() {
    let handle = start_server().await;
    let addr = handle.local_addr();

    assert_eq!(post_message(addr, "hello", "backstage").await, 400);

    let client = reqwest::Client::new();
    let start = client
        .post(format!("http://{}/conversation/start", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(start.status(), 400);

    let stop: Value = client
        .post(format!("http://{}/conversation/stop", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stop, json!({ "stopped": false }));

    handle.shutdown().await;
}

#[tokio::test]
async fn enqueue_after_shutdown_is_refused() {
    let handle = start_server().await;
    let relay = handle.relay().clone();
    handle.shutdown().await;

    assert!(relay.enqueue("late", panelcast_core::Channel::Left).is_err());
}
