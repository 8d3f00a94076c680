use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use syncsnap::auth::{jwt, SystemCredentials};
use syncsnap::realtime::{Broadcaster, RelayConfig, RelayError, RelayNotifier, SnapEvent};

const SECRET: &str = "relay_integration_secret";

#[derive(Clone, Copy)]
struct Relay {
    accept_login: bool,
    /// Reply to SEND_SNAP; `None` never answers.
    ack: Option<bool>,
    /// Leading SEND_SNAP frames left unanswered before `ack` applies.
    silent_sends: usize,
    close_after_login: bool,
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            accept_login: true,
            ack: Some(true),
            silent_sends: 0,
            close_after_login: false,
        }
    }
}

/// Serves one relay connection and forwards every frame it receives.
async fn spawn_relay(relay: Relay) -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut silent_sends = relay.silent_sends;
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            let action = frame["action"].as_str().unwrap_or_default().to_string();
            let _ = tx.send(frame);

            match action.as_str() {
                "LOGIN_SYSTEM" => {
                    let reply = json!({ "action": "LOGIN_SYSTEM", "success": relay.accept_login });
                    ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                    if relay.close_after_login {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
                "SEND_SNAP" => {
                    if silent_sends > 0 {
                        silent_sends -= 1;
                        continue;
                    }
                    if let Some(ack) = relay.ack {
                        let reply = json!({ "success": ack });
                        ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                    }
                }
                _ => {}
            }
        }
    });

    (url, rx)
}

fn notifier(url: String) -> RelayNotifier {
    RelayNotifier::start(
        RelayConfig {
            url,
            ack_timeout: Duration::from_millis(300),
            // one attempt per test
            reconnect_interval: Duration::from_secs(60),
        },
        SystemCredentials::new(SECRET, 60),
    )
}

async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn login_ack_makes_the_notifier_ready() {
    let (url, mut frames) = spawn_relay(Relay::default()).await;
    let notifier = notifier(url);

    assert!(eventually(|| notifier.is_ready()).await);

    let login = frames.recv().await.unwrap();
    assert_eq!(login["action"], "LOGIN_SYSTEM");
    assert!(login["deviceUuid"].is_null());
    assert!(login["data"].is_null());
    let claims = jwt::verify_token(login["token"].as_str().unwrap(), SECRET).unwrap();
    assert_eq!(claims.role.as_deref(), Some("system"));
}

#[tokio::test]
async fn send_snap_waits_for_the_relay_ack() {
    let (url, mut frames) = spawn_relay(Relay::default()).await;
    let notifier = notifier(url);
    assert!(eventually(|| notifier.is_ready()).await);
    frames.recv().await.unwrap();

    let acked = notifier
        .broadcast_with_ack(SnapEvent::SendSnap, "ABC123")
        .await
        .unwrap();
    assert!(acked);
    let sent = frames.recv().await.unwrap();
    assert_eq!(sent, json!({ "action": "SEND_SNAP", "data": { "key": "ABC123" } }));

    notifier
        .broadcast(SnapEvent::PublishSnap, "ABC123")
        .await
        .unwrap();
    assert_eq!(frames.recv().await.unwrap()["action"], "PUBLISH_SNAP");
}

#[tokio::test]
async fn negative_ack_is_reported() {
    let (url, _frames) = spawn_relay(Relay {
        ack: Some(false),
        ..Relay::default()
    })
    .await;
    let notifier = notifier(url);
    assert!(eventually(|| notifier.is_ready()).await);

    let acked = notifier
        .broadcast_with_ack(SnapEvent::SendSnap, "ABC123")
        .await
        .unwrap();
    assert!(!acked);
}

#[tokio::test]
async fn silent_relay_times_out() {
    let (url, _frames) = spawn_relay(Relay {
        ack: None,
        ..Relay::default()
    })
    .await;
    let notifier = notifier(url);
    assert!(eventually(|| notifier.is_ready()).await);

    let result = notifier.broadcast_with_ack(SnapEvent::SendSnap, "ABC123").await;
    assert!(matches!(result, Err(RelayError::AckTimeout(_))));
}

#[tokio::test]
async fn one_missed_ack_does_not_shift_later_acks() {
    let (url, _frames) = spawn_relay(Relay {
        silent_sends: 1,
        ..Relay::default()
    })
    .await;
    let notifier = notifier(url);
    assert!(eventually(|| notifier.is_ready()).await);

    let first = notifier.broadcast_with_ack(SnapEvent::SendSnap, "FIRST").await;
    assert!(matches!(first, Err(RelayError::AckTimeout(_))));

    for key in ["SECOND", "THIRD", "FOURTH"] {
        let acked = notifier
            .broadcast_with_ack(SnapEvent::SendSnap, key)
            .await
            .unwrap();
        assert!(acked, "{key} should be acknowledged");
    }
}

#[tokio::test]
async fn rejected_login_never_becomes_ready() {
    let (url, mut frames) = spawn_relay(Relay {
        accept_login: false,
        ..Relay::default()
    })
    .await;
    let notifier = notifier(url);
    assert!(eventually(|| notifier.is_connected()).await);
    frames.recv().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!notifier.is_ready());
    let result = notifier.broadcast(SnapEvent::ErrorSnap, "ABC123").await;
    assert!(matches!(result, Err(RelayError::NotAuthenticated)));
}

#[tokio::test]
async fn closed_socket_resets_connection_state() {
    let (url, mut frames) = spawn_relay(Relay {
        close_after_login: true,
        ..Relay::default()
    })
    .await;
    let notifier = notifier(url);
    frames.recv().await.unwrap();

    assert!(eventually(|| !notifier.is_connected() && !notifier.is_authenticated()).await);
    let result = notifier.broadcast(SnapEvent::SendSnap, "ABC123").await;
    assert!(matches!(result, Err(RelayError::NotConnected)));
}

#[tokio::test]
async fn unreachable_relay_fails_fast() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let notifier = notifier(url);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!notifier.is_ready());
    let result = notifier.broadcast(SnapEvent::SendSnap, "ABC123").await;
    assert!(matches!(result, Err(RelayError::NotConnected)));
}
