use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{Broadcast, LoginSystem, RelayReply, SnapEvent};
use crate::auth::SystemCredentials;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay connection is not open")]
    NotConnected,
    #[error("relay has not acknowledged the system login")]
    NotAuthenticated,
    #[error("could not reach relay: {0}")]
    Connect(String),
    #[error("could not mint system credential: {0}")]
    Credential(String),
    #[error("relay connection dropped before the message was acknowledged")]
    ConnectionLost,
    #[error("relay did not acknowledge within {0:?}")]
    AckTimeout(Duration),
    #[error("could not encode relay message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sends instance lifecycle events to the realtime relay.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Connected and acknowledged as the system actor.
    fn is_ready(&self) -> bool;

    /// Fire-and-forget broadcast.
    async fn broadcast(&self, event: SnapEvent, instance_key: &str) -> Result<(), RelayError>;

    /// Broadcasts and waits for the relay's `{success}` reply.
    async fn broadcast_with_ack(&self, event: SnapEvent, instance_key: &str) -> Result<bool, RelayError>;
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: String,
    pub ack_timeout: Duration,
    pub reconnect_interval: Duration,
}

struct Shared {
    config: RelayConfig,
    credentials: SystemCredentials,
    connected: AtomicBool,
    authenticated: AtomicBool,
    connecting: AtomicBool,
    /// Bumped per connection so a stale reader cannot reset a newer socket.
    generation: AtomicU64,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    pending_acks: Mutex<VecDeque<oneshot::Sender<bool>>>,
    last_attempt: std::sync::Mutex<Option<Instant>>,
}

/// Process-wide control connection to the relay.
///
/// The socket is opened at construction and reopened opportunistically when
/// a broadcast finds it closed; there is no background reconnect loop.
/// Broadcasts never queue: while the socket is closed or the system login
/// is unacknowledged they fail fast.
#[derive(Clone)]
pub struct RelayNotifier {
    shared: Arc<Shared>,
}

impl RelayNotifier {
    /// Builds the notifier and starts the first connection attempt.
    pub fn start(config: RelayConfig, credentials: SystemCredentials) -> Self {
        let notifier = Self {
            shared: Arc::new(Shared {
                config,
                credentials,
                connected: AtomicBool::new(false),
                authenticated: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                outgoing: Mutex::new(None),
                pending_acks: Mutex::new(VecDeque::new()),
                last_attempt: std::sync::Mutex::new(None),
            }),
        };
        notifier.reconnect_in_background();
        notifier
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.authenticated.load(Ordering::SeqCst)
    }

    /// Spawns a connection attempt unless one is running or the last one
    /// was less than `reconnect_interval` ago.
    pub fn reconnect_in_background(&self) {
        if self.is_connected() || !self.claim_attempt_slot() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.connect().await {
                log::warn!("relay connection attempt failed: {}", e);
            }
        });
    }

    fn claim_attempt_slot(&self) -> bool {
        let Ok(mut last) = self.shared.last_attempt.lock() else {
            return false;
        };
        let now = Instant::now();
        if let Some(previous) = *last {
            if now.duration_since(previous) < self.shared.config.reconnect_interval {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    /// Opens the socket and sends the system login. The authenticated flag
    /// is only raised once the relay acknowledges that login.
    pub async fn connect(&self) -> Result<(), RelayError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.shared.connecting.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.open().await;
        self.shared.connecting.store(false, Ordering::SeqCst);
        result
    }

    async fn open(&self) -> Result<(), RelayError> {
        let shared = &self.shared;
        let token = shared
            .credentials
            .mint()
            .map_err(|e| RelayError::Credential(e.to_string()))?;

        let connect = tokio_tungstenite::connect_async(shared.config.url.as_str());
        let (ws_stream, _) = tokio::time::timeout(shared.config.ack_timeout, connect)
            .await
            .map_err(|_| RelayError::Connect("timed out".to_string()))?
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        *shared.outgoing.lock().await = Some(out_tx.clone());
        shared.connected.store(true, Ordering::SeqCst);

        // writer: forward queued frames to the socket
        let writer_notifier = self.clone();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
            writer_notifier.reset(generation).await;
        });

        // reader: track login state and resolve pending acks
        let reader_notifier = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => reader_notifier.on_reply(RelayReply::parse(text.as_str())).await,
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            log::warn!("relay connection closed");
            reader_notifier.reset(generation).await;
        });

        let login = serde_json::to_string(&LoginSystem::new(&token))?;
        out_tx
            .send(login)
            .await
            .map_err(|_| RelayError::ConnectionLost)?;
        log::info!("connected to relay at {}, awaiting login ack", shared.config.url);
        Ok(())
    }

    async fn on_reply(&self, reply: RelayReply) {
        match reply {
            RelayReply::LoginAck(success) => {
                self.shared.authenticated.store(success, Ordering::SeqCst);
                if success {
                    log::info!("relay accepted system login");
                } else {
                    log::error!("relay rejected system login");
                }
            }
            RelayReply::BroadcastAck(success) => {
                let mut pending = self.shared.pending_acks.lock().await;
                // waiters that timed out are still queued; skip past them
                while let Some(waiter) = pending.pop_front() {
                    if !waiter.is_closed() && waiter.send(success).is_ok() {
                        break;
                    }
                }
            }
            RelayReply::Ignored => {}
        }
    }

    async fn reset(&self, generation: u64) {
        let shared = &self.shared;
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        shared.connected.store(false, Ordering::SeqCst);
        shared.authenticated.store(false, Ordering::SeqCst);
        *shared.outgoing.lock().await = None;
        // dropping the senders wakes every waiter with ConnectionLost
        shared.pending_acks.lock().await.clear();
    }

    fn ensure_ready(&self) -> Result<(), RelayError> {
        if !self.is_connected() {
            self.reconnect_in_background();
            return Err(RelayError::NotConnected);
        }
        if !self.is_authenticated() {
            return Err(RelayError::NotAuthenticated);
        }
        Ok(())
    }

    async fn sender(&self) -> Result<mpsc::Sender<String>, RelayError> {
        self.shared
            .outgoing
            .lock()
            .await
            .clone()
            .ok_or(RelayError::NotConnected)
    }
}

#[async_trait]
impl Broadcaster for RelayNotifier {
    fn is_ready(&self) -> bool {
        self.is_connected() && self.is_authenticated()
    }

    async fn broadcast(&self, event: SnapEvent, instance_key: &str) -> Result<(), RelayError> {
        self.ensure_ready()?;
        let text = serde_json::to_string(&Broadcast::new(event, instance_key))?;
        let sender = self.sender().await?;
        sender.send(text).await.map_err(|_| RelayError::ConnectionLost)?;
        log::debug!("broadcast {} for {}", event.as_str(), instance_key);
        Ok(())
    }

    async fn broadcast_with_ack(&self, event: SnapEvent, instance_key: &str) -> Result<bool, RelayError> {
        self.ensure_ready()?;
        let text = serde_json::to_string(&Broadcast::new(event, instance_key))?;

        let sender = self.sender().await?;

        let (ack_tx, ack_rx) = oneshot::channel();
        {
            // hold the queue while sending so acks stay in send order
            let mut pending = self.shared.pending_acks.lock().await;
            pending.push_back(ack_tx);
            if sender.send(text).await.is_err() {
                pending.pop_back();
                return Err(RelayError::ConnectionLost);
            }
        }

        let timeout = self.shared.config.ack_timeout;
        // on timeout `ack_rx` is dropped, which closes this waiter's slot
        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(success)) => Ok(success),
            Ok(Err(_)) => Err(RelayError::ConnectionLost),
            Err(_) => Err(RelayError::AckTimeout(timeout)),
        }
    }
}

/// Stand-in used when no relay is configured; never ready.
pub struct OfflineBroadcaster;

#[async_trait]
impl Broadcaster for OfflineBroadcaster {
    fn is_ready(&self) -> bool {
        false
    }

    async fn broadcast(&self, _event: SnapEvent, _instance_key: &str) -> Result<(), RelayError> {
        Err(RelayError::NotConnected)
    }

    async fn broadcast_with_ack(&self, _event: SnapEvent, _instance_key: &str) -> Result<bool, RelayError> {
        Err(RelayError::NotConnected)
    }
}
