pub mod notifier;
pub mod protocol;

pub use notifier::{Broadcaster, OfflineBroadcaster, RelayConfig, RelayError, RelayNotifier};
pub use protocol::SnapEvent;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{Broadcaster, RelayError, SnapEvent};

    /// Records broadcasts instead of sending them.
    pub(crate) struct RecordingBroadcaster {
        ready: AtomicBool,
        ack: AtomicBool,
        sent: Mutex<Vec<(SnapEvent, String)>>,
    }

    impl RecordingBroadcaster {
        pub(crate) fn ready() -> Self {
            Self {
                ready: AtomicBool::new(true),
                ack: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn offline() -> Self {
            let broadcaster = Self::ready();
            broadcaster.ready.store(false, Ordering::SeqCst);
            broadcaster
        }

        pub(crate) fn reject_acks(&self) {
            self.ack.store(false, Ordering::SeqCst);
        }

        pub(crate) fn sent(&self) -> Vec<(SnapEvent, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn broadcast(&self, event: SnapEvent, instance_key: &str) -> Result<(), RelayError> {
            if !self.is_ready() {
                return Err(RelayError::NotConnected);
            }
            self.sent.lock().unwrap().push((event, instance_key.to_string()));
            Ok(())
        }

        async fn broadcast_with_ack(&self, event: SnapEvent, instance_key: &str) -> Result<bool, RelayError> {
            self.broadcast(event, instance_key).await?;
            Ok(self.ack.load(Ordering::SeqCst))
        }
    }
}
