use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::rooms::{ClientId, TransferAnnouncement};

const CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub struct TransferEnvelope {
    pub from: ClientId,
    pub announcement: TransferAnnouncement,
}

/// Ephemeral per-room pub/sub for transfer announcements.
///
/// Delivery is at-most-once: whoever is not subscribed at publish time never
/// sees the message, and the publisher is not told either way.
#[derive(Clone, Default)]
pub struct TransferChannel {
    topics: Arc<DashMap<Uuid, broadcast::Sender<TransferEnvelope>>>,
}

pub struct TransferSubscription {
    me: ClientId,
    rx: broadcast::Receiver<TransferEnvelope>,
}

impl TransferChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, room_id: Uuid, me: ClientId) -> TransferSubscription {
        let rx = self
            .topics
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        TransferSubscription { me, rx }
    }

    pub fn publish(&self, room_id: Uuid, from: ClientId, announcement: TransferAnnouncement) {
        let Some(tx) = self.topics.get(&room_id) else {
            debug!(%room_id, "transfer published with nobody listening");
            return;
        };
        let reached = tx.send(TransferEnvelope { from, announcement }).unwrap_or(0);
        debug!(%room_id, reached, "transfer published");
    }

    pub fn close(&self, room_id: Uuid) {
        self.topics.remove(&room_id);
    }

    pub fn prune(&self) -> usize {
        let before = self.topics.len();
        self.topics.retain(|_, tx| tx.receiver_count() > 0);
        before - self.topics.len()
    }
}

impl TransferSubscription {
    /// Next announcement from the peer. `None` once the channel is torn down.
    pub async fn recv(&mut self) -> Option<TransferAnnouncement> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if envelope.from == self.me => continue,
                Ok(envelope) => return Some(envelope.announcement),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "transfer subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<TransferAnnouncement> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if envelope.from == self.me => continue,
                Ok(envelope) => return Some(envelope.announcement),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
