use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::rooms::Room;

const FEED_CAPACITY: usize = 16;

/// Live, ordered stream of full room snapshots, one topic per room.
/// Not replayable: a subscriber only sees mutations published after it attached.
#[derive(Clone, Default)]
pub struct ChangeFeed {
    topics: Arc<DashMap<Uuid, broadcast::Sender<Room>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Snapshot(Room),
    /// The subscriber fell behind and `n` snapshots were dropped; refetch.
    Lagged(u64),
    /// The room was deleted, or the feed shut down.
    Ended,
}

pub struct FeedSubscription {
    rx: broadcast::Receiver<Room>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, room_id: Uuid) -> FeedSubscription {
        let rx = self
            .topics
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe();
        FeedSubscription { rx }
    }

    /// Returns how many subscribers the snapshot reached.
    pub fn publish(&self, room: &Room) -> usize {
        let Some(tx) = self.topics.get(&room.id) else {
            return 0;
        };
        tx.send(room.clone()).unwrap_or(0)
    }

    /// Drops the topic; subscribers drain what is buffered, then see `Ended`.
    pub fn close(&self, room_id: Uuid) {
        if self.topics.remove(&room_id).is_some() {
            debug!(%room_id, "closed change feed");
        }
    }

    /// Forgets topics nobody listens to anymore.
    pub fn prune(&self) -> usize {
        let before = self.topics.len();
        self.topics.retain(|_, tx| tx.receiver_count() > 0);
        before - self.topics.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl FeedSubscription {
    pub async fn next(&mut self) -> FeedItem {
        match self.rx.recv().await {
            Ok(room) => FeedItem::Snapshot(room),
            Err(broadcast::error::RecvError::Lagged(n)) => FeedItem::Lagged(n),
            Err(broadcast::error::RecvError::Closed) => FeedItem::Ended,
        }
    }
}
