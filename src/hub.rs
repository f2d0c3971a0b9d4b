use std::{iter, time::Duration};

use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{DropError, DropResult},
    realtime::{ChangeFeed, FeedSubscription, TransferChannel, TransferSubscription},
    rooms::{ClientId, Room, RoomCode, RoomStore, TransferAnnouncement},
};

/// Bounded number of fresh codes tried before giving up on a create.
pub const MAX_CODE_ATTEMPTS: usize = 16;

/// Room Store plus the two realtime topics. Every accepted mutation of a room
/// row is followed by a snapshot on that room's change feed.
#[derive(Clone)]
pub struct Hub {
    store: RoomStore,
    feed: ChangeFeed,
    transfers: TransferChannel,
}

impl Hub {
    pub fn new(store: RoomStore) -> Self {
        Self {
            store,
            feed: ChangeFeed::new(),
            transfers: TransferChannel::new(),
        }
    }

    pub fn store(&self) -> &RoomStore {
        &self.store
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub async fn create_room(&self, host_id: ClientId) -> DropResult<Room> {
        self.create_room_from(host_id, iter::repeat_with(RoomCode::random)).await
    }

    /// Tries candidate codes in order until one is free among open rooms.
    /// Store failures surface as they are so callers can retry them.
    pub async fn create_room_from(
        &self,
        host_id: ClientId,
        codes: impl IntoIterator<Item = RoomCode>,
    ) -> DropResult<Room> {
        for code in codes.into_iter().take(MAX_CODE_ATTEMPTS) {
            let inserted = self
                .store
                .insert_room(host_id, &code, OffsetDateTime::now_utc())
                .await?;

            match inserted {
                Some(room) => {
                    info!(room_id = %room.id, code = %room.room_code, host = %host_id, "room created");
                    self.feed.publish(&room);
                    return Ok(room);
                }
                None => debug!(%code, "room code in use, trying another"),
            }
        }

        warn!(host = %host_id, "no free room code");
        Err(DropError::CreateFailed("no free room code".to_owned()))
    }

    /// Malformed codes are reported like unknown ones.
    pub async fn join_room(&self, room_code: &str, guest_id: ClientId) -> DropResult<Room> {
        let code = RoomCode::parse(room_code).map_err(|_| DropError::RoomNotJoinable)?;
        let room = self
            .store
            .join_room(&code, guest_id, OffsetDateTime::now_utc())
            .await?;

        info!(room_id = %room.id, %code, guest = %guest_id, "room joined");
        self.feed.publish(&room);
        Ok(room)
    }

    pub async fn get_room(&self, room_id: Uuid) -> DropResult<Option<Room>> {
        self.store.get_room(room_id).await
    }

    pub async fn touch_room(&self, room_id: Uuid) -> DropResult<Option<Room>> {
        let room = self.store.touch_room(room_id, OffsetDateTime::now_utc()).await?;
        if let Some(room) = &room {
            self.feed.publish(room);
        }
        Ok(room)
    }

    /// Idempotent. Tears down both topics of the room.
    pub async fn delete_room(&self, room_id: Uuid) -> DropResult<()> {
        if self.store.delete_room(room_id).await? {
            info!(%room_id, "room deleted");
        }
        self.close_topics(room_id);
        Ok(())
    }

    pub fn subscribe_feed(&self, room_id: Uuid) -> FeedSubscription {
        self.feed.subscribe(room_id)
    }

    pub fn subscribe_transfers(&self, room_id: Uuid, me: ClientId) -> TransferSubscription {
        self.transfers.subscribe(room_id, me)
    }

    /// Records activity, then relays the announcement to whoever is listening.
    /// Nothing is relayed if the room is gone or the touch fails.
    pub async fn publish_transfer(
        &self,
        room_id: Uuid,
        from: ClientId,
        announcement: TransferAnnouncement,
    ) -> DropResult<()> {
        announcement.validate()?;
        if self.touch_room(room_id).await?.is_none() {
            return Err(DropError::NotConnected);
        }
        self.transfers.publish(room_id, from, announcement);
        Ok(())
    }

    /// Deletes rooms idle for longer than `idle_timeout` as of `now`.
    pub async fn sweep_idle(&self, now: OffsetDateTime, idle_timeout: Duration) -> DropResult<Vec<Uuid>> {
        let removed = self.store.delete_idle(now - idle_timeout).await?;
        for &room_id in &removed {
            self.close_topics(room_id);
        }
        let pruned = self.feed.prune() + self.transfers.prune();
        if pruned > 0 {
            debug!(pruned, "pruned unused topics");
        }
        Ok(removed)
    }

    fn close_topics(&self, room_id: Uuid) {
        self.feed.close(room_id);
        self.transfers.close(room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{realtime::FeedItem, rooms::{RoomStatus, store::tests::temp_store}};

    fn codes(list: &[&str]) -> Vec<RoomCode> {
        list.iter().map(|c| RoomCode::parse(c).unwrap()).collect()
    }

    #[tokio::test]
    async fn create_retries_taken_codes() {
        let (store, _dir) = temp_store().await;
        let hub = Hub::new(store);
        hub.create_room_from(ClientId::new(), codes(&["K7M2"])).await.unwrap();

        let room = hub.create_room_from(ClientId::new(), codes(&["K7M2", "K7M3"])).await.unwrap();
        assert_eq!(room.room_code.as_str(), "K7M3");
    }

    #[tokio::test]
    async fn create_fails_when_every_candidate_is_taken() {
        let (store, _dir) = temp_store().await;
        let hub = Hub::new(store);
        hub.create_room_from(ClientId::new(), codes(&["K7M2"])).await.unwrap();

        let err = hub
            .create_room_from(ClientId::new(), iter::repeat(RoomCode::parse("K7M2").unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, DropError::CreateFailed(_)));
    }

    #[tokio::test]
    async fn join_publishes_connected_snapshot() {
        let (store, _dir) = temp_store().await;
        let hub = Hub::new(store);
        let room = hub.create_room_from(ClientId::new(), codes(&["K7M2"])).await.unwrap();
        let mut feed = hub.subscribe_feed(room.id);

        let guest = ClientId::new();
        let joined = hub.join_room("k7m2", guest).await.unwrap();

        match feed.next().await {
            FeedItem::Snapshot(snapshot) => {
                assert_eq!(snapshot, joined);
                assert_eq!(snapshot.status, RoomStatus::Connected);
                assert_eq!(snapshot.guest_id, Some(guest));
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_codes_are_not_joinable() {
        let (store, _dir) = temp_store().await;
        let hub = Hub::new(store);
        assert!(matches!(hub.join_room("O0", ClientId::new()).await, Err(DropError::RoomNotJoinable)));
    }

    #[tokio::test]
    async fn delete_ends_the_feed() {
        let (store, _dir) = temp_store().await;
        let hub = Hub::new(store);
        let room = hub.create_room(ClientId::new()).await.unwrap();
        let mut feed = hub.subscribe_feed(room.id);

        hub.delete_room(room.id).await.unwrap();
        hub.delete_room(room.id).await.unwrap();

        assert_eq!(feed.next().await, FeedItem::Ended);
    }

    #[tokio::test]
    async fn publishing_a_transfer_touches_the_room() {
        let (store, _dir) = temp_store().await;
        let hub = Hub::new(store);
        let host = ClientId::new();
        let room = hub.create_room(host).await.unwrap();
        hub.join_room(room.room_code.as_str(), ClientId::new()).await.unwrap();
        let mut feed = hub.subscribe_feed(room.id);

        let announcement = TransferAnnouncement {
            file_name: "a.txt".into(),
            mime_type: "text/plain".into(),
            size: 3,
            download_url: "https://blobs.example.com/a.txt".into(),
            thumbnail: None,
        };
        hub.publish_transfer(room.id, host, announcement).await.unwrap();

        assert!(matches!(feed.next().await, FeedItem::Snapshot(r) if r.last_activity_at >= room.last_activity_at));
    }

    fn announcement() -> TransferAnnouncement {
        TransferAnnouncement {
            file_name: "report.pdf".into(),
            mime_type: "application/pdf".into(),
            size: 1_048_576,
            download_url: "https://blobs.example.com/report.pdf".into(),
            thumbnail: None,
        }
    }

    #[tokio::test]
    async fn failed_touch_relays_nothing() {
        let (store, _dir) = temp_store().await;
        let hub = Hub::new(store.clone());
        let host = ClientId::new();
        let guest = ClientId::new();
        let room = hub.create_room(host).await.unwrap();
        hub.join_room(room.room_code.as_str(), guest).await.unwrap();
        let mut inbox = hub.subscribe_transfers(room.id, guest);

        store.close().await;
        let err = hub.publish_transfer(room.id, host, announcement()).await.unwrap_err();
        assert!(matches!(err, DropError::StoreUnavailable(_)));
        assert_eq!(inbox.try_recv(), None);
    }

    #[tokio::test]
    async fn transfer_to_a_deleted_room_is_refused() {
        let (store, _dir) = temp_store().await;
        let hub = Hub::new(store);
        let host = ClientId::new();
        let room = hub.create_room(host).await.unwrap();
        hub.delete_room(room.id).await.unwrap();

        assert!(matches!(hub.publish_transfer(room.id, host, announcement()).await, Err(DropError::NotConnected)));
    }

    #[tokio::test]
    async fn create_surfaces_store_outages_as_transient() {
        let (store, _dir) = temp_store().await;
        let hub = Hub::new(store.clone());
        store.close().await;

        let err = hub.create_room(ClientId::new()).await.unwrap_err();
        assert!(matches!(err, DropError::StoreUnavailable(_)));
        assert!(err.is_transient());
    }
}
