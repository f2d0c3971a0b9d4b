use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::DropResult,
    hub::Hub,
    realtime::{FeedSubscription, TransferSubscription},
    rooms::{ClientId, Room, TransferAnnouncement},
};

/// Everything the lifecycle manager needs from the pairing service.
#[async_trait]
pub trait RoomBackend: Send + Sync {
    async fn create_room(&self, host_id: ClientId) -> DropResult<Room>;
    async fn join_room(&self, room_code: &str, guest_id: ClientId) -> DropResult<Room>;
    async fn get_room(&self, room_id: Uuid) -> DropResult<Option<Room>>;
    async fn delete_room(&self, room_id: Uuid) -> DropResult<()>;
    async fn publish_transfer(&self, room_id: Uuid, from: ClientId, announcement: TransferAnnouncement) -> DropResult<()>;

    fn subscribe_feed(&self, room_id: Uuid) -> FeedSubscription;
    fn subscribe_transfers(&self, room_id: Uuid, me: ClientId) -> TransferSubscription;
}

#[async_trait]
impl RoomBackend for Hub {
    async fn create_room(&self, host_id: ClientId) -> DropResult<Room> {
        Hub::create_room(self, host_id).await
    }

    async fn join_room(&self, room_code: &str, guest_id: ClientId) -> DropResult<Room> {
        Hub::join_room(self, room_code, guest_id).await
    }

    async fn get_room(&self, room_id: Uuid) -> DropResult<Option<Room>> {
        Hub::get_room(self, room_id).await
    }

    async fn delete_room(&self, room_id: Uuid) -> DropResult<()> {
        Hub::delete_room(self, room_id).await
    }

    async fn publish_transfer(&self, room_id: Uuid, from: ClientId, announcement: TransferAnnouncement) -> DropResult<()> {
        Hub::publish_transfer(self, room_id, from, announcement).await
    }

    fn subscribe_feed(&self, room_id: Uuid) -> FeedSubscription {
        Hub::subscribe_feed(self, room_id)
    }

    fn subscribe_transfers(&self, room_id: Uuid, me: ClientId) -> TransferSubscription {
        Hub::subscribe_transfers(self, room_id, me)
    }
}
