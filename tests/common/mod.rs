#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Mutex,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use roomdrop::{
    AppState, Config, DropError, DropResult, Hub, app,
    lifecycle::{LifecycleConfig, MemorySessionCache, RoomBackend, RoomLifecycle},
    realtime::{FeedSubscription, TransferSubscription},
    rooms::{ClientId, Room, RoomStore, TransferAnnouncement},
    uploads::{BlobTransfer, UploadGrant, UploadGrantIssuer},
};
use tempfile::TempDir;
use time::OffsetDateTime;
use uuid::Uuid;

pub async fn hub() -> (Hub, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("rooms.db").display());
    let store = RoomStore::connect(&url, 4).await.unwrap();
    store.migrate().await.unwrap();
    (Hub::new(store), dir)
}

/// Runs the full service on an ephemeral local port.
pub async fn serve(hub: Hub, config: Config) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(AppState::new(hub, config));
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

pub fn config() -> LifecycleConfig {
    LifecycleConfig::default().with_retry(3, Duration::from_millis(1))
}

pub fn participant<B: RoomBackend>(backend: B) -> RoomLifecycle<B> {
    RoomLifecycle::new(backend, MemorySessionCache::default(), config())
}

/// Host and guest already paired; the host has consumed its `PeerJoined`.
pub async fn paired(hub: &Hub) -> (RoomLifecycle<Hub>, RoomLifecycle<Hub>) {
    let mut host = participant(hub.clone());
    let mut guest = participant(hub.clone());
    let room = host.create().await.unwrap();
    guest.join(room.room_code.as_str()).await.unwrap();
    host.next_event().await.unwrap();
    (host, guest)
}

pub fn announcement(file_name: &str) -> TransferAnnouncement {
    TransferAnnouncement {
        file_name: file_name.to_owned(),
        mime_type: "application/pdf".to_owned(),
        size: 1_048_576,
        download_url: format!("https://cdn.example.com/1700000000000-{file_name}"),
        thumbnail: None,
    }
}

#[derive(Default)]
pub struct FakeIssuer {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub expired: bool,
}

#[async_trait]
impl UploadGrantIssuer for FakeIssuer {
    async fn request_upload_grant(&self, file_name: &str, _mime_type: &str) -> DropResult<UploadGrant> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DropError::UploadGrantFailed("blob store said no".into()));
        }
        let ttl = if self.expired { -time::Duration::SECOND } else { time::Duration::minutes(5) };
        Ok(UploadGrant {
            upload_url: format!("https://upload.example.com/{file_name}?signature=x"),
            download_url: format!("https://cdn.example.com/{file_name}"),
            expires_at: OffsetDateTime::now_utc() + ttl,
        })
    }
}

#[derive(Default)]
pub struct FakeBlobs {
    pub puts: Mutex<Vec<(String, usize)>>,
    pub fail: bool,
}

#[async_trait]
impl BlobTransfer for FakeBlobs {
    async fn put(&self, upload_url: &str, _mime_type: &str, bytes: Bytes) -> DropResult<()> {
        if self.fail {
            return Err(DropError::TransferFailed("connection reset".into()));
        }
        self.puts.lock().unwrap().push((upload_url.to_owned(), bytes.len()));
        Ok(())
    }
}

/// Fails the first `failures` store calls with a transient error.
pub struct Flaky<B> {
    pub inner: B,
    pub failures: AtomicU32,
    pub calls: AtomicU32,
}

impl<B> Flaky<B> {
    pub fn new(inner: B, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    fn trip(&self) -> DropResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(DropError::StoreUnavailable("database is locked".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<B: RoomBackend> RoomBackend for Flaky<B> {
    async fn create_room(&self, host_id: ClientId) -> DropResult<Room> {
        self.trip()?;
        self.inner.create_room(host_id).await
    }

    async fn join_room(&self, room_code: &str, guest_id: ClientId) -> DropResult<Room> {
        self.trip()?;
        self.inner.join_room(room_code, guest_id).await
    }

    async fn get_room(&self, room_id: Uuid) -> DropResult<Option<Room>> {
        self.trip()?;
        self.inner.get_room(room_id).await
    }

    async fn delete_room(&self, room_id: Uuid) -> DropResult<()> {
        self.trip()?;
        self.inner.delete_room(room_id).await
    }

    async fn publish_transfer(&self, room_id: Uuid, from: ClientId, announcement: TransferAnnouncement) -> DropResult<()> {
        self.inner.publish_transfer(room_id, from, announcement).await
    }

    fn subscribe_feed(&self, room_id: Uuid) -> FeedSubscription {
        self.inner.subscribe_feed(room_id)
    }

    fn subscribe_transfers(&self, room_id: Uuid, me: ClientId) -> TransferSubscription {
        self.inner.subscribe_transfers(room_id, me)
    }
}
