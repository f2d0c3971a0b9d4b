use std::{collections::VecDeque, future::Future, time::Duration};

use bytes::Bytes;
use time::OffsetDateTime;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    backend::RoomBackend,
    session::{ConnectionStatus, SessionCache, SessionContext},
};
use crate::{
    error::{DropError, DropResult},
    realtime::{FeedItem, FeedSubscription, TransferSubscription},
    rooms::{ClientId, Room, RoomCode, RoomStatus, TransferAnnouncement},
    uploads::{BlobTransfer, UploadGrantIssuer, check_size},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Creating,
    WaitingForGuest,
    Joining,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Cancelled,
    IdleTimeout,
    /// Deleted by the peer or by the server sweep.
    RoomGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    RoomUpdated(Room),
    PeerJoined(Room),
    Connection(ConnectionStatus),
    IncomingTransfer(TransferAnnouncement),
    Closed(CloseReason),
}

/// A file ready to be sent to the peer.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
    pub thumbnail: Option<String>,
}

impl OutgoingFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
            thumbnail: None,
        }
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub max_upload_bytes: u64,
    pub idle_timeout: Duration,
    pub idle_check_interval: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 200 * 1024 * 1024,
            idle_timeout: Duration::from_secs(30 * 60),
            idle_check_interval: Duration::from_secs(60),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl LifecycleConfig {
    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_idle_check_interval(mut self, interval: Duration) -> Self {
        self.idle_check_interval = interval;
        self
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_backoff = backoff;
        self
    }
}

/// One participant's view of a room: creates or joins it, follows the
/// change feed, relays transfers and tears everything down on close.
///
/// The cached room is only a hint. Every snapshot from the feed or a direct
/// fetch replaces it wholesale, and the phase is derived from it.
pub struct RoomLifecycle<B> {
    backend: B,
    cache: Box<dyn SessionCache>,
    config: LifecycleConfig,
    session: SessionContext,
    phase: Phase,
    feed: Option<FeedSubscription>,
    transfers: Option<TransferSubscription>,
    idle_tick: Option<Interval>,
    incoming: Option<TransferAnnouncement>,
    pending: VecDeque<LifecycleEvent>,
}

impl<B: RoomBackend> RoomLifecycle<B> {
    /// Picks up a cached session if one is still fresh. Call [`restore`](Self::restore)
    /// to re-validate its room.
    pub fn new(backend: B, cache: impl SessionCache + 'static, config: LifecycleConfig) -> Self {
        let mut session = cache.load().unwrap_or_else(SessionContext::fresh);
        session.connection = ConnectionStatus::Disconnected;

        Self {
            backend,
            cache: Box::new(cache),
            config,
            session,
            phase: Phase::Idle,
            feed: None,
            transfers: None,
            idle_tick: None,
            incoming: None,
            pending: VecDeque::new(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.session.client_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn room(&self) -> Option<&Room> {
        self.session.room.as_ref()
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.session.connection
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Resumes the cached room if it still exists and we still belong to it.
    pub async fn restore(&mut self) -> DropResult<Option<Room>> {
        let Some(hint) = self.session.room.clone() else {
            return Ok(None);
        };
        let me = self.session.client_id;

        self.attach(hint.id);
        let backend = &self.backend;
        let fetched = with_retry(&self.config, || backend.get_room(hint.id)).await;

        match fetched {
            Ok(Some(room)) if room.is_member(me) && room.status != RoomStatus::Closed => {
                info!(room_id = %room.id, "resumed room");
                self.adopt(room.clone());
                Ok(Some(room))
            }
            Ok(_) => {
                debug!(room_id = %hint.id, "cached room is gone");
                self.detach();
                self.session.room = None;
                self.phase = Phase::Idle;
                self.persist();
                Ok(None)
            }
            Err(err) => {
                self.detach();
                self.session.connection = ConnectionStatus::Error;
                Err(err)
            }
        }
    }

    pub async fn create(&mut self) -> DropResult<Room> {
        self.ensure_free()?;
        self.phase = Phase::Creating;

        let me = self.session.client_id;
        let backend = &self.backend;
        let created = with_retry(&self.config, || backend.create_room(me)).await;
        match created {
            Ok(room) => Ok(self.enter(room).await),
            Err(err) => {
                self.phase = Phase::Idle;
                Err(match err {
                    DropError::StoreUnavailable(reason) => DropError::CreateFailed(reason),
                    other => other,
                })
            }
        }
    }

    /// Malformed codes fail like unknown ones, without a round trip.
    pub async fn join(&mut self, room_code: &str) -> DropResult<Room> {
        self.ensure_free()?;
        let code = RoomCode::parse(room_code).map_err(|_| DropError::RoomNotJoinable)?;
        self.phase = Phase::Joining;

        let me = self.session.client_id;
        let backend = &self.backend;
        let joined = with_retry(&self.config, || backend.join_room(code.as_str(), me)).await;
        match joined {
            Ok(room) => Ok(self.enter(room).await),
            Err(err) => {
                self.phase = Phase::Idle;
                Err(err)
            }
        }
    }

    /// Deletes the room and closes locally. Local teardown happens even if the
    /// delete keeps failing; the server sweep removes the row eventually.
    pub async fn cancel(&mut self) -> DropResult<()> {
        let Some(room_id) = self.session.room.as_ref().map(|room| room.id) else {
            return Ok(());
        };

        let backend = &self.backend;
        let deleted = with_retry(&self.config, || backend.delete_room(room_id)).await;
        if let Err(err) = &deleted {
            warn!(%room_id, %err, "could not delete room on cancel");
        }
        self.close(CloseReason::Cancelled);
        deleted
    }

    /// Applies an authoritative snapshot. Foreign, identical and stale
    /// snapshots are ignored, so the status never moves backwards.
    pub fn apply_snapshot(&mut self, room: Room) -> Option<LifecycleEvent> {
        let current = self.session.room.as_ref()?;
        if current.id != room.id || *current == room {
            return None;
        }
        if room.is_older_than(current) {
            debug!(room_id = %room.id, "dropping stale snapshot");
            return None;
        }

        if room.status == RoomStatus::Closed {
            self.close(CloseReason::RoomGone);
            return self.pending.pop_back();
        }

        let was_waiting = self.phase == Phase::WaitingForGuest;
        self.adopt(room.clone());
        if was_waiting && self.phase == Phase::Connected {
            info!(room_id = %room.id, "peer joined");
            Some(LifecycleEvent::PeerJoined(room))
        } else {
            Some(LifecycleEvent::RoomUpdated(room))
        }
    }

    /// Waits for the next thing worth reacting to. `None` once there is no
    /// room to follow and nothing left to report.
    pub async fn next_event(&mut self) -> Option<LifecycleEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            let (Some(feed), Some(transfers)) = (self.feed.as_mut(), self.transfers.as_mut()) else {
                return None;
            };
            let period = self.config.idle_check_interval;
            let tick = self.idle_tick.get_or_insert_with(|| {
                let mut tick = tokio::time::interval(period);
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                tick
            });

            let wake = tokio::select! {
                biased;
                item = feed.next() => Wake::Feed(item),
                announcement = transfers.recv() => Wake::Transfer(announcement),
                _ = tick.tick() => Wake::IdleCheck,
            };

            match wake {
                Wake::Feed(FeedItem::Snapshot(room)) => {
                    if let Some(event) = self.apply_snapshot(room) {
                        return Some(event);
                    }
                }
                Wake::Feed(FeedItem::Lagged(skipped)) => {
                    warn!(skipped, "change feed lagged, refetching room");
                    self.resync().await;
                }
                Wake::Feed(FeedItem::Ended) | Wake::Transfer(None) => {
                    self.close(CloseReason::RoomGone);
                }
                Wake::Transfer(Some(announcement)) => {
                    debug!(file = %announcement.file_name, "incoming transfer");
                    // a newer announcement replaces one not yet taken
                    self.incoming = Some(announcement.clone());
                    return Some(LifecycleEvent::IncomingTransfer(announcement));
                }
                Wake::IdleCheck => {
                    if let Err(err) = self.check_idle(OffsetDateTime::now_utc()).await {
                        warn!(%err, "idle check failed");
                    }
                }
            }
        }
    }

    /// Closes the room if its last activity is older than the idle timeout.
    /// The row is deleted too so the code can be reused.
    pub async fn check_idle(&mut self, now: OffsetDateTime) -> DropResult<bool> {
        let Some(room) = &self.session.room else {
            return Ok(false);
        };
        if room.idle_since(now) < self.config.idle_timeout {
            return Ok(false);
        }

        let room_id = room.id;
        info!(%room_id, "room idle, closing");
        let backend = &self.backend;
        with_retry(&self.config, || backend.delete_room(room_id)).await?;
        self.close(CloseReason::IdleTimeout);
        Ok(true)
    }

    /// Grant, upload, then announce. Nothing is announced unless the upload succeeded.
    pub async fn send_file(
        &mut self,
        file: OutgoingFile,
        issuer: &dyn UploadGrantIssuer,
        blobs: &dyn BlobTransfer,
    ) -> DropResult<TransferAnnouncement> {
        let room_id = match (&self.session.room, self.phase) {
            (Some(room), Phase::Connected) => room.id,
            _ => return Err(DropError::NotConnected),
        };
        check_size(file.size(), self.config.max_upload_bytes)?;

        let grant = issuer
            .request_upload_grant(&file.file_name, &file.mime_type)
            .await
            .map_err(|err| match err {
                DropError::UploadGrantFailed(_) => err,
                other => DropError::UploadGrantFailed(other.to_string()),
            })?;
        if grant.is_expired(OffsetDateTime::now_utc()) {
            return Err(DropError::UploadGrantFailed("grant expired before upload".to_owned()));
        }

        let size = file.size();
        blobs
            .put(&grant.upload_url, &file.mime_type, file.bytes)
            .await
            .map_err(|err| match err {
                DropError::TransferFailed(_) => err,
                other => DropError::TransferFailed(other.to_string()),
            })?;

        let announcement = TransferAnnouncement {
            file_name: file.file_name,
            mime_type: file.mime_type,
            size,
            download_url: grant.download_url,
            thumbnail: file.thumbnail,
        };
        self.backend
            .publish_transfer(room_id, self.session.client_id, announcement.clone())
            .await?;
        info!(%room_id, file = %announcement.file_name, size, "transfer announced");
        Ok(announcement)
    }

    /// Hands over the latest incoming announcement not yet acted upon.
    pub fn take_incoming(&mut self) -> Option<TransferAnnouncement> {
        self.incoming.take()
    }

    fn ensure_free(&mut self) -> DropResult<()> {
        if matches!(self.phase, Phase::WaitingForGuest | Phase::Connected) {
            return Err(DropError::Busy);
        }
        self.detach();
        self.pending.clear();
        self.session.room = None;
        Ok(())
    }

    /// Attaches the feed before re-reading the room so a mutation between
    /// the write and the attach is not missed.
    async fn enter(&mut self, room: Room) -> Room {
        self.attach(room.id);
        self.adopt(room.clone());

        let backend = &self.backend;
        let latest = with_retry(&self.config, || backend.get_room(room.id)).await;
        match latest {
            Ok(Some(latest)) => {
                if let Some(event) = self.apply_snapshot(latest) {
                    self.pending.push_back(event);
                }
            }
            Ok(None) => self.close(CloseReason::RoomGone),
            Err(err) => warn!(room_id = %room.id, %err, "could not reconcile room, relying on the feed"),
        }
        self.session.room.clone().unwrap_or(room)
    }

    async fn resync(&mut self) {
        let Some(room_id) = self.session.room.as_ref().map(|room| room.id) else {
            return;
        };
        self.set_connection(ConnectionStatus::Reconnecting);
        // drop whatever is still buffered; the fetch below supersedes it
        self.feed = Some(self.backend.subscribe_feed(room_id));

        let backend = &self.backend;
        let fetched = with_retry(&self.config, || backend.get_room(room_id)).await;
        match fetched {
            Ok(Some(room)) => {
                self.set_connection(ConnectionStatus::Connected);
                if let Some(event) = self.apply_snapshot(room) {
                    self.pending.push_back(event);
                }
            }
            Ok(None) => self.close(CloseReason::RoomGone),
            Err(err) => {
                let err = DropError::SubscriptionError(err.to_string());
                warn!(%room_id, %err, "giving up on resync");
                self.set_connection(ConnectionStatus::Error);
            }
        }
    }

    fn adopt(&mut self, room: Room) {
        self.phase = match room.status {
            RoomStatus::Waiting => Phase::WaitingForGuest,
            RoomStatus::Connected => Phase::Connected,
            RoomStatus::Closed => Phase::Closed,
        };
        self.session.room = Some(room);
        if self.session.connection != ConnectionStatus::Reconnecting {
            self.session.connection = ConnectionStatus::Connected;
        }
        self.persist();
    }

    fn close(&mut self, reason: CloseReason) {
        if let Some(room) = &self.session.room {
            info!(room_id = %room.id, ?reason, "room closed");
        }
        self.detach();
        self.incoming = None;
        self.pending.clear();
        self.session.room = None;
        self.session.connection = ConnectionStatus::Closed;
        self.phase = Phase::Closed;
        if let Err(err) = self.cache.clear() {
            warn!(%err, "could not clear session cache");
        }
        self.pending.push_back(LifecycleEvent::Closed(reason));
    }

    fn attach(&mut self, room_id: Uuid) {
        self.feed = Some(self.backend.subscribe_feed(room_id));
        self.transfers = Some(self.backend.subscribe_transfers(room_id, self.session.client_id));
        self.idle_tick = None;
    }

    fn detach(&mut self) {
        self.feed = None;
        self.transfers = None;
        self.idle_tick = None;
    }

    fn set_connection(&mut self, status: ConnectionStatus) {
        if self.session.connection != status {
            self.session.connection = status;
            self.pending.push_back(LifecycleEvent::Connection(status));
        }
    }

    fn persist(&self) {
        if let Err(err) = self.cache.save(&self.session) {
            warn!(%err, "could not save session");
        }
    }
}

enum Wake {
    Feed(FeedItem),
    Transfer(Option<TransferAnnouncement>),
    IdleCheck,
}

/// Retries transient failures with exponential backoff. Logical failures
/// return on the first attempt.
async fn with_retry<T, F, Fut>(config: &LifecycleConfig, mut op: F) -> DropResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DropResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < config.retry_attempts => {
                let delay = config.retry_backoff * 2u32.saturating_pow(attempt - 1);
                warn!(%err, attempt, ?delay, "retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
