//! Per-room realtime topics: the change feed of room snapshots and the
//! ephemeral transfer channel. Both live in process memory only.

pub mod feed;
pub mod transfers;

pub use feed::{ChangeFeed, FeedItem, FeedSubscription};
pub use transfers::{TransferChannel, TransferEnvelope, TransferSubscription};
