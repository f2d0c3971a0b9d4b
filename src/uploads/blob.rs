use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;

use crate::error::{DropError, DropResult};

/// Moves payload bytes to an upload URL.
#[async_trait]
pub trait BlobTransfer: Send + Sync {
    async fn put(&self, upload_url: &str, mime_type: &str, bytes: Bytes) -> DropResult<()>;
}

/// Plain HTTP `PUT` of the payload; any non-2xx answer fails the transfer.
#[derive(Debug, Clone, Default)]
pub struct HttpBlobTransfer {
    client: reqwest::Client,
}

#[async_trait]
impl BlobTransfer for HttpBlobTransfer {
    async fn put(&self, upload_url: &str, mime_type: &str, bytes: Bytes) -> DropResult<()> {
        self.client
            .put(upload_url)
            .header(CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| DropError::TransferFailed(err.to_string()))?;
        Ok(())
    }
}
