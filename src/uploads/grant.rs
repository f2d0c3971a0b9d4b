use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::{
    config::Config,
    error::{DropError, DropResult},
};

/// Default validity of an upload URL.
pub const GRANT_TTL: Duration = Duration::from_secs(5 * 60);

const MAX_KEY_NAME_LEN: usize = 128;

/// Short-lived upload URL plus the stable link the peer downloads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadGrant {
    pub upload_url: String,
    pub download_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl UploadGrant {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

#[async_trait]
pub trait UploadGrantIssuer: Send + Sync {
    async fn request_upload_grant(&self, file_name: &str, mime_type: &str) -> DropResult<UploadGrant>;
}

/// Mints grants locally by signing object URLs for the blob store.
///
/// The object key is `<unix-millis>-<file name>`, so two uploads of the same
/// name do not collide. The upload URL carries `expires` and a SHA-256
/// `signature` over `secret:key:expires` that the blob store checks.
#[derive(Debug, Clone)]
pub struct Presigner {
    upload_base: String,
    public_base: String,
    secret: String,
    ttl: Duration,
}

impl Presigner {
    pub fn new(upload_base: impl Into<String>, public_base: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            upload_base: upload_base.into().trim_end_matches('/').to_owned(),
            public_base: public_base.into().trim_end_matches('/').to_owned(),
            secret: secret.into(),
            ttl: GRANT_TTL,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.blob_upload_base, &config.blob_public_base, &config.blob_signing_secret)
            .with_ttl(config.grant_ttl())
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn grant_at(&self, file_name: &str, now: OffsetDateTime) -> DropResult<UploadGrant> {
        let key = object_key(file_name, now)?;
        let expires_at = now + self.ttl;
        let expires = expires_at.unix_timestamp();
        let signature = self.sign(&key, expires);

        Ok(UploadGrant {
            upload_url: format!("{}/{key}?expires={expires}&signature={signature}", self.upload_base),
            download_url: format!("{}/{key}", self.public_base),
            expires_at,
        })
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b":");
        hasher.update(key.as_bytes());
        hasher.update(b":");
        hasher.update(expires.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl UploadGrantIssuer for Presigner {
    async fn request_upload_grant(&self, file_name: &str, mime_type: &str) -> DropResult<UploadGrant> {
        if mime_type.trim().is_empty() {
            return Err(DropError::UploadGrantFailed("mimeType is empty".to_owned()));
        }
        self.grant_at(file_name, OffsetDateTime::now_utc())
    }
}

fn object_key(file_name: &str, now: OffsetDateTime) -> DropResult<String> {
    let name: String = file_name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .take(MAX_KEY_NAME_LEN)
        .collect();
    let name = name.trim_start_matches('.');
    if name.is_empty() {
        return Err(DropError::UploadGrantFailed("fileName is empty".to_owned()));
    }
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    Ok(format!("{millis}-{name}"))
}

/// Asks a remote grant endpoint (`POST {endpoint}` with `{fileName, mimeType}`),
/// such as this service's own `/uploads/grant`.
#[derive(Debug, Clone)]
pub struct HttpGrantIssuer {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GrantRequest<'a> {
    file_name: &'a str,
    mime_type: &'a str,
}

impl HttpGrantIssuer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl UploadGrantIssuer for HttpGrantIssuer {
    async fn request_upload_grant(&self, file_name: &str, mime_type: &str) -> DropResult<UploadGrant> {
        let failed = |err: reqwest::Error| DropError::UploadGrantFailed(err.to_string());
        self.client
            .post(&self.endpoint)
            .json(&GrantRequest { file_name, mime_type })
            .send()
            .await
            .map_err(failed)?
            .error_for_status()
            .map_err(failed)?
            .json()
            .await
            .map_err(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presigner() -> Presigner {
        Presigner::new("https://upload.example.com/", "https://cdn.example.com", "s3cret")
    }

    #[test]
    fn grant_urls_share_the_object_key() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let grant = presigner().grant_at("report.pdf", now).unwrap();

        assert_eq!(grant.download_url, "https://cdn.example.com/1700000000000-report.pdf");
        assert!(grant.upload_url.starts_with("https://upload.example.com/1700000000000-report.pdf?expires=1700000300&signature="));
        assert_eq!(grant.expires_at, now + GRANT_TTL);
    }

    #[test]
    fn grants_expire_after_the_ttl() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let grant = presigner().grant_at("report.pdf", now).unwrap();

        assert!(!grant.is_expired(now + Duration::from_secs(299)));
        assert!(grant.is_expired(now + Duration::from_secs(300)));
    }

    #[test]
    fn signature_binds_key_and_expiry() {
        let signer = presigner();
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let grant = signer.grant_at("report.pdf", now).unwrap();
        let signature = grant.upload_url.rsplit("signature=").next().unwrap();

        assert_eq!(signature.len(), 64);
        assert_eq!(signature, signer.sign("1700000000000-report.pdf", 1_700_000_300));
        assert_ne!(signature, signer.sign("1700000000000-other.pdf", 1_700_000_300));
        assert_ne!(signature, signer.sign("1700000000000-report.pdf", 1_700_000_600));
    }

    #[test]
    fn keys_are_sanitised() {
        let now = OffsetDateTime::from_unix_timestamp(1).unwrap();
        assert_eq!(object_key("../my file?.png", now).unwrap(), "1000-_my_file_.png");
        assert!(object_key("   ", now).is_err());
    }

    #[tokio::test]
    async fn blank_mime_type_is_refused() {
        let err = presigner().request_upload_grant("a.txt", " ").await.unwrap_err();
        assert!(matches!(err, DropError::UploadGrantFailed(_)));
    }
}
