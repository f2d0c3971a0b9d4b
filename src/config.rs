use std::{fmt::Display, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub max_connections: u32,

    // rooms
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub session_idle_minutes: i64,

    // uploads
    pub max_upload_bytes: u64,
    pub grant_ttl_secs: u64,
    pub blob_upload_base: String,
    pub blob_public_base: String,
    pub blob_signing_secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: "sqlite://roomdrop.db?mode=rwc".to_owned(),
            max_connections: 16,
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
            session_idle_minutes: 30,
            max_upload_bytes: 200 * 1024 * 1024,
            grant_ttl_secs: 5 * 60,
            blob_upload_base: "http://localhost:9000/upload".to_owned(),
            blob_public_base: "http://localhost:9000/files".to_owned(),
            blob_signing_secret: "dev-secret".to_owned(),
        }
    }
}

/// Overwrites `slot` when `name` is set in the environment or `.env`.
fn load<T>(name: &str, slot: &mut T) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Ok(raw) = dotenv::var(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("invalid {name}: {raw:?}"))?;
    }
    Ok(())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        load("BIND_ADDR", &mut config.bind_addr)?;
        load("DATABASE_URL", &mut config.database_url)?;
        load("DATABASE_MAX_CONNECTIONS", &mut config.max_connections)?;
        load("ROOM_IDLE_TIMEOUT_SECS", &mut config.idle_timeout_secs)?;
        load("ROOM_SWEEP_INTERVAL_SECS", &mut config.sweep_interval_secs)?;
        load("SESSION_IDLE_MINUTES", &mut config.session_idle_minutes)?;
        load("MAX_UPLOAD_BYTES", &mut config.max_upload_bytes)?;
        load("UPLOAD_GRANT_TTL_SECS", &mut config.grant_ttl_secs)?;
        load("BLOB_UPLOAD_BASE", &mut config.blob_upload_base)?;
        load("BLOB_PUBLIC_BASE", &mut config.blob_public_base)?;
        load("BLOB_SIGNING_SECRET", &mut config.blob_signing_secret)?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be > 0");
        }
        if self.idle_timeout_secs == 0 || self.sweep_interval_secs == 0 {
            anyhow::bail!("room idle timeout and sweep interval must be > 0");
        }
        if self.session_idle_minutes <= 0 {
            anyhow::bail!("SESSION_IDLE_MINUTES must be > 0");
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("MAX_UPLOAD_BYTES must be > 0");
        }
        if self.grant_ttl_secs == 0 {
            anyhow::bail!("UPLOAD_GRANT_TTL_SECS must be > 0");
        }
        for (name, url) in [("BLOB_UPLOAD_BASE", &self.blob_upload_base), ("BLOB_PUBLIC_BASE", &self.blob_public_base)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("{name} must be an http(s) URL");
            }
        }
        if self.blob_signing_secret.is_empty() {
            anyhow::bail!("BLOB_SIGNING_SECRET must not be empty");
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn grant_ttl(&self) -> Duration {
        Duration::from_secs(self.grant_ttl_secs)
    }
}
