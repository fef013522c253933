//! Session configuration.
//!
//! Reads configuration from environment variables:
//! - `MESHSYNC_SERVER`: backend `host:port` (default: "localhost:8000")
//! - `MESHSYNC_RECONNECT_MS`: delay before a reconnect attempt (default: 3000)
//! - `MESHSYNC_RETAIN`: retained event-log size (default: 100)
//! - `MESHSYNC_SLOT_DB`: SQLite file for the slot table (default: in memory)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use meshsync_core::EngineConfig;

use crate::error::ClientError;

/// Which backend layout the session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dashboard {
    /// Chat backend: `/api/nodes`, `/api/messages`, `/api/config`.
    Chat,
    /// Network testbed: combined `/state` and `/toggle-link`.
    Visualizer,
}

impl Dashboard {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dashboard::Chat => "chat",
            Dashboard::Visualizer => "visualizer",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub server: String,
    pub dashboard: Dashboard,
    pub reconnect_delay: Duration,
    pub retained_events: usize,
    pub max_buffered_frames: usize,
    pub slot_db: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        SyncConfig {
            server: "localhost:8000".to_string(),
            dashboard: Dashboard::Chat,
            reconnect_delay: Duration::from_millis(3000),
            retained_events: engine.retained_events,
            max_buffered_frames: engine.max_buffered_frames,
            slot_db: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ClientError> {
        let mut config = SyncConfig::default();
        if let Some(server) = lookup("MESHSYNC_SERVER").filter(|s| !s.trim().is_empty()) {
            config.server = server.trim().to_string();
        }
        if let Some(ms) = lookup("MESHSYNC_RECONNECT_MS") {
            let ms = parse_positive::<u64>("MESHSYNC_RECONNECT_MS", &ms)?;
            config.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(n) = lookup("MESHSYNC_RETAIN") {
            config.retained_events = parse_positive::<usize>("MESHSYNC_RETAIN", &n)?;
        }
        if let Some(path) = lookup("MESHSYNC_SLOT_DB").filter(|s| !s.is_empty()) {
            config.slot_db = Some(PathBuf::from(path));
        }
        Ok(config)
    }

    /// Rejects values that would make the session spin or keep nothing.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.reconnect_delay.is_zero() {
            return Err(ClientError::Config(
                "reconnect delay must be at least 1ms".to_string(),
            ));
        }
        if self.retained_events == 0 {
            return Err(ClientError::Config(
                "retained event count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn http_base(&self) -> String {
        format!("http://{}", self.server)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.server)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retained_events: self.retained_events,
            max_buffered_frames: self.max_buffered_frames,
        }
    }
}

fn parse_positive<T>(key: &str, raw: &str) -> Result<T, ClientError>
where
    T: FromStr + Default + PartialEq,
{
    let value: T = raw.trim().parse().map_err(|_| {
        ClientError::Config(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if value == T::default() {
        return Err(ClientError::Config(format!("{key} must be at least 1")));
    }
    Ok(value)
}
