//! Error types for meshsync-client.
//!
//! [`TransportError`] never reaches session callers: the transport logs it
//! and reconnects. [`ClientError`] is what session operations return, and
//! what a failed write carries into its record's failure reason.

use thiserror::Error;

use meshsync_core::TrackerError;
use meshsync_store::StoreError;

/// Failures on the realtime channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening the channel failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The open channel reported an error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The HTTP request could not be completed.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The backend accepted the request but reported the write as failed.
    #[error("backend reported write {id} as failed")]
    Rejected { id: String },

    /// A response body did not have the expected shape.
    #[error("invalid response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    /// The operation needs the local node identity, which is not known.
    #[error("local node identity is unknown")]
    NoIdentity,

    /// The operation does not exist on this dashboard's backend.
    #[error("{operation} is not available on the {dashboard} dashboard")]
    Unsupported {
        operation: &'static str,
        dashboard: &'static str,
    },

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
