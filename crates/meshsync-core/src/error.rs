//! Core error types for meshsync-core.
//!
//! Uses `thiserror` for structured, matchable error variants. Frame errors
//! are recoverable by construction (the frame is dropped); tracker errors
//! describe lifecycle violations on optimistic records.

use thiserror::Error;

use crate::id::TempId;

/// Failures while decoding one inbound push frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame was not valid JSON or lacked the `{type, data}` envelope.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope parsed but the `type` tag is not one we understand.
    #[error("unknown frame kind: '{kind}'")]
    UnknownKind { kind: String },

    /// The `data` field did not match the shape expected for its kind.
    #[error("invalid '{kind}' payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Lifecycle violations on optimistic records.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// No outstanding record carries this temporary id.
    #[error("unknown temporary id: {0}")]
    UnknownTempId(TempId),

    /// The record already reached a terminal state and cannot transition again.
    #[error("record {temp_id} already resolved as {state}")]
    AlreadyResolved { temp_id: TempId, state: &'static str },

    /// Resend was requested for a record that has not failed.
    #[error("record {0} is still pending; only failed records can be resent")]
    NotFailed(TempId),
}

/// A compass-slot token that is not one of the eight palette entries.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid slot token '{0}'")]
pub struct SlotParseError(pub String);
