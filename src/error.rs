//! Error types for Pulse Analytics

use thiserror::Error;

use crate::types::EventKind;

/// Errors surfaced by fallible library operations (parsing, configuration, snapshots)
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Reasons an event is refused by the collector.
///
/// Rejections are returned inside `RecordOutcome`, never raised to the caller.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EventRejection {
    #[error("{kind:?} event requires x/y coordinates")]
    MissingCoordinates { kind: EventKind },

    #[error("scroll event requires a scroll depth")]
    MissingScrollDepth,

    #[error("scroll depth {depth} is outside 0-100")]
    ScrollDepthOutOfRange { depth: f64 },
}
