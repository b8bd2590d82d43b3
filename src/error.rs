//! Error types.
//!
//! Per spec 7: almost nothing in the hot path is a recoverable error. Misuse
//! of an edge-tracking strategy is a programming bug caught by
//! `debug_assert!` (see [`crate::edge`]); allocation failure aborts the
//! process, matching what `Box`/`Vec` already do. The one genuinely
//! recoverable error class is malformed startup configuration.

use thiserror::Error;

/// A malformed or out-of-range configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A recognized key had a value that failed to parse or was out of range.
    #[error("invalid value {value:?} for config key `{key}`")]
    InvalidValue {
        /// The offending key.
        key: &'static str,
        /// The offending value, as given.
        value: String,
    },
    /// `edge_algo` named an algorithm this crate does not implement.
    #[error("unknown edge_algo `{0}` (expected one of: simple, distributed, dyntree, dyntreeopt, tree)")]
    UnknownEdgeAlgo(String),
    /// JSON configuration failed to parse.
    #[error("failed to parse configuration JSON")]
    Json(#[from] serde_json::Error),
}
