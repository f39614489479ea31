//! Shared error types for training and binning.

use std::io;

/// Errors that can occur while fitting bin mappings or training trees.
#[derive(Debug, thiserror::Error)]
pub enum HistBoostError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("feature {feature}: categorical cardinality exceeds max_bins ({max_bins})")]
    CardinalityOverflow { feature: usize, max_bins: usize },

    #[error("feature {feature}: unknown category {value}")]
    UnknownCategory { feature: usize, value: i64 },

    #[error("feature {feature}: value {value} not present in rank mapping")]
    UnknownValue { feature: usize, value: i64 },

    #[error("malformed discretizer rows: {0}")]
    Discretizer(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, HistBoostError>;
