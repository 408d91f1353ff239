//! Error types of the odometry pipeline.

use thiserror::Error;

/// Errors surfaced by construction, configuration loading and ingestion.
///
/// Per-residual failures never show up here, they are logged and skipped.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(
        "tick ordering violated on ring {ring}: tick {tick} follows {previous} at index {index}"
    )]
    OrderingViolation {
        ring: usize,
        index: usize,
        previous: u64,
        tick: u64,
    },

    #[error("unrecognized kernel `{0}`")]
    UnrecognizedKernel(String),

    #[error("only {committed} residuals committed, at least {required} required")]
    InsufficientResiduals { committed: usize, required: usize },

    #[error("failed to parse configuration: {0}")]
    Config(#[from] basic_toml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
