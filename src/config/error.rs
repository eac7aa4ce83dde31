use std::{io, path::PathBuf};

use thiserror::Error;

use super::model::WorkerId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing '{field}' for worker #{index}")]
    MissingField { index: usize, field: &'static str },
    #[error("worker id {id} is defined more than once")]
    DuplicateWorker { id: WorkerId },
    #[error("port {port} is assigned to both worker {first} and worker {second}")]
    DuplicatePort {
        port: u16,
        first: WorkerId,
        second: WorkerId,
    },
    #[error("worker {id} must use a non-zero port")]
    InvalidPort { id: WorkerId },
    #[error("'{field}' must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("'stop_ceiling_ms' ({ceiling_ms}) must not be shorter than 'stop_grace_ms' ({grace_ms})")]
    StopCeilingBelowGrace { grace_ms: u64, ceiling_ms: u64 },
    #[error("unsupported value for env '{key}' on worker {id}")]
    InvalidEnvValue { id: WorkerId, key: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
