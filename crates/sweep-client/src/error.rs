use std::io;

use thiserror::Error;

use crate::rpc::RpcError;

/// Errors that may occur while driving the sweep process.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("sweep could not be spawned as `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("sweep transport failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("peer has been terminated")]
    Terminated,
    #[error("peer is already being served")]
    AlreadyServing,
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("item index {index} is out of range for a window with {len} items")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("invalid icon: {0}")]
    InvalidIcon(String),
    #[error("unexpected `{method}` response: {value}")]
    UnexpectedResponse {
        method: &'static str,
        value: serde_json::Value,
    },
}
