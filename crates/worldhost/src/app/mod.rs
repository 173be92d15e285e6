pub(crate) mod bootstrap;
mod config;
pub(crate) mod loop_runner;
mod script_runner;
mod seed;

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use worldsync::{SnapshotError, StoreError};

pub(crate) use config::HostConfig;
pub(crate) use script_runner::CommandScriptRunner;

#[derive(Debug, Error)]
pub(crate) enum HostError {
    #[error("failed to read seed file {}: {source}", .path.display())]
    SeedRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid seed: {0}")]
    SeedInvalid(String),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("failed to write seed into store: {0}")]
    Store(#[from] StoreError),
}
