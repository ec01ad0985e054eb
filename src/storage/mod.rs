//! Durable state: per-replica balance snapshots and the shared ledger.

use std::path::PathBuf;
use thiserror::Error;

mod ledger;
mod snapshot;

pub use ledger::Ledger;
pub use snapshot::SnapshotFile;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("csv error on {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("failed to replace {path}: {source}")]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
}
