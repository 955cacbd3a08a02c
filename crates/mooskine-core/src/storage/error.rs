//! Storage errors
//!
//! Every failure below the store surfaces as a [`StorageError`]. Some of
//! them are worth retrying on the next flush; [`StorageError::is_transient`]
//! tells which.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::migration::MigrationError;

/// ENOSPC and EDQUOT on Linux
const OUT_OF_SPACE_CODES: &[i32] = &[28, 122];

#[derive(Error, Debug)]
pub enum StorageError {
    /// The directory holding the store could not be created
    #[error("Cannot create store directory '{path}': {source}")]
    StoreDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No access to '{path}': {source}")]
    AccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Out of disk space at '{path}': {source}")]
    OutOfSpace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A persisted row could not be turned back into a record
    #[error("Corrupt {table} row '{id}': {details}")]
    CorruptRecord {
        table: &'static str,
        id: String,
        details: String,
    },

    /// The store was written by a newer schema than this code knows
    #[error("Store schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i32, supported: i32 },

    #[error("Migration failed: {0}")]
    Migration(#[from] MigrationError),

    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Rich text or cache payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Attach `path` to an I/O failure, sorting it by cause
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        if error.kind() == io::ErrorKind::PermissionDenied {
            return StorageError::AccessDenied {
                path,
                source: error,
            };
        }
        if is_out_of_space(&error) {
            return StorageError::OutOfSpace {
                path,
                source: error,
            };
        }
        StorageError::StoreDirectory {
            path,
            source: error,
        }
    }

    /// True if the same write may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::OutOfSpace { .. } => true,
            StorageError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::DiskFull
                    | rusqlite::ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }
}

fn is_out_of_space(error: &io::Error) -> bool {
    if let Some(code) = error.raw_os_error() {
        return OUT_OF_SPACE_CODES.contains(&code);
    }
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left") || msg.contains("quota exceeded")
}

pub type StorageResult<T> = Result<T, StorageError>;
