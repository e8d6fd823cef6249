//! Daemon-level error aggregation (Section 7, Section 10.2).
//!
//! Every component returns its own typed error; `MasterError` is the single
//! point where those get tagged with the `ErrorKind` taxonomy that the HTTP
//! layer maps to a status code.

use crate::mapper::MapperError;
use crate::merger::MergerError;
use crate::queue::QueueError;
use crate::storage::StorageError;
use scan_core::steps::StepsError;
use scan_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MasterError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Steps(#[from] StepsError),
    #[error(transparent)]
    Mapper(#[from] MapperError),
    #[error(transparent)]
    Merger(#[from] MergerError),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("task lease no longer owned: {0}")]
    LeaseLost(String),
    #[error("workflow is not active: {0}")]
    WorkflowNotActive(String),
}

impl MasterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(StorageError::ProjectNotFound(_))
            | Self::Storage(StorageError::WorkflowNotFound(_))
            | Self::Storage(StorageError::StageNotFound(_))
            | Self::Storage(StorageError::TaskNotFound(_))
            | Self::Storage(StorageError::AgentNotFound(_))
            | Self::Storage(StorageError::EtlErrorNotFound(_))
            | Self::Storage(StorageError::HostNotFound(_))
            | Self::Storage(StorageError::DeadLetterNotFound(_)) => ErrorKind::NotFound,
            // Duplicate-key conflicts from concurrent upserts are transient
            // (Section 4.4); other database errors (lock timeouts, dropped
            // connections) are too.
            Self::Storage(StorageError::Database(_)) => ErrorKind::Transient,
            Self::Storage(StorageError::Migration(_)) => ErrorKind::Fatal,
            Self::Storage(StorageError::Serialization(_)) => ErrorKind::Persistent,
            Self::Queue(QueueError::Backpressure) => ErrorKind::Transient,
            Self::Queue(QueueError::Closed) => ErrorKind::Fatal,
            Self::Steps(_) => ErrorKind::Validation,
            // A reserved result kind or a malformed payload will never map
            // successfully no matter how many times it's retried.
            Self::Mapper(_) => ErrorKind::Persistent,
            Self::Merger(MergerError::Storage(StorageError::Database(_))) => ErrorKind::Transient,
            Self::Merger(MergerError::Storage(StorageError::Migration(_))) => ErrorKind::Fatal,
            Self::Merger(MergerError::Storage(_)) => ErrorKind::NotFound,
            Self::Merger(MergerError::MissingHost) => ErrorKind::Persistent,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::LeaseLost(_) => ErrorKind::LeaseLost,
            Self::WorkflowNotActive(_) => ErrorKind::Validation,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }
}

pub type Result<T> = std::result::Result<T, MasterError>;
