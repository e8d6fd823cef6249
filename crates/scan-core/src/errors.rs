//! Shared error taxonomy (Section 7).
//!
//! Every component error eventually classifies into one of these kinds so
//! the ETL Processor can decide retry-vs-dead-letter and the HTTP layer can
//! pick a status code, without either of them needing to know the concrete
//! error type a given component raised.

use serde::{Deserialize, Serialize};

/// Error taxonomy kind (Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    LeaseLost,
    Transient,
    Persistent,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::LeaseLost => "lease_lost",
            Self::Transient => "transient",
            Self::Persistent => "persistent",
            Self::Fatal => "fatal",
        }
    }

    /// HTTP status code for this taxonomy kind (Section 7).
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::LeaseLost => 409,
            Self::Transient => 503,
            Self::Persistent => 422,
            Self::Fatal => 500,
        }
    }

    /// Whether the ETL Processor should retry an error of this kind
    /// (Section 5, Section 7). Only `Transient` is retried; everything
    /// else either succeeds, is a programming/data error, or is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}
