//! Error types for legato-core.

use crate::transfer::TransferInfo;
use std::path::PathBuf;
use thiserror::Error;

/// Result code reported to the stream manager.
///
/// Every [`Error`] collapses onto one of the non-success codes through
/// [`Error::status`]; completion callbacks receive one of these directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoStatus {
    Success,
    Fail,
    InvalidParameter,
    NotImplemented,
}

impl IoStatus {
    #[inline]
    pub fn is_success(self) -> bool {
        self == IoStatus::Success
    }
}

/// Error type for stream I/O operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Path too long: {len} characters (limit {max})")]
    PathTooLong { len: usize, max: usize },

    #[error("Unrecognized content owner: {0}")]
    UnrecognizedOwner(u32),

    #[error("File missing or empty: {}", .0.display())]
    FileUnavailable(PathBuf),

    #[error("Transfer pool exhausted ({capacity} transfers in flight)")]
    PoolExhausted { capacity: usize },

    #[error("Descriptor is not open for {0}")]
    WrongOpenMode(&'static str),

    #[error("Backend dispatch failed: {0}")]
    Dispatch(String),

    #[error("Device creation failed")]
    DeviceCreation,

    #[error("Global callback registration failed: {0}")]
    CallbackRegistration(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map onto the stream manager's result taxonomy.
    pub fn status(&self) -> IoStatus {
        match self {
            Error::InvalidParameter(_) | Error::PathTooLong { .. } | Error::UnrecognizedOwner(_) => {
                IoStatus::InvalidParameter
            }
            Error::NotImplemented(_) | Error::WrongOpenMode("read") => IoStatus::NotImplemented,
            _ => IoStatus::Fail,
        }
    }

    /// Transient failures go away once in-flight transfers drain; the caller
    /// is expected to retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::PoolExhausted { .. })
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// A transfer the hook refused to accept.
///
/// The transfer (buffer and callback included) is handed back so the caller
/// can resubmit it; rejected transfers never have their callback invoked.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct Rejected {
    #[source]
    pub error: Error,
    pub transfer: TransferInfo,
}

impl Rejected {
    pub fn new(error: Error, transfer: TransferInfo) -> Self {
        Self { error, transfer }
    }

    pub fn status(&self) -> IoStatus {
        self.error.status()
    }

    pub fn is_transient(&self) -> bool {
        self.error.is_transient()
    }

    pub fn into_parts(self) -> (Error, TransferInfo) {
        (self.error, self.transfer)
    }
}

impl From<Rejected> for Error {
    fn from(rejected: Rejected) -> Self {
        rejected.error
    }
}

/// Result of submitting a transfer.
pub type SubmitResult<T> = std::result::Result<T, Rejected>;
