//! Centralized error type for the legato umbrella crate.
//!
//! Wraps subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Stream(#[from] legato_core::Error),

    #[error("Config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<legato_core::Rejected> for Error {
    fn from(rejected: legato_core::Rejected) -> Self {
        Error::Stream(rejected.error)
    }
}

impl Error {
    /// Status code the stream manager would see for this error.
    pub fn status(&self) -> legato_core::IoStatus {
        match self {
            Error::Stream(e) => e.status(),
            Error::Toml(_) | Error::Io(_) => legato_core::IoStatus::Fail,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
