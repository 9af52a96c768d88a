//! Crate-wide error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required field was missing, blank or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The source could not be downloaded, copied or stored.
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    /// The external transcoder is missing, failed, timed out or produced
    /// unusable output. `stderr` carries the tail of its diagnostics.
    #[error("transcode failed: {message}")]
    Transcode {
        message: String,
        stderr: Option<String>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn transcode(message: impl Into<String>) -> Self {
        Error::Transcode {
            message: message.into(),
            stderr: None,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidInput(_) => 400,
            Error::NotFound(_) => 404,
            Error::Acquisition(_) | Error::Transcode { .. } | Error::Io(_) => 500,
        }
    }

    /// Short machine-readable tag used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::Acquisition(_) => "acquisition_error",
            Error::Transcode { .. } => "transcode_error",
            Error::NotFound(_) => "not_found",
            Error::Io(_) => "io_error",
        }
    }
}
