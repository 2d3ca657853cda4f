//! Error types for facekit-core operations.
//!
//! Only pre-session failures surface as errors; once a session is
//! running, every outcome (including engine failures) is delivered as a
//! value through the completion sink.

use std::path::PathBuf;

use facekit_protocol::ErrorInfo;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Boundary validation rejected the request before any resources
    /// were acquired.
    #[error("invalid request: {code}: {message}")]
    InvalidRequest { code: String, message: String },

    /// The engine or camera could not be started. Raised before the
    /// deadline timer is armed; acquired resources are rolled back.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<ErrorInfo> for Error {
    fn from(info: ErrorInfo) -> Self {
        Error::InvalidRequest {
            code: info.code,
            message: info.message,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
