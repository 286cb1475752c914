//! Error types for the capture core.
//!
//! Only input-open and storage-initialization failures propagate to callers
//! (see spec §7); dissection failures are local (drop and count) and never
//! constructed as an [`Error`].

use std::io;

/// Result type for capture core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur at the boundaries of the capture core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error opening a capture file, device or socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A capture file failed a structural sanity check (bad magic, header
    /// shorter than declared, etc). This is an open-time failure, not a
    /// malformed-packet event, and therefore propagates.
    #[error("invalid capture file: {0}")]
    InvalidCaptureFile(String),

    /// The requested network device could not be used for live capture.
    #[error("device error: {device}: {message}")]
    Device {
        /// Device name the caller requested.
        device: String,
        /// Human-readable reason.
        message: String,
    },

    /// Binding the HEP listen socket failed.
    #[error("HEP listen bind failed on {addr}: {source}")]
    HepBind {
        /// Address the listener tried to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Storage could not be initialized with the given configuration.
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// An internal invariant was violated. Per spec §7 these are bugs, not
    /// recoverable conditions; callers should treat this as fatal.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    /// True for errors that mean "could not even start," matching CLI exit
    /// code 1 (configuration/input error) rather than 2 (runtime capture
    /// error).
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            Error::InvalidCaptureFile(_)
                | Error::Device { .. }
                | Error::HepBind { .. }
                | Error::InvalidConfig(_)
        )
    }
}
