//! Error types for accelerator operations
//!
//! Covers device discovery, program loading, memory allocation, command
//! submission and event completion.

/// Result type for accelerator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Accelerator runtime errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No platform with the requested name is installed
    #[error("`{0}` platform not found")]
    UnknownPlatform(String),

    /// The platform exists but exposes no device of the requested class
    #[error("No {class} device found on platform `{platform}`")]
    NoDevice {
        /// Platform that was searched
        platform: String,
        /// Requested device class
        class: String,
    },

    /// Device initialization failed
    #[error("Failed to initialize device {device_id}: {message}")]
    DeviceInit {
        /// Device index that failed
        device_id: usize,
        /// Error message
        message: String,
    },

    /// Program could not be built from the supplied binary
    #[error("Program build failed: {0}")]
    ProgramBuild(String),

    /// Kernel entry point missing from the program
    #[error("Kernel `{0}` not found in program")]
    KernelNotFound(String),

    /// Kernel argument missing or of the wrong kind
    #[error("Invalid kernel argument: {0}")]
    InvalidArgument(String),

    /// Host block does not fit the device buffer
    #[error("Buffer size mismatch: expected at most {expected} bytes, got {actual}")]
    BufferSizeMismatch {
        /// Capacity in bytes
        expected: usize,
        /// Requested size in bytes
        actual: usize,
    },

    /// Device memory allocation failed
    #[error("Failed to allocate {requested_bytes} bytes: {reason}")]
    AllocationFailed {
        /// Bytes requested
        requested_bytes: usize,
        /// Failure reason
        reason: String,
    },

    /// Operation not permitted by the buffer's access flags
    #[error("Access violation: {0}")]
    AccessViolation(String),

    /// Command queue worker is gone
    #[error("Command queue closed")]
    QueueClosed,

    /// A command completed with an error status
    #[error("Event completed with error status {code}")]
    EventFailed {
        /// Runtime status code
        code: i32,
    },

    /// Queue was created without profiling
    #[error("Profiling information not available for event")]
    ProfilingUnavailable,

    /// Kernel body reported a failure
    #[error("Kernel execution failed: {0}")]
    Kernel(String),
}

impl Error {
    /// Errors raised while locating or preparing the device.
    ///
    /// These are fatal at pipeline construction and never retried.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownPlatform(_)
                | Error::NoDevice { .. }
                | Error::DeviceInit { .. }
                | Error::ProgramBuild(_)
                | Error::KernelNotFound(_)
        )
    }

    /// Create a no-device error
    #[must_use]
    pub fn no_device(platform: impl Into<String>, class: impl std::fmt::Display) -> Self {
        Error::NoDevice {
            platform: platform.into(),
            class: class.to_string(),
        }
    }

    /// Create an allocation error
    #[must_use]
    pub fn alloc_failed(requested_bytes: usize, reason: impl Into<String>) -> Self {
        Error::AllocationFailed {
            requested_bytes,
            reason: reason.into(),
        }
    }
}
