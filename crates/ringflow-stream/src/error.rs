//! Error types for the streaming pipeline

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Argument descriptor list rejected at construction
    #[error("Invalid argument descriptor: {0}")]
    InvalidDescriptor(String),

    /// Adapter returned the wrong number of kernel inputs
    #[error("Expected {expected} kernel arguments, got {actual}")]
    ArgumentCount {
        /// Descriptor count
        expected: usize,
        /// Inputs supplied
        actual: usize,
    },

    /// Kernel input does not match its descriptor
    #[error("Argument {index} (`{name}`): {reason}")]
    ArgumentMismatch {
        /// Argument position
        index: usize,
        /// Descriptor name
        name: String,
        /// What did not match
        reason: String,
    },

    /// A pending-event queue would exceed the ring degree
    #[error("Ring `{name}` already holds {degree} pending events")]
    RingOverflow {
        /// Ring name
        name: String,
        /// Ring degree
        degree: usize,
    },

    /// Ring slot accessed before the cursor was advanced
    #[error("Ring `{0}` has no current slot")]
    RingNotAdvanced(String),

    /// Device-to-host transfer of a result did not complete
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Stream host rejected an output
    #[error("Emit failed: {0}")]
    Emit(String),

    /// Kernel adapter failed to prepare inputs or outputs
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Accelerator runtime error
    #[error("Device error: {0}")]
    Device(#[from] ringflow_device::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reconciliation loop is gone
    #[error("Reconciliation channel closed")]
    ChannelClosed,
}

impl PipelineError {
    /// Errors confined to a single item.
    ///
    /// The pipeline absorbs these into a `fail` for the item and keeps
    /// running; everything else is a configuration or invariant failure.
    #[must_use]
    pub fn is_item_level(&self) -> bool {
        match self {
            PipelineError::ArgumentCount { .. }
            | PipelineError::ArgumentMismatch { .. }
            | PipelineError::Transfer(_)
            | PipelineError::Emit(_)
            | PipelineError::Adapter(_) => true,
            PipelineError::Device(e) => !e.is_configuration(),
            _ => false,
        }
    }

    /// Create an argument mismatch error
    pub fn mismatch(index: usize, name: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::ArgumentMismatch {
            index,
            name: name.into(),
            reason: reason.into(),
        }
    }
}
