//! Error types for the rebroadcast mesh

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Mesh error types
///
/// Every kind is returned synchronously to the caller of the violating
/// operation. Loss, duplication and conflicts on the air are not errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration outside its valid range at init
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Operation before a successful init
    #[error("mesh not initialized")]
    NotInitialized,

    /// Second call to init
    #[error("mesh already initialized")]
    AlreadyInitialized,

    /// Handle outside 1..=handle_count
    #[error("invalid handle {handle} (valid range 1..={handle_count})")]
    InvalidAddress { handle: u16, handle_count: u16 },

    /// Payload longer than the slot capacity
    #[error("invalid length: {len} bytes (max {max})")]
    InvalidLength { len: usize, max: usize },

    /// Read of a handle that was never set locally or remotely
    #[error("handle {0} has no value")]
    Unallocated(u16),

    /// Local write to a handle whose version counter reached `u32::MAX`
    #[error("handle {0} version counter exhausted")]
    VersionExhausted(u16),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}
