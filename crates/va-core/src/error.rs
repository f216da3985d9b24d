//! Error types shared by every crate in the workspace.
//!
//! `VaError` covers the whole failure taxonomy of the surface pool:
//!
//! - **`Driver`**: an accelerator call returned a non-success status. The
//!   provisioner logs it where it happens and propagates it unchanged; nothing
//!   at this layer retries.
//! - **`UnsupportedFormat`**: the pixel format has no surface mapping, or the
//!   driver exported a layout that does not match it.
//! - **`FormatLocked`**: a renegotiation was requested while surfaces created
//!   under the committed format are still outstanding.
//! - **`Flushing` / `WouldBlock`**: an acquire was interrupted by a flush, or
//!   could not complete without waiting.
//! - Limit violations (`FrameDimensionsTooLarge`, `FrameTooLarge`,
//!   `SizeOverflow`) come from [`crate::limits`].

use thiserror::Error;

use crate::driver::MapFlags;
use crate::format::VideoFormat;

/// Convenience alias for results using the pool error type.
pub type VaResult<T> = std::result::Result<T, VaError>;

/// Status reported by the accelerator driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (status {code:#x})")]
pub struct DriverError {
    /// Numeric driver status.
    pub code: i32,
    /// Driver-provided status string.
    pub message: String,
}

impl DriverError {
    /// Error with an explicit message.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error carrying the canonical string for `code`.
    #[must_use]
    pub fn from_status(code: i32) -> Self {
        Self::new(code, crate::driver::status::message(code))
    }
}

/// Errors raised by the pool, its allocators and the driver wrapper.
#[derive(Error, Debug)]
pub enum VaError {
    /// A driver entry point returned an error status.
    #[error("{call} failed: {source}")]
    Driver {
        /// Entry point that failed.
        call: &'static str,
        /// Status it returned.
        #[source]
        source: DriverError,
    },

    /// The format has no surface or image mapping.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(VideoFormat),

    /// Renegotiation refused while surfaces of the committed format are alive.
    #[error("Format locked: {live} surfaces outstanding for {committed}, cannot switch to {requested}")]
    FormatLocked {
        /// Committed format.
        committed: String,
        /// Refused format.
        requested: String,
        /// Surfaces still alive.
        live: usize,
    },

    /// No format has been committed yet.
    #[error("No format negotiated")]
    NotNegotiated,

    /// A flush is in progress.
    #[error("Flushing")]
    Flushing,

    /// Nothing available without waiting.
    #[error("No buffer available without waiting")]
    WouldBlock,

    /// The pool is not running.
    #[error("Pool is not active")]
    NotActive,

    /// The pool is running and cannot be reconfigured.
    #[error("Pool is active, stop it before reconfiguring")]
    Active,

    /// Rejected configuration or request.
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// The memory is already mapped with incompatible flags.
    #[error("Memory already mapped with {current:?}, cannot map with {requested:?}")]
    MapConflict {
        /// Flags of the outstanding mapping.
        current: MapFlags,
        /// Flags of the refused mapping.
        requested: MapFlags,
    },

    /// Write access requested on a shared sub-memory.
    #[error("Shared sub-memory is read-only")]
    ReadOnly,

    /// A range falls outside its memory.
    #[error("Range {offset}+{size} exceeds memory of {max} bytes")]
    OutOfRange {
        /// Start of the range.
        offset: usize,
        /// Length of the range.
        size: usize,
        /// Size of the memory.
        max: usize,
    },

    /// An export did not match the committed format.
    #[error("Surface export mismatch: {0}")]
    ExportMismatch(String),

    /// Zero width or height.
    #[error("Invalid dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },

    /// Width or height above the supported maximum.
    #[error("Frame dimensions {width}x{height} exceed maximum {max_dimension}")]
    FrameDimensionsTooLarge {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
        /// Largest accepted width or height.
        max_dimension: u32,
    },

    /// Frame byte size above the supported maximum.
    #[error("Frame size {bytes} bytes exceeds maximum {max_bytes} bytes")]
    FrameTooLarge {
        /// Requested size.
        bytes: usize,
        /// Largest accepted size.
        max_bytes: usize,
    },

    /// Arithmetic overflow in a size computation.
    #[error("Size overflow while computing {context}")]
    SizeOverflow {
        /// What was being computed.
        context: &'static str,
    },

    /// Mapping or descriptor I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaError {
    /// Whether this error is a driver status.
    #[must_use]
    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::status;

    #[test]
    fn test_driver_error_display() {
        let err = VaError::Driver {
            call: "vaCreateSurfaces",
            source: DriverError::from_status(status::ERROR_ALLOCATION_FAILED),
        };
        assert_eq!(
            err.to_string(),
            "vaCreateSurfaces failed: resource allocation failed (status 0x2)"
        );
        assert!(err.is_driver());
    }

    #[test]
    fn test_format_locked_display() {
        let err = VaError::FormatLocked {
            committed: "NV12 640x480".into(),
            requested: "YUY2 640x480".into(),
            live: 1,
        };
        assert_eq!(
            err.to_string(),
            "Format locked: 1 surfaces outstanding for NV12 640x480, cannot switch to YUY2 640x480"
        );
        assert!(!err.is_driver());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: VaError = io.into();
        assert!(matches!(err, VaError::Io(_)));
    }
}
