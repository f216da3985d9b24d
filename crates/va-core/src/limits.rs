//! Shared hard limits to prevent unbounded surface allocations.

use crate::error::{VaError, VaResult};

/// Maximum allowed bytes for one surface image (default: 512MB).
pub const MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;
/// Maximum supported width/height of a surface.
pub const MAX_FRAME_DIMENSION: u32 = 16_384;

/// Validated frame sizing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    /// Pixel count.
    pub pixels: usize,
    /// Byte count.
    pub bytes: usize,
}

/// Validate frame dimensions and calculate pixel/byte sizes safely.
pub fn validate_frame_size(width: u32, height: u32, bytes_per_pixel: usize) -> VaResult<FrameSize> {
    if width == 0 || height == 0 {
        return Err(VaError::InvalidDimensions { width, height });
    }

    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(VaError::FrameDimensionsTooLarge {
            width,
            height,
            max_dimension: MAX_FRAME_DIMENSION,
        });
    }

    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or(VaError::SizeOverflow {
            context: "frame pixel count",
        })?;

    let bytes = pixels
        .checked_mul(bytes_per_pixel)
        .ok_or(VaError::SizeOverflow {
            context: "frame byte size",
        })?;

    validate_frame_bytes(bytes)?;

    Ok(FrameSize { pixels, bytes })
}

/// Reject an image byte size above [`MAX_FRAME_BYTES`].
pub fn validate_frame_bytes(bytes: usize) -> VaResult<()> {
    if bytes > MAX_FRAME_BYTES {
        return Err(VaError::FrameTooLarge {
            bytes,
            max_bytes: MAX_FRAME_BYTES,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_frame() {
        let size = validate_frame_size(1920, 1080, 2).unwrap();
        assert_eq!(size.pixels, 1920 * 1080);
        assert_eq!(size.bytes, 1920 * 1080 * 2);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(matches!(
            validate_frame_size(0, 480, 1),
            Err(VaError::InvalidDimensions { width: 0, height: 480 })
        ));
    }

    #[test]
    fn test_dimension_limit() {
        assert!(matches!(
            validate_frame_size(MAX_FRAME_DIMENSION + 1, 16, 1),
            Err(VaError::FrameDimensionsTooLarge { .. })
        ));
    }

    #[test]
    fn test_byte_limit() {
        assert!(matches!(
            validate_frame_size(16_384, 16_384, 4),
            Err(VaError::FrameTooLarge { .. })
        ));
    }
}
