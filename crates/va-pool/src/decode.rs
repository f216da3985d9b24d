//! Decode submission into pool buffers.

use tracing::trace;
use va_core::driver::DecodePicture;
use va_core::error::{VaError, VaResult};

use crate::buffer::Buffer;
use crate::display::Display;

/// Decode `picture` into the surface behind `buffer`.
///
/// Parameter and slice payloads go to the driver untouched.
pub fn submit(display: &Display, buffer: &Buffer, picture: &DecodePicture) -> VaResult<()> {
    let surface = buffer
        .surface()
        .ok_or_else(|| VaError::InvalidConfig("decode target holds no memory".into()))?;
    trace!(
        %surface,
        codec = ?picture.codec,
        params = picture.params.len(),
        slices = picture.slices.len(),
        "Submitting picture"
    );
    display.decode(surface, picture)
}
