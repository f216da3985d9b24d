//! Surface allocators.
//!
//! Both allocators commit one format at a time, hand out memories for it
//! and take them back for reuse. [`Allocator`] lets the pool drive either.

pub mod dmabuf;
mod queue;
pub mod surface;

use std::sync::Arc;

use va_core::config::AllocatorKind;
use va_core::driver::UsageHint;
use va_core::error::VaResult;
use va_core::format::VideoFormat;
use va_core::video::VideoInfo;

use crate::buffer::Buffer;
use crate::display::Display;

pub use dmabuf::{import_dmabuf, DmabufAllocator};
pub use queue::WaitMode;
pub use surface::SurfaceAllocator;

/// Either allocator, shared.
#[derive(Debug, Clone)]
pub enum Allocator {
    /// Direct surface allocator.
    Surface(Arc<SurfaceAllocator>),
    /// Exported-plane allocator.
    Dmabuf(Arc<DmabufAllocator>),
}

impl Allocator {
    /// Allocator of the configured kind. `surface_formats` only matters to
    /// the direct allocator.
    #[must_use]
    pub fn new(kind: AllocatorKind, display: Display, surface_formats: Vec<VideoFormat>) -> Self {
        match kind {
            AllocatorKind::Surface => {
                Self::Surface(Arc::new(SurfaceAllocator::new(display, surface_formats)))
            }
            AllocatorKind::Dmabuf => Self::Dmabuf(Arc::new(DmabufAllocator::new(display))),
        }
    }

    /// Which allocator this is.
    #[must_use]
    pub fn kind(&self) -> AllocatorKind {
        match self {
            Self::Surface(_) => AllocatorKind::Surface,
            Self::Dmabuf(_) => AllocatorKind::Dmabuf,
        }
    }

    /// Device the surfaces come from.
    #[must_use]
    pub fn display(&self) -> &Display {
        match self {
            Self::Surface(a) => a.display(),
            Self::Dmabuf(a) => a.display(),
        }
    }

    /// Commit a format; see [`SurfaceAllocator::set_format`].
    pub fn set_format(&self, info: &VideoInfo, usage_hint: UsageHint) -> VaResult<VideoInfo> {
        match self {
            Self::Surface(a) => a.set_format(info, usage_hint),
            Self::Dmabuf(a) => a.set_format(info, usage_hint),
        }
    }

    /// Committed info and usage hint.
    #[must_use]
    pub fn format(&self) -> Option<(VideoInfo, UsageHint)> {
        match self {
            Self::Surface(a) => a.format(),
            Self::Dmabuf(a) => a.format(),
        }
    }

    /// Attach freshly allocated memories to an empty buffer.
    pub fn setup_buffer(&self, buffer: &mut Buffer) -> VaResult<()> {
        match self {
            Self::Surface(a) => a.setup_buffer(buffer),
            Self::Dmabuf(a) => a.setup_buffer(buffer),
        }
    }

    /// Attach recycled memories to an empty buffer.
    pub fn prepare_buffer(&self, buffer: &mut Buffer, mode: WaitMode) -> VaResult<()> {
        match self {
            Self::Surface(a) => a.prepare_buffer(buffer, mode),
            Self::Dmabuf(a) => a.prepare_buffer(buffer, mode),
        }
    }

    /// Destroy every recycled memory and wake blocked waiters.
    pub fn flush(&self) {
        match self {
            Self::Surface(a) => a.flush(),
            Self::Dmabuf(a) => a.flush(),
        }
    }

    /// Surfaces alive under the committed format.
    #[must_use]
    pub fn surface_count(&self) -> usize {
        match self {
            Self::Surface(a) => a.surface_count(),
            Self::Dmabuf(a) => a.surface_count(),
        }
    }

    pub(crate) fn available_groups(&self) -> usize {
        match self {
            Self::Surface(a) => a.available_groups(),
            Self::Dmabuf(a) => a.available_groups(),
        }
    }
}
