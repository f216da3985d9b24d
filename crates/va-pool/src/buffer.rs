//! Pool buffers: a holder carrying one frame's memories.

use std::fmt;
use std::sync::Weak;

use va_core::driver::SurfaceId;
use va_core::format::{VideoFormat, MAX_PLANES};
use va_core::video::VideoAlignment;

use crate::memory::{self, Memory};
use crate::pool::PoolShared;

/// Geometry attached to a buffer for consumers that cannot assume the
/// default layout.
///
/// `width` and `height` are the visible size, while `offset` and `stride`
/// describe the allocation, which includes any padding. Each plane offset
/// therefore points at the padded origin: a consumer that wants the first
/// visible pixel skips `alignment.padding_top` rows and
/// `alignment.padding_left` pixels of that plane itself. [`VideoFrame`]
/// does not apply the padding either.
///
/// [`VideoFrame`]: crate::VideoFrame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMeta {
    /// Image format of the visible frame.
    pub format: VideoFormat,
    /// Visible width in pixels.
    pub width: u32,
    /// Visible height in pixels.
    pub height: u32,
    /// Planes in use in `offset` and `stride`.
    pub n_planes: usize,
    /// Byte offset of each plane's padded origin from the start of the
    /// first memory.
    pub offset: [usize; MAX_PLANES],
    /// Row pitch of each plane in bytes.
    pub stride: [usize; MAX_PLANES],
    /// Padding and stride masks, when the pool was configured with them.
    pub alignment: Option<VideoAlignment>,
}

/// One frame's worth of memories.
///
/// A buffer acquired from a [`VaPool`](crate::VaPool) returns to it on drop:
/// its memories go back to the allocator queue and the empty holder back to
/// the pool. A buffer whose pool is gone just recycles its memories.
pub struct Buffer {
    memories: Vec<Memory>,
    meta: Option<VideoMeta>,
    pool: Option<Weak<PoolShared>>,
}

impl Buffer {
    pub(crate) fn new() -> Self {
        Self {
            memories: Vec::new(),
            meta: None,
            pool: None,
        }
    }

    /// Detached buffer around imported or standalone memories.
    #[must_use]
    pub fn from_memories(memories: Vec<Memory>) -> Self {
        Self {
            memories,
            meta: None,
            pool: None,
        }
    }

    pub(crate) fn append_memory(&mut self, memory: Memory) {
        self.memories.push(memory);
    }

    /// Strip every memory, returning them to their allocators.
    pub(crate) fn remove_all_memory(&mut self) {
        memory::recycle(std::mem::take(&mut self.memories));
    }

    /// Strip every memory, destroying them.
    pub(crate) fn discard_all_memory(&mut self) {
        self.memories.clear();
    }

    pub(crate) fn set_pool(&mut self, pool: Weak<PoolShared>) {
        self.pool = Some(pool);
    }

    pub(crate) fn set_video_meta(&mut self, meta: VideoMeta) {
        self.meta = Some(meta);
    }

    /// Number of memories attached.
    #[must_use]
    pub fn n_memory(&self) -> usize {
        self.memories.len()
    }

    /// Memory at `index`.
    #[must_use]
    pub fn memory(&self, index: usize) -> Option<&Memory> {
        self.memories.get(index)
    }

    /// All attached memories, in plane order.
    #[must_use]
    pub fn memories(&self) -> &[Memory] {
        &self.memories
    }

    /// Total bytes over all memories.
    #[must_use]
    pub fn size(&self) -> usize {
        self.memories.iter().map(Memory::size).sum()
    }

    /// Layout metadata, when attached.
    #[must_use]
    pub fn video_meta(&self) -> Option<&VideoMeta> {
        self.meta.as_ref()
    }

    /// Surface behind the first memory.
    #[must_use]
    pub fn surface(&self) -> Option<SurfaceId> {
        self.memories.first().map(Memory::surface)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take().and_then(|weak| weak.upgrade()) {
            let holder = Buffer {
                memories: std::mem::take(&mut self.memories),
                meta: self.meta.take(),
                pool: None,
            };
            pool.release(holder);
        } else {
            self.remove_all_memory();
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("surface", &self.surface())
            .field("n_memory", &self.memories.len())
            .field("size", &self.size())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}
