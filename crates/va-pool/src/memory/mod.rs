//! Memory objects carried by pool buffers.

pub mod dmabuf;
pub mod surface;

use std::ops::Deref;

use va_core::driver::{MapFlags, SurfaceId};
use va_core::error::VaResult;

pub use dmabuf::{DmabufMap, DmabufMemory};
pub use surface::{SubMap, SubMemory, SurfaceMap, VaMemory};

/// A memory object of either allocator.
#[derive(Debug)]
pub enum Memory {
    /// Direct surface memory.
    Surface(VaMemory),
    /// One exported plane.
    Dmabuf(DmabufMemory),
}

impl Memory {
    /// Surface backing this memory.
    #[must_use]
    pub fn surface(&self) -> SurfaceId {
        match self {
            Self::Surface(m) => m.surface(),
            Self::Dmabuf(m) => m.surface(),
        }
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Surface(m) => m.size(),
            Self::Dmabuf(m) => m.size(),
        }
    }

    /// The direct surface memory, if this is one.
    #[must_use]
    pub fn as_surface(&self) -> Option<&VaMemory> {
        match self {
            Self::Surface(m) => Some(m),
            Self::Dmabuf(_) => None,
        }
    }

    /// The exported plane, if this is one.
    #[must_use]
    pub fn as_dmabuf(&self) -> Option<&DmabufMemory> {
        match self {
            Self::Dmabuf(m) => Some(m),
            Self::Surface(_) => None,
        }
    }

    /// Map for CPU or handle access.
    pub fn map(&self, flags: MapFlags) -> VaResult<MemoryMap<'_>> {
        Ok(match self {
            Self::Surface(m) => MemoryMap::Surface(m.map(flags)?),
            Self::Dmabuf(m) => MemoryMap::Dmabuf(m.map(flags)?),
        })
    }
}

/// Mapping of a [`Memory`].
pub enum MemoryMap<'a> {
    /// Mapping of a direct surface.
    Surface(SurfaceMap<'a>),
    /// Mapping of an exported plane.
    Dmabuf(DmabufMap<'a>),
}

impl MemoryMap<'_> {
    /// Surface handle, for `VA` mappings.
    #[must_use]
    pub fn surface_handle(&self) -> Option<SurfaceId> {
        match self {
            Self::Surface(m) => m.surface_handle(),
            Self::Dmabuf(m) => m.surface_handle(),
        }
    }

    /// Writable bytes, for `WRITE` mappings.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::Surface(m) => m.as_mut_slice(),
            Self::Dmabuf(m) => m.as_mut_slice(),
        }
    }
}

impl Deref for MemoryMap<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Surface(m) => &m[..],
            Self::Dmabuf(m) => &m[..],
        }
    }
}

/// Return memories stripped from a buffer to the allocators they came from.
///
/// Consecutive exported memories of one surface travel as one group.
pub(crate) fn recycle(memories: Vec<Memory>) {
    let mut group: Vec<DmabufMemory> = Vec::new();
    for memory in memories {
        match memory {
            Memory::Surface(m) => {
                DmabufMemory::recycle_group(std::mem::take(&mut group));
                m.recycle();
            }
            Memory::Dmabuf(m) => {
                if group.last().is_some_and(|last| !last.same_surface(&m)) {
                    DmabufMemory::recycle_group(std::mem::take(&mut group));
                }
                group.push(m);
            }
        }
    }
    DmabufMemory::recycle_group(group);
}
