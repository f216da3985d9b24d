//! Exported plane memory: one DMA-BUF object of a shared surface.

use std::fmt;
use std::ops::Deref;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::Arc;

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::debug;
use va_core::driver::{MapFlags, SurfaceId};
use va_core::error::VaResult;

use crate::allocator::dmabuf::DmabufCore;
use crate::shared::SharedSurface;

/// One exported object of a surface.
///
/// All plane memories of a surface hold the same [`SharedSurface`]; the
/// surface is destroyed when the last of them is dropped.
pub struct DmabufMemory {
    fd: OwnedFd,
    size: usize,
    drm_modifier: u64,
    shared: SharedSurface,
    /// Allocator queue this memory returns to; `None` for imports.
    home: Option<Arc<DmabufCore>>,
}

impl DmabufMemory {
    pub(crate) fn new(
        fd: OwnedFd,
        size: usize,
        drm_modifier: u64,
        shared: SharedSurface,
        home: Option<Arc<DmabufCore>>,
    ) -> Self {
        Self {
            fd,
            size,
            drm_modifier,
            shared,
            home,
        }
    }

    /// Exported descriptor.
    #[must_use]
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Object size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// DRM format modifier.
    #[must_use]
    pub fn drm_modifier(&self) -> u64 {
        self.drm_modifier
    }

    /// Surface this plane belongs to.
    #[must_use]
    pub fn surface(&self) -> SurfaceId {
        self.shared.surface()
    }

    /// Shared handle of the surface.
    #[must_use]
    pub fn shared_surface(&self) -> &SharedSurface {
        &self.shared
    }

    /// Whether this memory goes back to an allocator queue when released.
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }

    pub(crate) fn same_surface(&self, other: &DmabufMemory) -> bool {
        self.shared.same_surface(&other.shared)
    }

    /// Map the object after pending work on the surface completes.
    pub fn map(&self, flags: MapFlags) -> VaResult<DmabufMap<'_>> {
        let display = self.shared.display();
        if let Err(err) = display.sync_surface(self.surface()) {
            debug!(surface = %self.surface(), %err, "Mapping without sync");
        }

        let view = if flags.contains(MapFlags::VA) {
            DmabufView::Handle(self.surface())
        } else if flags.contains(MapFlags::WRITE) {
            // SAFETY: the object is owned by the driver for the surface's
            // lifetime, which this memory extends.
            let map = unsafe { MmapOptions::new().len(self.size).map_mut(&self.fd)? };
            DmabufView::Write(map)
        } else {
            // SAFETY: see above.
            let map = unsafe { MmapOptions::new().len(self.size).map(&self.fd)? };
            DmabufView::Read(map)
        };
        Ok(DmabufMap {
            view,
            _memory: self,
        })
    }

    /// Return a whole exported group to its allocator, or drop it.
    pub(crate) fn recycle_group(group: Vec<DmabufMemory>) {
        let home = group.first().and_then(|m| m.home.clone());
        match home {
            Some(core) => {
                if let Err(rejected) = core.available.push_group(group) {
                    drop(rejected);
                }
            }
            None => drop(group),
        }
    }
}

impl fmt::Debug for DmabufMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmabufMemory")
            .field("fd", &self.fd)
            .field("size", &self.size)
            .field("surface", &self.shared.surface())
            .finish_non_exhaustive()
    }
}

enum DmabufView {
    Read(Mmap),
    Write(MmapMut),
    Handle(SurfaceId),
}

/// CPU mapping of a [`DmabufMemory`].
pub struct DmabufMap<'a> {
    view: DmabufView,
    _memory: &'a DmabufMemory,
}

impl DmabufMap<'_> {
    /// Surface handle, for `VA` mappings.
    #[must_use]
    pub fn surface_handle(&self) -> Option<SurfaceId> {
        match self.view {
            DmabufView::Handle(surface) => Some(surface),
            _ => None,
        }
    }

    /// Writable bytes, for `WRITE` mappings.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.view {
            DmabufView::Write(map) => Some(&mut map[..]),
            _ => None,
        }
    }
}

impl Deref for DmabufMap<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.view {
            DmabufView::Read(map) => &map[..],
            DmabufView::Write(map) => &map[..],
            DmabufView::Handle(_) => &[],
        }
    }
}
