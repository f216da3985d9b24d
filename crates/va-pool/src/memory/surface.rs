//! Direct surface memory: one accelerator surface, mapped through a derived
//! image or through an image copy.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};
use va_core::driver::{Image, MapFlags, MappedRegion, SurfaceId};
use va_core::error::{VaError, VaResult};
use va_core::format::VideoFormat;

use crate::allocator::surface::SurfaceCore;
use crate::shared::destroy_surface;

/// How a memory's pixels are laid out, fixed at allocation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MemoryFormat {
    pub(crate) image_format: VideoFormat,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) size: usize,
    pub(crate) use_derived: bool,
}

struct MapState {
    image: Option<Image>,
    region: Option<MappedRegion>,
    flags: MapFlags,
    map_count: usize,
    is_derived: bool,
    is_dirty: bool,
}

impl MapState {
    fn clean(&mut self) {
        self.image = None;
        self.region = None;
        self.flags = MapFlags::empty();
        self.is_derived = true;
        self.is_dirty = false;
    }
}

impl Default for MapState {
    fn default() -> Self {
        Self {
            image: None,
            region: None,
            flags: MapFlags::empty(),
            map_count: 0,
            is_derived: true,
            is_dirty: false,
        }
    }
}

#[derive(Clone, Copy)]
enum MappedView {
    Bytes(MappedRegion),
    Handle(SurfaceId),
}

/// One accelerator surface owned by a [`SurfaceAllocator`](crate::SurfaceAllocator).
///
/// Dropping it destroys the surface; returning it to its allocator happens
/// through the buffer that carries it.
pub struct VaMemory {
    core: Arc<SurfaceCore>,
    surface: SurfaceId,
    format: MemoryFormat,
    state: Mutex<MapState>,
}

impl VaMemory {
    /// Wrap a freshly created surface already counted as live.
    pub(crate) fn new(core: Arc<SurfaceCore>, surface: SurfaceId, format: MemoryFormat) -> Self {
        Self {
            core,
            surface,
            format,
            state: Mutex::new(MapState::default()),
        }
    }

    /// Backing surface.
    #[must_use]
    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    /// Negotiated frame size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.format.size
    }

    /// Format CPU mappings present.
    #[must_use]
    pub fn image_format(&self) -> VideoFormat {
        self.format.image_format
    }

    /// Whether the last CPU mapping aliased the surface storage.
    #[must_use]
    pub fn is_derived(&self) -> bool {
        self.state.lock().is_derived
    }

    /// Current number of outstanding mappings.
    #[must_use]
    pub fn map_count(&self) -> usize {
        self.state.lock().map_count
    }

    /// Map the surface for CPU access.
    ///
    /// A mapping may be taken again while one is outstanding only with the
    /// same flags, and never when those flags include `WRITE` without `VA`.
    /// With `VA` the mapping carries the surface handle instead of pixels.
    pub fn map(&self, flags: MapFlags) -> VaResult<SurfaceMap<'_>> {
        let mut state = self.state.lock();

        if state.map_count > 0 {
            let handle_only = state.flags.contains(MapFlags::VA);
            let exclusive = flags.contains(MapFlags::WRITE) && !handle_only;
            if state.flags != flags || exclusive {
                warn!(
                    surface = %self.surface,
                    current = ?state.flags,
                    requested = ?flags,
                    "Surface already mapped with incompatible flags"
                );
                return Err(VaError::MapConflict {
                    current: state.flags,
                    requested: flags,
                });
            }
            let view = match state.region {
                Some(region) if !handle_only => MappedView::Bytes(region),
                _ => MappedView::Handle(self.surface),
            };
            state.map_count += 1;
            return Ok(SurfaceMap::new(self, view, flags));
        }

        state.is_dirty = flags.contains(MapFlags::WRITE);
        if flags.contains(MapFlags::VA) {
            state.flags = flags;
            state.map_count = 1;
            return Ok(SurfaceMap::new(self, MappedView::Handle(self.surface), flags));
        }

        match self.map_image(&mut state) {
            Ok(region) => {
                state.flags = flags;
                state.map_count = 1;
                trace!(surface = %self.surface, ?flags, derived = state.is_derived, "Mapped surface");
                Ok(SurfaceMap::new(self, MappedView::Bytes(region), flags))
            }
            Err(err) => {
                if let Some(image) = state.image.take() {
                    if let Err(destroy_err) = self.core.display.destroy_image(image.id) {
                        warn!(surface = %self.surface, %destroy_err, "Failed to release image after map failure");
                    }
                }
                state.clean();
                Err(err)
            }
        }
    }

    fn map_image(&self, state: &mut MapState) -> VaResult<MappedRegion> {
        let display = &self.core.display;
        display.sync_surface(self.surface)?;

        let image = match state.image.take() {
            Some(image) => image,
            None if self.format.use_derived => display.derive_image(self.surface)?,
            None => display.create_image(
                self.format.image_format,
                self.format.width,
                self.format.height,
            )?,
        };
        state.is_derived = self.format.use_derived;
        let image = state.image.insert(image);

        if !state.is_derived {
            display.get_image(self.surface, image)?;
        }
        let region = display.map_buffer(image)?;
        state.region = Some(region);
        Ok(region)
    }

    fn unmap(&self) -> VaResult<()> {
        let mut state = self.state.lock();
        if state.map_count == 0 {
            return Ok(());
        }
        state.map_count -= 1;
        if state.map_count > 0 {
            return Ok(());
        }
        if state.flags.contains(MapFlags::VA) {
            state.clean();
            return Ok(());
        }

        let display = &self.core.display;
        let mut result = Ok(());
        if let Some(image) = state.image.take() {
            if state.is_dirty && !state.is_derived {
                result = display.put_image(self.surface, &image);
            }
            let unmapped = display.unmap_buffer(&image);
            let destroyed = display.destroy_image(image.id);
            result = result.and(unmapped).and(destroyed);
        }
        state.clean();
        trace!(surface = %self.surface, "Unmapped surface");
        result
    }

    /// Read-only view of `size` bytes starting at `offset`; `None` means the
    /// rest of the memory.
    pub fn share(&self, offset: usize, size: Option<usize>) -> VaResult<SubMemory<'_>> {
        SubMemory::new(self, 0, self.size(), offset, size)
    }

    /// Hand this memory back to its allocator's queue.
    pub(crate) fn recycle(self) {
        let core = Arc::clone(&self.core);
        if let Err(rejected) = core.available.push_group(vec![self]) {
            drop(rejected);
        }
    }
}

impl Drop for VaMemory {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(image) = state.image.take() {
            if let Err(err) = self.core.display.destroy_image(image.id) {
                warn!(surface = %self.surface, %err, "Failed to destroy cached image");
            }
        }
        destroy_surface(&self.core.display, self.surface);
        self.core.live.decrement();
    }
}

impl fmt::Debug for VaMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaMemory")
            .field("surface", &self.surface)
            .field("format", &self.format.image_format)
            .field("size", &self.format.size)
            .finish_non_exhaustive()
    }
}

/// An outstanding CPU mapping of a [`VaMemory`]. Unmaps on drop.
pub struct SurfaceMap<'a> {
    memory: &'a VaMemory,
    view: MappedView,
    flags: MapFlags,
    mapped: bool,
}

impl<'a> SurfaceMap<'a> {
    fn new(memory: &'a VaMemory, view: MappedView, flags: MapFlags) -> Self {
        Self {
            memory,
            view,
            flags,
            mapped: true,
        }
    }

    /// Flags the mapping was made with.
    #[must_use]
    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    /// The surface handle, for mappings made with [`MapFlags::VA`].
    #[must_use]
    pub fn surface_handle(&self) -> Option<SurfaceId> {
        match self.view {
            MappedView::Handle(surface) => Some(surface),
            MappedView::Bytes(_) => None,
        }
    }

    /// Writable pixels, for `WRITE` mappings.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self.view {
            MappedView::Bytes(region) if self.flags.contains(MapFlags::WRITE) => {
                // SAFETY: write mappings are exclusive (see `VaMemory::map`),
                // and the region stays mapped until this guard unmaps it.
                Some(unsafe { std::slice::from_raw_parts_mut(region.as_ptr().as_ptr(), region.len()) })
            }
            _ => None,
        }
    }

    /// Unmap now, reporting failures the drop path can only log.
    pub fn unmap(mut self) -> VaResult<()> {
        self.mapped = false;
        self.memory.unmap()
    }
}

impl Deref for SurfaceMap<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self.view {
            // SAFETY: the region stays mapped while any guard is alive, and
            // no writable guard can coexist with this one.
            MappedView::Bytes(region) => unsafe {
                std::slice::from_raw_parts(region.as_ptr().as_ptr(), region.len())
            },
            MappedView::Handle(_) => &[],
        }
    }
}

impl Drop for SurfaceMap<'_> {
    fn drop(&mut self) {
        if self.mapped {
            if let Err(err) = self.memory.unmap() {
                warn!(surface = %self.memory.surface, %err, "Unmap failed");
            }
        }
    }
}

/// Read-only sub-range of a [`VaMemory`].
#[derive(Debug, Clone, Copy)]
pub struct SubMemory<'a> {
    parent: &'a VaMemory,
    offset: usize,
    size: usize,
}

impl<'a> SubMemory<'a> {
    fn new(
        parent: &'a VaMemory,
        base: usize,
        available: usize,
        offset: usize,
        size: Option<usize>,
    ) -> VaResult<Self> {
        let out_of_range = || VaError::OutOfRange {
            offset,
            size: size.unwrap_or(0),
            max: available,
        };
        let size = match size {
            Some(size) => size,
            None => available.checked_sub(offset).ok_or_else(out_of_range)?,
        };
        match offset.checked_add(size) {
            Some(end) if end <= available => Ok(Self {
                parent,
                offset: base + offset,
                size,
            }),
            _ => Err(out_of_range()),
        }
    }

    /// Memory this view narrows.
    #[must_use]
    pub fn parent(&self) -> &'a VaMemory {
        self.parent
    }

    /// Offset into the parent memory.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Narrow further; offsets are relative to this view.
    pub fn share(&self, offset: usize, size: Option<usize>) -> VaResult<SubMemory<'a>> {
        SubMemory::new(self.parent, self.offset, self.size, offset, size)
    }

    /// Map the parent and expose only this range. Writing is refused.
    pub fn map(&self, flags: MapFlags) -> VaResult<SubMap<'a>> {
        if flags.contains(MapFlags::WRITE) {
            return Err(VaError::ReadOnly);
        }
        let inner = self.parent.map(flags)?;
        Ok(SubMap {
            inner,
            offset: self.offset,
            size: self.size,
        })
    }
}

/// Mapping of a [`SubMemory`].
pub struct SubMap<'a> {
    inner: SurfaceMap<'a>,
    offset: usize,
    size: usize,
}

impl Deref for SubMap<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let bytes: &[u8] = &self.inner;
        let start = self.offset.min(bytes.len());
        let end = self.offset.saturating_add(self.size).min(bytes.len());
        &bytes[start..end]
    }
}
