//! DMA-BUF allocator: each surface is exported and carried as one memory
//! per exported object.

use std::fmt;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};
use va_core::driver::{
    ExportFlags, ExternalBuffers, PrimeSurfaceDescriptor, SurfaceId, SurfaceRequest, UsageHint,
};
use va_core::error::{VaError, VaResult};
use va_core::format::{PlaneLayout, VideoFormat, MAX_PLANES};
use va_core::video::VideoInfo;

use super::queue::{AvailableQueue, WaitMode};
use crate::buffer::Buffer;
use crate::display::Display;
use crate::memory::dmabuf::DmabufMemory;
use crate::memory::Memory;
use crate::shared::{destroy_surface, LiveSurfaces, SharedSurface};

#[derive(Debug, Clone)]
struct Negotiated {
    info: VideoInfo,
    usage_hint: UsageHint,
}

pub(crate) struct DmabufCore {
    pub(crate) display: Display,
    pub(crate) available: AvailableQueue<DmabufMemory>,
    pub(crate) live: LiveSurfaces,
    negotiated: RwLock<Option<Negotiated>>,
}

/// One exported surface.
struct Exported {
    memories: Vec<DmabufMemory>,
    layout: PlaneLayout,
}

/// Export flags for `format`: packed 4:2:2 is exported as one composed
/// layer, everything else as one layer per plane.
fn export_flags(format: VideoFormat) -> ExportFlags {
    let layers = if format.is_packed_422() {
        ExportFlags::COMPOSED_LAYERS
    } else {
        ExportFlags::SEPARATE_LAYERS
    };
    layers | ExportFlags::READ_WRITE
}

/// Object size, querying the descriptor when the driver reported none.
fn object_size(fd: OwnedFd, reported: u64) -> VaResult<(OwnedFd, usize)> {
    if reported > 0 {
        let size = usize::try_from(reported).map_err(|_| VaError::SizeOverflow {
            context: "exported object size",
        })?;
        return Ok((fd, size));
    }
    let mut file = File::from(fd);
    let end = file.seek(SeekFrom::End(0))?;
    file.rewind()?;
    let size = usize::try_from(end).map_err(|_| VaError::SizeOverflow {
        context: "exported object size",
    })?;
    Ok((OwnedFd::from(file), size))
}

/// Plane layout of an export: plane offsets count from the start of the
/// first object, as if the objects were laid out back to back.
fn export_layout(desc: &PrimeSurfaceDescriptor, sizes: &[usize]) -> VaResult<PlaneLayout> {
    let mut layout = PlaneLayout {
        size: sizes.iter().sum(),
        ..PlaneLayout::default()
    };
    let planes = desc.layers.iter().flat_map(|layer| layer.planes.iter());
    for (i, plane) in planes.enumerate().take(MAX_PLANES) {
        let base: usize = sizes
            .get(..plane.object_index)
            .ok_or_else(|| {
                VaError::ExportMismatch(format!("plane {i} refers to missing object"))
            })?
            .iter()
            .sum();
        layout.offset[i] = base + plane.offset;
        layout.stride[i] = plane.pitch;
        layout.n_planes = i + 1;
    }
    Ok(layout)
}

/// Allocator of exported surfaces.
///
/// Every plane memory of one surface shares a [`SharedSurface`]; the
/// surface counts once toward the format lock however many memories it
/// was split into.
pub struct DmabufAllocator {
    core: Arc<DmabufCore>,
}

impl DmabufAllocator {
    /// Allocator exporting surfaces from `display`.
    #[must_use]
    pub fn new(display: Display) -> Self {
        Self {
            core: Arc::new(DmabufCore {
                display,
                available: AvailableQueue::new(DmabufMemory::same_surface),
                live: LiveSurfaces::default(),
                negotiated: RwLock::new(None),
            }),
        }
    }

    /// Device the surfaces come from.
    #[must_use]
    pub fn display(&self) -> &Display {
        &self.core.display
    }

    /// Commit `info`, probing the export layout with a throwaway surface.
    ///
    /// Same locking rules as [`SurfaceAllocator::set_format`](super::SurfaceAllocator::set_format).
    pub fn set_format(&self, info: &VideoInfo, usage_hint: UsageHint) -> VaResult<VideoInfo> {
        let mut negotiated = self.core.negotiated.write();

        let live = self.core.live.get();
        if live > 0 {
            return match negotiated.as_ref() {
                Some(committed)
                    if committed.info.format == info.format
                        && committed.info.width == info.width
                        && committed.info.height == info.height
                        && committed.usage_hint == usage_hint =>
                {
                    Ok(committed.info.clone())
                }
                committed => {
                    let committed = committed
                        .map(|c| format!("{} {}x{}", c.info.format, c.info.width, c.info.height))
                        .unwrap_or_else(|| "nothing".to_string());
                    let requested = format!("{} {}x{}", info.format, info.width, info.height);
                    warn!(%committed, %requested, live, "Format change refused");
                    Err(VaError::FormatLocked {
                        committed,
                        requested,
                        live,
                    })
                }
            };
        }

        let probe = self.export(info, usage_hint, false)?;
        let mut committed = info.clone();
        committed.set_layout(&probe.layout);
        drop(probe.memories);

        info!(
            format = %info.format,
            width = info.width,
            height = info.height,
            size = committed.size,
            "Negotiated exported surface format"
        );
        *negotiated = Some(Negotiated {
            info: committed.clone(),
            usage_hint,
        });
        Ok(committed)
    }

    /// Create and export one surface; pooled exports count toward the
    /// format lock, probes do not.
    fn export(&self, info: &VideoInfo, usage_hint: UsageHint, pooled: bool) -> VaResult<Exported> {
        let format = info.format;
        let (Some(fourcc), Some(chroma)) = (format.fourcc(), format.chroma()) else {
            error!(%format, "Unsupported format");
            return Err(VaError::UnsupportedFormat(format));
        };

        let display = &self.core.display;
        let surface = display.create_surface(&SurfaceRequest {
            chroma,
            fourcc: Some(fourcc),
            width: info.width,
            height: info.height,
            usage_hint,
            external: None,
        })?;

        let desc = match display.export_surface(surface, export_flags(format)) {
            Ok(desc) => desc,
            Err(err) => {
                destroy_surface(display, surface);
                return Err(err);
            }
        };
        if desc.layers.len() != info.n_planes() || desc.fourcc != fourcc {
            error!(
                %surface,
                expected_fourcc = %fourcc,
                exported_fourcc = %desc.fourcc,
                layers = desc.layers.len(),
                planes = info.n_planes(),
                "Exported surface does not match the requested format"
            );
            destroy_surface(display, surface);
            return Err(VaError::ExportMismatch(format!(
                "{} with {} layers exported for {} with {} planes",
                desc.fourcc,
                desc.layers.len(),
                fourcc,
                info.n_planes()
            )));
        }

        self.wrap_export(surface, desc, pooled)
    }

    fn wrap_export(
        &self,
        surface: SurfaceId,
        mut desc: PrimeSurfaceDescriptor,
        pooled: bool,
    ) -> VaResult<Exported> {
        // from here on dropping `shared` destroys the surface
        let shared = SharedSurface::new(
            self.core.display.clone(),
            surface,
            pooled.then(|| self.core.live.clone()),
        );
        let home = pooled.then(|| Arc::clone(&self.core));

        let objects = std::mem::take(&mut desc.objects);
        let mut sizes = Vec::with_capacity(objects.len());
        let mut memories = Vec::with_capacity(objects.len());
        for object in objects {
            let (fd, size) = object_size(object.fd, object.size)?;
            trace!(%surface, fd = fd.as_raw_fd(), size, "Exported object");
            sizes.push(size);
            memories.push(DmabufMemory::new(
                fd,
                size,
                object.drm_format_modifier,
                shared.add_plane(),
                home.clone(),
            ));
        }
        drop(shared);

        let layout = export_layout(&desc, &sizes)?;
        Ok(Exported { memories, layout })
    }

    /// Committed info and usage hint.
    #[must_use]
    pub fn format(&self) -> Option<(VideoInfo, UsageHint)> {
        self.core
            .negotiated
            .read()
            .as_ref()
            .map(|n| (n.info.clone(), n.usage_hint))
    }

    /// Fill an empty buffer with the memories of a freshly exported surface.
    pub fn setup_buffer(&self, buffer: &mut Buffer) -> VaResult<()> {
        let negotiated = self.core.negotiated.read();
        let committed = negotiated.as_ref().ok_or(VaError::NotNegotiated)?;
        let exported = self.export(&committed.info, committed.usage_hint, true)?;
        for memory in exported.memories {
            buffer.append_memory(Memory::Dmabuf(memory));
        }
        Ok(())
    }

    /// Fill an empty buffer with every recycled memory of one surface.
    pub fn prepare_buffer(&self, buffer: &mut Buffer, mode: WaitMode) -> VaResult<()> {
        let group = self.core.available.pop_group(mode)?;
        if let Some(first) = group.first() {
            trace!(surface = %first.surface(), planes = group.len(), "Reusing exported surface");
        }
        for memory in group {
            buffer.append_memory(Memory::Dmabuf(memory));
        }
        Ok(())
    }

    /// Drop every recycled memory and wake blocked `prepare_buffer` calls.
    pub fn flush(&self) {
        let drained = self.core.available.drain();
        let count = drained.len();
        drop(drained);
        debug!(memories = count, live = self.core.live.get(), "Flushed exported surfaces");
    }

    /// Surfaces alive under the committed format.
    #[must_use]
    pub fn surface_count(&self) -> usize {
        self.core.live.get()
    }

    pub(crate) fn available_groups(&self) -> usize {
        self.core.available.groups()
    }
}

impl Drop for DmabufAllocator {
    fn drop(&mut self) {
        drop(self.core.available.close());
        let live = self.core.live.get();
        if live > 0 {
            debug!(live, "Allocator dropped with exported surfaces in use");
        }
    }
}

impl fmt::Debug for DmabufAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmabufAllocator")
            .field("display", &self.core.display)
            .field("live", &self.core.live)
            .field("negotiated", &*self.core.negotiated.read())
            .finish()
    }
}

/// Wrap externally produced DMA-BUF planes as a surface.
///
/// `planes` holds one descriptor per plane of `info`; strides and offsets
/// come from `info` and count from the start of the first descriptor. The
/// descriptors are duplicated, so the caller keeps ownership of its own.
/// Imported memories never enter an allocator queue: the surface is
/// destroyed when the last of them is dropped.
pub fn import_dmabuf(
    display: &Display,
    info: &VideoInfo,
    planes: &[BorrowedFd<'_>],
    usage_hint: UsageHint,
) -> VaResult<Vec<DmabufMemory>> {
    let format = info.format;
    let (Some(fourcc), Some(chroma)) = (format.fourcc(), format.chroma()) else {
        error!(%format, "Unsupported format for import");
        return Err(VaError::UnsupportedFormat(format));
    };
    let n_planes = info.n_planes();
    if planes.len() != n_planes {
        return Err(VaError::InvalidConfig(format!(
            "{format} needs {n_planes} plane descriptors, got {}",
            planes.len()
        )));
    }

    let external = ExternalBuffers {
        pixel_format: fourcc,
        width: info.width,
        height: info.height,
        data_size: info.size,
        pitches: info.stride[..n_planes].to_vec(),
        offsets: info.offset[..n_planes].to_vec(),
        fds: planes.iter().map(AsRawFd::as_raw_fd).collect(),
    };
    let surface = display.create_surface(&SurfaceRequest {
        chroma,
        fourcc: Some(fourcc),
        width: info.width,
        height: info.height,
        usage_hint,
        external: Some(external),
    })?;
    let shared = SharedSurface::new(display.clone(), surface, None);

    let mut memories = Vec::with_capacity(n_planes);
    for plane in planes {
        let (fd, size) = object_size(plane.try_clone_to_owned()?, 0)?;
        memories.push(DmabufMemory::new(fd, size, 0, shared.add_plane(), None));
    }
    debug!(%surface, %format, planes = n_planes, "Imported DMA-BUF surface");
    Ok(memories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;
    use va_core::driver::MapFlags;
    use va_driver_mock::{Fault, MockConfig, MockDriver, MockHandle};

    fn allocator(config: MockConfig) -> (DmabufAllocator, MockHandle) {
        let driver = MockDriver::new(config);
        let handle = driver.handle();
        (DmabufAllocator::new(Display::new(driver)), handle)
    }

    #[test]
    fn test_probe_sums_object_sizes() {
        let (alloc, handle) = allocator(MockConfig::default());
        let info = VideoInfo::new(VideoFormat::Nv12, 64, 64).unwrap();
        let committed = alloc.set_format(&info, UsageHint::Export).unwrap();

        let object = 64 * 64 * 3 / 2;
        assert_eq!(committed.size, 2 * object);
        assert_eq!(committed.offset[0], 0);
        // second object follows the first
        assert_eq!(committed.offset[1], object + 64 * 64);
        assert_eq!(committed.stride[1], 64);
        // probe surface is destroyed and not counted
        assert_eq!(alloc.surface_count(), 0);
        assert_eq!(handle.live_surfaces(), 0);
    }

    #[test]
    fn test_packed_422_exports_composed() {
        let (alloc, handle) = allocator(MockConfig::default().with_export_size(false));
        let info = VideoInfo::new(VideoFormat::Yuy2, 64, 16).unwrap();
        let committed = alloc.set_format(&info, UsageHint::Generic).unwrap();
        // size queried from the descriptor
        assert_eq!(committed.size, 128 * 16);
        assert_eq!(handle.export_calls(), 1);
    }

    #[test]
    fn test_planes_share_one_surface() {
        let (alloc, handle) = allocator(MockConfig::default());
        let info = VideoInfo::new(VideoFormat::I420, 64, 64).unwrap();
        alloc.set_format(&info, UsageHint::Generic).unwrap();

        let mut buffer = Buffer::new();
        alloc.setup_buffer(&mut buffer).unwrap();
        assert_eq!(buffer.n_memory(), 3);
        assert_eq!(alloc.surface_count(), 1);

        let first = buffer.memory(0).and_then(Memory::as_dmabuf).unwrap();
        assert_eq!(first.shared_surface().ref_count(), 3);
        assert!(buffer
            .memories()
            .iter()
            .all(|m| m.surface() == first.surface()));

        buffer.discard_all_memory();
        assert_eq!(alloc.surface_count(), 0);
        assert_eq!(handle.surfaces_destroyed(), 2);
    }

    #[test]
    fn test_recycled_group_stays_together() {
        let (alloc, _handle) = allocator(MockConfig::default());
        let info = VideoInfo::new(VideoFormat::Nv12, 64, 64).unwrap();
        alloc.set_format(&info, UsageHint::Generic).unwrap();

        let mut a = Buffer::new();
        alloc.setup_buffer(&mut a).unwrap();
        let mut b = Buffer::new();
        alloc.setup_buffer(&mut b).unwrap();
        let (sa, sb) = (a.surface(), b.surface());
        drop(a);
        drop(b);
        assert_eq!(alloc.available_groups(), 2);

        let mut out = Buffer::new();
        alloc.prepare_buffer(&mut out, WaitMode::DontWait).unwrap();
        assert_eq!(out.n_memory(), 2);
        assert_eq!(out.surface(), sb);
        let mut out2 = Buffer::new();
        alloc.prepare_buffer(&mut out2, WaitMode::DontWait).unwrap();
        assert_eq!(out2.surface(), sa);
    }

    #[test]
    fn test_export_failure_destroys_surface() {
        let (alloc, handle) = allocator(MockConfig::default());
        handle.set_fault(Fault::ExportSurface, true);
        let info = VideoInfo::new(VideoFormat::Nv12, 64, 64).unwrap();
        assert!(alloc.set_format(&info, UsageHint::Generic).is_err());
        assert_eq!(handle.live_surfaces(), 0);
    }

    #[test]
    fn test_format_without_fourcc_rejected() {
        let (alloc, _handle) = allocator(MockConfig::default());
        let info = VideoInfo::new(VideoFormat::Bgr, 64, 64).unwrap();
        assert!(matches!(
            alloc.set_format(&info, UsageHint::Generic),
            Err(VaError::UnsupportedFormat(VideoFormat::Bgr))
        ));
    }

    #[test]
    fn test_exported_plane_maps_surface_bytes() {
        let (alloc, _handle) = allocator(MockConfig::default());
        let info = VideoInfo::new(VideoFormat::Nv12, 64, 64).unwrap();
        alloc.set_format(&info, UsageHint::Generic).unwrap();
        let mut buffer = Buffer::new();
        alloc.setup_buffer(&mut buffer).unwrap();

        let luma = buffer.memory(0).unwrap();
        {
            let mut map = luma.map(MapFlags::WRITE).unwrap();
            map.as_mut_slice().unwrap()[64 * 64] = 0x42;
        }
        // both objects refer to the same storage
        let chroma = buffer.memory(1).unwrap();
        assert_eq!(chroma.map(MapFlags::READ).unwrap()[64 * 64], 0x42);
    }

    #[test]
    fn test_import_is_not_pooled() {
        let driver = MockDriver::default();
        let handle = driver.handle();
        let display = Display::new(driver);
        let info = VideoInfo::new(VideoFormat::Nv12, 64, 64).unwrap();

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&vec![0x11u8; info.size]).unwrap();
        let planes = [file.as_fd(), file.as_fd()];

        let memories = import_dmabuf(&display, &info, &planes, UsageHint::Generic).unwrap();
        assert_eq!(memories.len(), 2);
        assert!(memories.iter().all(|m| !m.is_pooled()));
        assert_eq!(memories[0].size(), info.size);
        assert_eq!(memories[0].map(MapFlags::READ).unwrap()[0], 0x11);

        drop(memories);
        assert_eq!(handle.live_surfaces(), 0);

        assert!(matches!(
            import_dmabuf(&display, &info, &planes[..1], UsageHint::Generic),
            Err(VaError::InvalidConfig(_))
        ));
    }
}
