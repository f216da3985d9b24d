//! `MockDriver` - software implementation of [`SurfaceDriver`].

use std::collections::HashMap;
use std::fs::File;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::ptr::NonNull;
use std::thread;
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, trace};
use va_core::driver::{
    status, BufferId, DecodePicture, ExportFlags, ExternalBuffers, Image, ImageId, MappedRegion,
    PrimeLayer, PrimeObject, PrimePlane, PrimeSurfaceDescriptor, SurfaceDriver, SurfaceId,
    SurfaceRequest,
};
use va_core::error::DriverError;
use va_core::format::{ChromaFormat, Fourcc, PlaneLayout, VideoFormat, MAX_PLANES};
use va_core::limits::MAX_FRAME_DIMENSION;

use crate::convert::{copy_frame, FrameMut, FrameRef};
use crate::handle::{Counters, DecodeRecord, Fault, MockHandle};

/// `DRM_FORMAT_MOD_LINEAR`
const DRM_FORMAT_MOD_LINEAR: u64 = 0;

/// Behaviour knobs of a [`MockDriver`].
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Whether `derive_image` succeeds (zero-copy mapping).
    pub derive_images: bool,
    /// Row pitch alignment in bytes.
    pub pitch_align: usize,
    /// Luma row count alignment.
    pub height_align: u32,
    /// How long `sync_surface` blocks after a decode submission.
    pub decode_latency: Duration,
    /// Report export object sizes (otherwise 0, forcing a size query).
    pub report_export_size: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            derive_images: true,
            pitch_align: 64,
            height_align: 16,
            decode_latency: Duration::ZERO,
            report_export_size: true,
        }
    }
}

impl MockConfig {
    /// Allow or refuse derived images.
    #[must_use]
    pub fn with_derive(mut self, derive_images: bool) -> Self {
        self.derive_images = derive_images;
        self
    }

    /// Row pitch and luma row alignment.
    #[must_use]
    pub fn with_alignment(mut self, pitch_align: usize, height_align: u32) -> Self {
        self.pitch_align = pitch_align;
        self.height_align = height_align;
        self
    }

    /// Delay `sync_surface` after a decode.
    #[must_use]
    pub fn with_decode_latency(mut self, latency: Duration) -> Self {
        self.decode_latency = latency;
        self
    }

    /// Whether exports report object sizes.
    #[must_use]
    pub fn with_export_size(mut self, report: bool) -> Self {
        self.report_export_size = report;
        self
    }
}

struct MockSurface {
    format: VideoFormat,
    width: u32,
    height: u32,
    layout: PlaneLayout,
    /// Anonymous file holding the pixels, shared with exports.
    file: File,
    storage: MmapMut,
    decode_pending: bool,
    derived_images: usize,
}

enum Backing {
    Owned(Box<[u8]>),
    Derived(SurfaceId),
}

struct MockImage {
    image: Image,
    format: VideoFormat,
    backing: Backing,
}

/// Driver-chosen format for surfaces created without a fourcc.
fn native_format(chroma: ChromaFormat) -> VideoFormat {
    match chroma {
        ChromaFormat::Yuv420 => VideoFormat::Nv12,
        ChromaFormat::Yuv422 => VideoFormat::Yuy2,
        ChromaFormat::Yuv444 => VideoFormat::Vuya,
        ChromaFormat::Yuv400 => VideoFormat::Gray8,
        ChromaFormat::Yuv420P10 => VideoFormat::P010,
        ChromaFormat::Yuv422P10 => VideoFormat::Y210,
        ChromaFormat::Yuv444P10 => VideoFormat::Y410,
        ChromaFormat::Rgb32 => VideoFormat::Bgra,
    }
}

fn fail(code: i32) -> DriverError {
    DriverError::from_status(code)
}

fn io_failure(err: std::io::Error) -> DriverError {
    DriverError::new(status::ERROR_ALLOCATION_FAILED, err.to_string())
}

fn anonymous_storage(size: usize) -> Result<(File, MmapMut), DriverError> {
    let file = tempfile::tempfile().map_err(io_failure)?;
    file.set_len(size as u64).map_err(io_failure)?;
    // SAFETY: the file is private to this surface and never truncated while
    // mapped.
    let storage = unsafe { MmapOptions::new().len(size).map_mut(&file) }.map_err(io_failure)?;
    Ok((file, storage))
}

fn imported_storage(external: &ExternalBuffers) -> Result<(File, MmapMut), DriverError> {
    let fd = *external
        .fds
        .first()
        .ok_or_else(|| fail(status::ERROR_INVALID_PARAMETER))?;
    // SAFETY: the caller keeps the descriptor open for the duration of the
    // call; we duplicate it before returning.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let file = File::from(borrowed.try_clone_to_owned().map_err(io_failure)?);
    // SAFETY: the importer promises `data_size` bytes of pixel storage.
    let storage = unsafe { MmapOptions::new().len(external.data_size).map_mut(&file) }
        .map_err(io_failure)?;
    Ok((file, storage))
}

/// Software surface driver.
///
/// Surfaces live in anonymous files mapped into the process, so derived
/// images, DMA-BUF exports and decode output all observe the same bytes.
///
/// # Example
///
/// ```rust,ignore
/// let driver = MockDriver::new(MockConfig::default().with_derive(false));
/// let handle = driver.handle();
/// let display = Display::new(driver);
/// assert_eq!(handle.live_surfaces(), 0);
/// ```
pub struct MockDriver {
    config: MockConfig,
    handle: MockHandle,
    next_id: u32,
    surfaces: HashMap<SurfaceId, MockSurface>,
    images: HashMap<ImageId, MockImage>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

impl MockDriver {
    /// Driver with `config` and a fresh handle.
    #[must_use]
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            handle: MockHandle::default(),
            next_id: 1,
            surfaces: HashMap::new(),
            images: HashMap::new(),
        }
    }

    /// Handle for counters and fault injection; stays valid after the
    /// driver is moved.
    #[must_use]
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    fn check_fault(&self, fault: Fault, code: i32) -> Result<(), DriverError> {
        if self.handle.faulted(fault) {
            debug!(?fault, "Injected driver failure");
            return Err(DriverError::new(code, format!("injected {fault:?} failure")));
        }
        Ok(())
    }

    fn counters(&self) -> &Counters {
        &self.handle.shared.counters
    }

    fn driver_layout(&self, format: VideoFormat, width: u32, height: u32) -> Option<PlaneLayout> {
        format.layout(width, height, self.config.pitch_align, self.config.height_align)
    }

    fn surface(&self, surface: SurfaceId) -> Result<&MockSurface, DriverError> {
        self.surfaces
            .get(&surface)
            .ok_or_else(|| fail(status::ERROR_INVALID_SURFACE))
    }

    fn new_image(
        &mut self,
        format: VideoFormat,
        width: u32,
        height: u32,
        layout: PlaneLayout,
        backing: Backing,
    ) -> Result<Image, DriverError> {
        let fourcc = format
            .fourcc()
            .ok_or_else(|| fail(status::ERROR_INVALID_IMAGE_FORMAT))?;
        let id = self.next_id();
        let image = Image {
            id: ImageId(id),
            buf: BufferId(id),
            fourcc,
            width,
            height,
            data_size: layout.size,
            num_planes: layout.n_planes,
            pitches: layout.stride,
            offsets: layout.offset,
        };
        self.images.insert(
            image.id,
            MockImage {
                image: image.clone(),
                format,
                backing,
            },
        );
        Counters::bump(&self.counters().images_created);
        Ok(image)
    }

    /// Copy between a surface and an owned image, in either direction.
    fn transfer(
        &mut self,
        surface: SurfaceId,
        image: &Image,
        to_image: bool,
    ) -> Result<(), DriverError> {
        let surf = self
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| fail(status::ERROR_INVALID_SURFACE))?;
        let img = self
            .images
            .get_mut(&image.id)
            .ok_or_else(|| fail(status::ERROR_INVALID_IMAGE))?;

        let data = match &mut img.backing {
            Backing::Derived(owner) if *owner == surface => return Ok(()),
            Backing::Derived(_) => return Err(fail(status::ERROR_OPERATION_FAILED)),
            Backing::Owned(data) => data,
        };

        let width = surf.width.min(img.image.width);
        let height = surf.height.min(img.image.height);
        let image_layout = img.image.layout();
        let copied = if to_image {
            copy_frame(
                &FrameRef {
                    format: surf.format,
                    layout: &surf.layout,
                    data: &surf.storage,
                },
                &mut FrameMut {
                    format: img.format,
                    layout: &image_layout,
                    data,
                },
                width,
                height,
            )
        } else {
            copy_frame(
                &FrameRef {
                    format: img.format,
                    layout: &image_layout,
                    data,
                },
                &mut FrameMut {
                    format: surf.format,
                    layout: &surf.layout,
                    data: &mut surf.storage,
                },
                width,
                height,
            )
        };

        if copied {
            Ok(())
        } else {
            Err(fail(status::ERROR_INVALID_IMAGE_FORMAT))
        }
    }
}

impl SurfaceDriver for MockDriver {
    fn vendor(&self) -> &str {
        "Mock VA driver"
    }

    fn create_surfaces(
        &mut self,
        request: &SurfaceRequest,
        count: usize,
    ) -> Result<Vec<SurfaceId>, DriverError> {
        self.check_fault(Fault::CreateSurfaces, status::ERROR_ALLOCATION_FAILED)?;

        let (width, height) = (request.width, request.height);
        if width == 0 || height == 0 || width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION
        {
            return Err(fail(status::ERROR_RESOLUTION_NOT_SUPPORTED));
        }

        let format = match request.fourcc {
            Some(fourcc) => {
                VideoFormat::from_fourcc(fourcc)
                    .ok_or_else(|| fail(status::ERROR_INVALID_IMAGE_FORMAT))?
            }
            None => native_format(request.chroma),
        };
        if format.chroma() != Some(request.chroma) {
            return Err(fail(status::ERROR_UNSUPPORTED_RT_FORMAT));
        }

        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let (layout, file, storage) = match &request.external {
                Some(external) => {
                    if external.pitches.len() < format.n_planes()
                        || external.offsets.len() < format.n_planes()
                    {
                        return Err(fail(status::ERROR_INVALID_PARAMETER));
                    }
                    let mut layout = PlaneLayout {
                        n_planes: format.n_planes(),
                        size: external.data_size,
                        ..PlaneLayout::default()
                    };
                    for i in 0..layout.n_planes.min(MAX_PLANES) {
                        layout.stride[i] = external.pitches[i];
                        layout.offset[i] = external.offsets[i];
                    }
                    let (file, storage) = imported_storage(external)?;
                    (layout, file, storage)
                }
                None => {
                    let layout = self
                        .driver_layout(format, width, height)
                        .ok_or_else(|| fail(status::ERROR_ALLOCATION_FAILED))?;
                    let (file, storage) = anonymous_storage(layout.size)?;
                    (layout, file, storage)
                }
            };

            let id = SurfaceId(self.next_id());
            self.surfaces.insert(
                id,
                MockSurface {
                    format,
                    width,
                    height,
                    layout,
                    file,
                    storage,
                    decode_pending: false,
                    derived_images: 0,
                },
            );
            Counters::bump(&self.counters().surfaces_created);
            trace!(surface = %id, %format, width, height, hint = ?request.usage_hint, "mock surface created");
            created.push(id);
        }
        Ok(created)
    }

    fn destroy_surfaces(&mut self, surfaces: &[SurfaceId]) -> Result<(), DriverError> {
        for id in surfaces {
            let surface = self.surface(*id)?;
            if surface.derived_images > 0 {
                return Err(fail(status::ERROR_SURFACE_BUSY));
            }
        }
        for id in surfaces {
            self.surfaces.remove(id);
            Counters::bump(&self.counters().surfaces_destroyed);
        }
        Ok(())
    }

    fn derive_image(&mut self, surface: SurfaceId) -> Result<Image, DriverError> {
        Counters::bump(&self.counters().derive_calls);
        self.check_fault(Fault::DeriveImage, status::ERROR_OPERATION_FAILED)?;
        if !self.config.derive_images {
            return Err(fail(status::ERROR_OPERATION_FAILED));
        }

        let surf = self.surface(surface)?;
        let (format, width, height, layout) = (surf.format, surf.width, surf.height, surf.layout);
        let image = self.new_image(format, width, height, layout, Backing::Derived(surface))?;
        if let Some(surf) = self.surfaces.get_mut(&surface) {
            surf.derived_images += 1;
        }
        Ok(image)
    }

    fn create_image(
        &mut self,
        fourcc: Fourcc,
        width: u32,
        height: u32,
    ) -> Result<Image, DriverError> {
        self.check_fault(Fault::CreateImage, status::ERROR_ALLOCATION_FAILED)?;
        let format = VideoFormat::from_fourcc(fourcc)
            .ok_or_else(|| fail(status::ERROR_INVALID_IMAGE_FORMAT))?;
        let layout = self
            .driver_layout(format, width, height)
            .ok_or_else(|| fail(status::ERROR_ALLOCATION_FAILED))?;
        let data = vec![0u8; layout.size].into_boxed_slice();
        self.new_image(format, width, height, layout, Backing::Owned(data))
    }

    fn destroy_image(&mut self, image: ImageId) -> Result<(), DriverError> {
        let removed = self
            .images
            .remove(&image)
            .ok_or_else(|| fail(status::ERROR_INVALID_IMAGE))?;
        if let Backing::Derived(owner) = removed.backing {
            if let Some(surf) = self.surfaces.get_mut(&owner) {
                surf.derived_images = surf.derived_images.saturating_sub(1);
            }
        }
        Counters::bump(&self.counters().images_destroyed);
        Ok(())
    }

    fn get_image(&mut self, surface: SurfaceId, image: &Image) -> Result<(), DriverError> {
        Counters::bump(&self.counters().get_image_calls);
        self.check_fault(Fault::GetImage, status::ERROR_OPERATION_FAILED)?;
        self.transfer(surface, image, true)
    }

    fn put_image(&mut self, surface: SurfaceId, image: &Image) -> Result<(), DriverError> {
        Counters::bump(&self.counters().put_image_calls);
        self.check_fault(Fault::PutImage, status::ERROR_OPERATION_FAILED)?;
        self.transfer(surface, image, false)
    }

    fn sync_surface(&mut self, surface: SurfaceId) -> Result<(), DriverError> {
        Counters::bump(&self.counters().sync_calls);
        let latency = self.config.decode_latency;
        let surf = self
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| fail(status::ERROR_INVALID_SURFACE))?;
        if surf.decode_pending {
            if !latency.is_zero() {
                thread::sleep(latency);
            }
            surf.decode_pending = false;
        }
        Ok(())
    }

    fn map_buffer(&mut self, buffer: BufferId) -> Result<MappedRegion, DriverError> {
        self.check_fault(Fault::MapBuffer, status::ERROR_OPERATION_FAILED)?;
        let img = self
            .images
            .values_mut()
            .find(|img| img.image.buf == buffer)
            .ok_or_else(|| fail(status::ERROR_INVALID_BUFFER))?;

        let (ptr, len) = match &mut img.backing {
            Backing::Owned(data) => (data.as_mut_ptr(), data.len()),
            Backing::Derived(owner) => {
                let surf = self
                    .surfaces
                    .get_mut(owner)
                    .ok_or_else(|| fail(status::ERROR_INVALID_SURFACE))?;
                (surf.storage.as_mut_ptr(), surf.storage.len())
            }
        };
        let ptr = NonNull::new(ptr).ok_or_else(|| fail(status::ERROR_INVALID_BUFFER))?;
        // SAFETY: owned image data and surface mappings are heap/mmap
        // allocations whose address is stable until the image or surface is
        // destroyed, and a derived image keeps its surface busy.
        Ok(unsafe { MappedRegion::new(ptr, len) })
    }

    fn unmap_buffer(&mut self, buffer: BufferId) -> Result<(), DriverError> {
        if self.images.values().any(|img| img.image.buf == buffer) {
            Ok(())
        } else {
            Err(fail(status::ERROR_INVALID_BUFFER))
        }
    }

    fn export_surface(
        &mut self,
        surface: SurfaceId,
        flags: ExportFlags,
    ) -> Result<PrimeSurfaceDescriptor, DriverError> {
        Counters::bump(&self.counters().export_calls);
        self.check_fault(Fault::ExportSurface, status::ERROR_OPERATION_FAILED)?;
        let report_size = self.config.report_export_size;
        let surf = self.surface(surface)?;
        let fourcc = surf
            .format
            .fourcc()
            .ok_or_else(|| fail(status::ERROR_INVALID_IMAGE_FORMAT))?;
        let object_size = if report_size {
            surf.storage.len() as u64
        } else {
            0
        };
        let export_fd = |file: &File| -> Result<PrimeObject, DriverError> {
            let fd: OwnedFd = file.try_clone().map_err(io_failure)?.into();
            Ok(PrimeObject {
                fd,
                size: object_size,
                drm_format_modifier: DRM_FORMAT_MOD_LINEAR,
            })
        };

        let n_planes = surf.layout.n_planes;
        let (objects, layers) = if flags.contains(ExportFlags::COMPOSED_LAYERS) {
            let planes = (0..n_planes)
                .map(|i| PrimePlane {
                    object_index: 0,
                    offset: surf.layout.offset[i],
                    pitch: surf.layout.stride[i],
                })
                .collect();
            (
                vec![export_fd(&surf.file)?],
                vec![PrimeLayer {
                    drm_format: fourcc.0,
                    planes,
                }],
            )
        } else {
            // one descriptor per plane, all referring to the same storage
            let mut objects = Vec::with_capacity(n_planes);
            let mut layers = Vec::with_capacity(n_planes);
            for i in 0..n_planes {
                objects.push(export_fd(&surf.file)?);
                layers.push(PrimeLayer {
                    drm_format: fourcc.0,
                    planes: vec![PrimePlane {
                        object_index: i,
                        offset: surf.layout.offset[i],
                        pitch: surf.layout.stride[i],
                    }],
                });
            }
            (objects, layers)
        };

        Ok(PrimeSurfaceDescriptor {
            fourcc,
            width: surf.width,
            height: surf.height,
            objects,
            layers,
        })
    }

    fn submit_decode(
        &mut self,
        surface: SurfaceId,
        picture: &DecodePicture,
    ) -> Result<(), DriverError> {
        self.check_fault(Fault::SubmitDecode, status::ERROR_OPERATION_FAILED)?;
        let surf = self
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| fail(status::ERROR_INVALID_SURFACE))?;

        // "decode": slice payloads land at the start of the surface
        let mut cursor = 0usize;
        for slice in &picture.slices {
            let end = (cursor + slice.data.len()).min(surf.storage.len());
            let n = end - cursor;
            surf.storage[cursor..end].copy_from_slice(&slice.data[..n]);
            cursor = end;
        }
        surf.decode_pending = true;

        self.handle.shared.decodes.lock().push(DecodeRecord {
            surface,
            codec: picture.codec,
            param_bytes: picture.params.iter().map(|p| p.data.len()).sum(),
            slices: picture.slices.len(),
            slice_bytes: picture.slices.iter().map(|s| s.data.len()).sum(),
        });
        Ok(())
    }
}

impl Drop for MockDriver {
    fn drop(&mut self) {
        if !self.surfaces.is_empty() {
            debug!(leaked = self.surfaces.len(), "Mock driver dropped with live surfaces");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use va_core::driver::{Codec, ParamKind, UsageHint};

    fn request(chroma: ChromaFormat, fourcc: Option<&[u8; 4]>, w: u32, h: u32) -> SurfaceRequest {
        SurfaceRequest {
            chroma,
            fourcc: fourcc.map(Fourcc::from_bytes),
            width: w,
            height: h,
            usage_hint: UsageHint::Generic,
            external: None,
        }
    }

    #[test]
    fn test_create_and_destroy_counts() {
        let mut driver = MockDriver::default();
        let handle = driver.handle();
        let ids = driver
            .create_surfaces(&request(ChromaFormat::Yuv420, None, 64, 64), 3)
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(handle.live_surfaces(), 3);
        driver.destroy_surfaces(&ids).unwrap();
        assert_eq!(handle.live_surfaces(), 0);
        assert!(driver.destroy_surfaces(&ids[..1]).is_err());
    }

    #[test]
    fn test_fourcc_must_match_chroma() {
        let mut driver = MockDriver::default();
        let err = driver
            .create_surfaces(&request(ChromaFormat::Yuv422, Some(b"NV12"), 64, 64), 1)
            .unwrap_err();
        assert_eq!(err.code, status::ERROR_UNSUPPORTED_RT_FORMAT);
    }

    #[test]
    fn test_derived_image_aliases_surface() {
        let mut driver = MockDriver::default();
        let surface = driver
            .create_surfaces(&request(ChromaFormat::Yuv420, None, 64, 32), 1)
            .unwrap()[0];
        let image = driver.derive_image(surface).unwrap();
        assert_eq!(image.fourcc, Fourcc::from_bytes(b"NV12"));
        assert_eq!(image.pitches[0], 64);

        let region = driver.map_buffer(image.buf).unwrap();
        // SAFETY: test-only write inside the mapped region
        unsafe { region.as_ptr().as_ptr().write(0xAB) };
        assert_eq!(driver.surfaces[&surface].storage[0], 0xAB);

        // busy while derived
        assert_eq!(
            driver.destroy_surfaces(&[surface]).unwrap_err().code,
            status::ERROR_SURFACE_BUSY
        );
        driver.unmap_buffer(image.buf).unwrap();
        driver.destroy_image(image.id).unwrap();
        driver.destroy_surfaces(&[surface]).unwrap();
    }

    #[test]
    fn test_derive_disabled() {
        let mut driver = MockDriver::new(MockConfig::default().with_derive(false));
        let surface = driver
            .create_surfaces(&request(ChromaFormat::Yuv420, None, 64, 32), 1)
            .unwrap()[0];
        assert!(driver.derive_image(surface).is_err());
        assert_eq!(driver.handle().derive_calls(), 1);
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let mut driver = MockDriver::new(MockConfig::default().with_derive(false));
        let surface = driver
            .create_surfaces(&request(ChromaFormat::Yuv420, None, 32, 16), 1)
            .unwrap()[0];
        let upload = driver
            .create_image(Fourcc::from_bytes(b"I420"), 32, 16)
            .unwrap();
        if let Some(MockImage {
            backing: Backing::Owned(data),
            ..
        }) = driver.images.get_mut(&upload.id)
        {
            data.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
        }
        driver.put_image(surface, &upload).unwrap();

        let download = driver
            .create_image(Fourcc::from_bytes(b"I420"), 32, 16)
            .unwrap();
        driver.get_image(surface, &download).unwrap();

        let (up, down) = match (
            &driver.images[&upload.id].backing,
            &driver.images[&download.id].backing,
        ) {
            (Backing::Owned(a), Backing::Owned(b)) => (a.clone(), b.clone()),
            _ => unreachable!(),
        };
        // visible luma and both chroma planes survive the NV12 detour
        let visible = |buf: &[u8], plane: usize, rows: usize, bytes: usize| -> Vec<u8> {
            (0..rows)
                .flat_map(|row| {
                    let start = upload.offsets[plane] + row * upload.pitches[plane];
                    buf[start..start + bytes].to_vec()
                })
                .collect()
        };
        assert_eq!(visible(&up, 0, 16, 32), visible(&down, 0, 16, 32));
        assert_eq!(visible(&up, 1, 8, 16), visible(&down, 1, 8, 16));
        assert_eq!(visible(&up, 2, 8, 16), visible(&down, 2, 8, 16));
    }

    #[test]
    fn test_separate_export_has_object_per_plane() {
        let mut driver = MockDriver::default();
        let surface = driver
            .create_surfaces(&request(ChromaFormat::Yuv420, None, 64, 64), 1)
            .unwrap()[0];
        let desc = driver
            .export_surface(surface, ExportFlags::SEPARATE_LAYERS | ExportFlags::READ_WRITE)
            .unwrap();
        assert_eq!(desc.objects.len(), 2);
        assert_eq!(desc.layers.len(), 2);
        assert_eq!(desc.layers[1].planes[0].object_index, 1);
        assert_eq!(desc.layers[1].planes[0].offset, 64 * 64);
        assert!(desc.objects.iter().all(|o| o.size == (64 * 64 * 3 / 2) as u64));
    }

    #[test]
    fn test_composed_export_single_object() {
        let mut driver = MockDriver::new(MockConfig::default().with_export_size(false));
        let surface = driver
            .create_surfaces(&request(ChromaFormat::Yuv422, None, 64, 16), 1)
            .unwrap()[0];
        let desc = driver
            .export_surface(surface, ExportFlags::COMPOSED_LAYERS | ExportFlags::READ_WRITE)
            .unwrap();
        assert_eq!(desc.fourcc, Fourcc::from_bytes(b"YUY2"));
        assert_eq!(desc.objects.len(), 1);
        assert_eq!(desc.objects[0].size, 0);
        assert_eq!(desc.layers.len(), 1);
    }

    #[test]
    fn test_decode_marks_surface_pending() {
        let mut driver = MockDriver::default();
        let handle = driver.handle();
        let surface = driver
            .create_surfaces(&request(ChromaFormat::Yuv420, None, 64, 64), 1)
            .unwrap()[0];
        let mut picture = DecodePicture::new(Codec::Vp9);
        picture
            .add_param(ParamKind::PictureParameter, vec![0u8; 24])
            .add_slice(vec![0u8; 8], vec![7u8, 7, 7]);
        driver.submit_decode(surface, &picture).unwrap();
        assert!(driver.surfaces[&surface].decode_pending);
        assert_eq!(driver.surfaces[&surface].storage[..3], [7, 7, 7]);
        driver.sync_surface(surface).unwrap();
        assert!(!driver.surfaces[&surface].decode_pending);

        let records = handle.decodes();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].param_bytes, 24);
        assert_eq!(records[0].slice_bytes, 3);
    }

    #[test]
    fn test_fault_injection() {
        let mut driver = MockDriver::default();
        let handle = driver.handle();
        handle.set_fault(Fault::CreateSurfaces, true);
        assert!(driver
            .create_surfaces(&request(ChromaFormat::Yuv420, None, 64, 64), 1)
            .is_err());
        handle.set_fault(Fault::CreateSurfaces, false);
        assert!(driver
            .create_surfaces(&request(ChromaFormat::Yuv420, None, 64, 64), 1)
            .is_ok());
    }
}
