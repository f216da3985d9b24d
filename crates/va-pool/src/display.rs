//! Surface provisioner.
//!
//! [`Display`] owns the accelerator driver behind a single device lock. Every
//! entry point takes the lock for exactly one driver call and releases it
//! before returning, so no caller-visible wait ever happens while it is held.
//! Failures are logged here, once, with the driver status string, then
//! returned as [`VaError::Driver`]; nothing is retried.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, trace, warn};
use va_core::driver::{
    DecodePicture, ExportFlags, Image, ImageId, MappedRegion, PrimeSurfaceDescriptor,
    SurfaceDriver, SurfaceId, SurfaceRequest,
};
use va_core::error::{DriverError, VaError, VaResult};
use va_core::format::VideoFormat;

/// How loudly a failed call is reported.
#[derive(Clone, Copy)]
enum Severity {
    Error,
    Warn,
}

struct DisplayInner {
    vendor: String,
    driver: Mutex<Box<dyn SurfaceDriver>>,
}

/// Shared handle to one accelerator device.
#[derive(Clone)]
pub struct Display {
    inner: Arc<DisplayInner>,
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display")
            .field("vendor", &self.inner.vendor)
            .finish_non_exhaustive()
    }
}

impl Display {
    /// Wrap `driver`; every call goes through one device lock.
    #[must_use]
    pub fn new<D: SurfaceDriver + 'static>(driver: D) -> Self {
        let vendor = driver.vendor().to_string();
        Self {
            inner: Arc::new(DisplayInner {
                vendor,
                driver: Mutex::new(Box::new(driver)),
            }),
        }
    }

    /// Driver vendor string.
    #[must_use]
    pub fn vendor(&self) -> &str {
        &self.inner.vendor
    }

    /// Whether both handles refer to the same device.
    #[must_use]
    pub fn same_device(&self, other: &Display) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run one driver call under the device lock.
    fn call<T>(
        &self,
        call: &'static str,
        severity: Severity,
        f: impl FnOnce(&mut dyn SurfaceDriver) -> Result<T, DriverError>,
    ) -> VaResult<T> {
        let result = {
            let mut driver = self.inner.driver.lock();
            f(driver.as_mut())
        };
        result.map_err(|source| {
            match severity {
                Severity::Error => error!(call, status = %source, "driver call failed"),
                Severity::Warn => warn!(call, status = %source, "driver call failed"),
            }
            VaError::Driver { call, source }
        })
    }

    /// Create `count` surfaces.
    pub fn create_surfaces(
        &self,
        request: &SurfaceRequest,
        count: usize,
    ) -> VaResult<Vec<SurfaceId>> {
        let surfaces = self.call("vaCreateSurfaces", Severity::Error, |d| {
            d.create_surfaces(request, count)
        })?;
        trace!(
            ?surfaces,
            chroma = ?request.chroma,
            fourcc = ?request.fourcc,
            width = request.width,
            height = request.height,
            memory = ?request.memory_type(),
            "created surfaces"
        );
        Ok(surfaces)
    }

    /// Create one surface.
    pub fn create_surface(&self, request: &SurfaceRequest) -> VaResult<SurfaceId> {
        self.create_surfaces(request, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| VaError::Driver {
                call: "vaCreateSurfaces",
                source: DriverError::from_status(va_core::driver::status::ERROR_ALLOCATION_FAILED),
            })
    }

    /// Destroy surfaces.
    pub fn destroy_surfaces(&self, surfaces: &[SurfaceId]) -> VaResult<()> {
        self.call("vaDestroySurfaces", Severity::Error, |d| {
            d.destroy_surfaces(surfaces)
        })
    }

    /// Zero-copy image over the surface storage.
    pub fn derive_image(&self, surface: SurfaceId) -> VaResult<Image> {
        self.call("vaDeriveImage", Severity::Warn, |d| d.derive_image(surface))
    }

    /// Standalone image in `format`.
    pub fn create_image(&self, format: VideoFormat, width: u32, height: u32) -> VaResult<Image> {
        let fourcc = format.fourcc().ok_or_else(|| {
            error!(%format, "no image fourcc for format");
            VaError::UnsupportedFormat(format)
        })?;
        self.call("vaCreateImage", Severity::Error, |d| {
            d.create_image(fourcc, width, height)
        })
    }

    /// Destroy an image and its buffer.
    pub fn destroy_image(&self, image: ImageId) -> VaResult<()> {
        self.call("vaDestroyImage", Severity::Error, |d| d.destroy_image(image))
    }

    /// Copy surface content into `image`.
    pub fn get_image(&self, surface: SurfaceId, image: &Image) -> VaResult<()> {
        self.call("vaGetImage", Severity::Error, |d| d.get_image(surface, image))
    }

    /// Copy `image` into the surface, after pending work on it completes.
    pub fn put_image(&self, surface: SurfaceId, image: &Image) -> VaResult<()> {
        self.sync_surface(surface)?;
        self.call("vaPutImage", Severity::Error, |d| d.put_image(surface, image))
    }

    /// Block until pending work targeting `surface` completes.
    pub fn sync_surface(&self, surface: SurfaceId) -> VaResult<()> {
        self.call("vaSyncSurface", Severity::Warn, |d| d.sync_surface(surface))
    }

    /// Map the image's buffer.
    pub fn map_buffer(&self, image: &Image) -> VaResult<MappedRegion> {
        self.call("vaMapBuffer", Severity::Warn, |d| d.map_buffer(image.buf))
    }

    /// Unmap the image's buffer.
    pub fn unmap_buffer(&self, image: &Image) -> VaResult<()> {
        self.call("vaUnmapBuffer", Severity::Warn, |d| d.unmap_buffer(image.buf))
    }

    /// Export the surface as DMA-BUF objects.
    pub fn export_surface(
        &self,
        surface: SurfaceId,
        flags: ExportFlags,
    ) -> VaResult<PrimeSurfaceDescriptor> {
        self.call("vaExportSurfaceHandle", Severity::Error, |d| {
            d.export_surface(surface, flags)
        })
    }

    /// Forward decode parameters and slices for `surface` to the driver.
    pub fn decode(&self, surface: SurfaceId, picture: &DecodePicture) -> VaResult<()> {
        self.call("vaRenderPicture", Severity::Error, |d| {
            d.submit_decode(surface, picture)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;
    use va_core::driver::UsageHint;
    use va_core::format::ChromaFormat;
    use va_driver_mock::{Fault, MockDriver};

    fn request() -> SurfaceRequest {
        SurfaceRequest {
            chroma: ChromaFormat::Yuv420,
            fourcc: None,
            width: 64,
            height: 64,
            usage_hint: UsageHint::Generic,
            external: None,
        }
    }

    #[test]
    fn test_create_and_destroy() {
        let driver = MockDriver::default();
        let handle = driver.handle();
        let display = Display::new(driver);
        assert_eq!(display.vendor(), "Mock VA driver");

        let surface = display.create_surface(&request()).unwrap();
        assert_eq!(handle.live_surfaces(), 1);
        display.destroy_surfaces(&[surface]).unwrap();
        assert_eq!(handle.live_surfaces(), 0);
    }

    #[test]
    #[traced_test]
    fn test_driver_failure_is_logged_and_mapped() {
        let driver = MockDriver::default();
        let handle = driver.handle();
        let display = Display::new(driver);
        handle.set_fault(Fault::CreateSurfaces, true);

        let err = display.create_surfaces(&request(), 1).unwrap_err();
        match err {
            VaError::Driver { call, ref source } => {
                assert_eq!(call, "vaCreateSurfaces");
                assert!(source.message.contains("injected"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(logs_contain("driver call failed"));
    }

    #[test]
    fn test_put_image_syncs_first() {
        let driver = MockDriver::default();
        let handle = driver.handle();
        let display = Display::new(driver);
        let surface = display.create_surface(&request()).unwrap();
        let image = display.create_image(VideoFormat::Nv12, 64, 64).unwrap();

        display.put_image(surface, &image).unwrap();
        assert_eq!(handle.sync_calls(), 1);
        assert_eq!(handle.put_image_calls(), 1);

        display.destroy_image(image.id).unwrap();
        display.destroy_surfaces(&[surface]).unwrap();
    }

    #[test]
    fn test_create_image_without_fourcc() {
        let display = Display::new(MockDriver::default());
        assert!(matches!(
            display.create_image(VideoFormat::Rgb, 16, 16),
            Err(VaError::UnsupportedFormat(VideoFormat::Rgb))
        ));
    }

    #[test]
    fn test_clones_share_device() {
        let display = Display::new(MockDriver::default());
        let other = display.clone();
        assert!(display.same_device(&other));
        assert!(!display.same_device(&Display::new(MockDriver::default())));
    }
}
