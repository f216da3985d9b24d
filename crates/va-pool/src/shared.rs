//! Surface lifetime accounting.
//!
//! [`LiveSurfaces`] counts surfaces created under an allocator's committed
//! format; a non-zero count locks the format. [`SharedSurface`] binds one
//! physical surface to the N plane memories it was exported as: every plane
//! memory holds one reference and the surface is destroyed exactly once,
//! when the last plane memory is dropped.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, error};
use va_core::driver::SurfaceId;

use crate::display::Display;

/// Number of surfaces outstanding under one allocator.
#[derive(Clone, Default)]
pub struct LiveSurfaces(Arc<AtomicUsize>);

impl LiveSurfaces {
    /// Current count.
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement(&self) {
        let prev = self.0.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "live surface count underflow");
    }
}

impl fmt::Debug for LiveSurfaces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LiveSurfaces").field(&self.get()).finish()
    }
}

/// Destroy `surface`, logging instead of failing.
pub(crate) fn destroy_surface(display: &Display, surface: SurfaceId) {
    debug!(%surface, "Destroying surface");
    if let Err(err) = display.destroy_surfaces(&[surface]) {
        error!(%surface, %err, "Failed to destroy surface");
    }
}

struct SharedSurfaceInner {
    display: Display,
    surface: SurfaceId,
    /// Present for committed allocations, absent for probes and imports.
    live: Option<LiveSurfaces>,
}

impl Drop for SharedSurfaceInner {
    fn drop(&mut self) {
        destroy_surface(&self.display, self.surface);
        if let Some(live) = &self.live {
            live.decrement();
        }
    }
}

/// Counted handle to a surface exported as several plane memories.
///
/// Only plane memories hold clones, so [`SharedSurface::ref_count`] is the
/// number of live plane memories.
pub struct SharedSurface {
    inner: Arc<SharedSurfaceInner>,
}

impl SharedSurface {
    /// Take ownership of `surface`. A committed surface is counted in `live`
    /// once, here, however many planes it is split into.
    pub(crate) fn new(display: Display, surface: SurfaceId, live: Option<LiveSurfaces>) -> Self {
        if let Some(live) = &live {
            live.increment();
        }
        Self {
            inner: Arc::new(SharedSurfaceInner {
                display,
                surface,
                live,
            }),
        }
    }

    /// New plane reference.
    pub(crate) fn add_plane(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Surface handle.
    #[must_use]
    pub fn surface(&self) -> SurfaceId {
        self.inner.surface
    }

    /// Device owning the surface.
    #[must_use]
    pub fn display(&self) -> &Display {
        &self.inner.display
    }

    /// Live plane references to this surface.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub(crate) fn same_surface(&self, other: &SharedSurface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSurface")
            .field("surface", &self.inner.surface)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use va_core::driver::{SurfaceRequest, UsageHint};
    use va_core::format::ChromaFormat;
    use va_driver_mock::MockDriver;

    fn setup() -> (Display, va_driver_mock::MockHandle, SurfaceId) {
        let driver = MockDriver::default();
        let handle = driver.handle();
        let display = Display::new(driver);
        let surface = display
            .create_surface(&SurfaceRequest {
                chroma: ChromaFormat::Yuv420,
                fourcc: None,
                width: 32,
                height: 32,
                usage_hint: UsageHint::Generic,
                external: None,
            })
            .unwrap();
        (display, handle, surface)
    }

    #[test]
    fn test_last_plane_destroys_once() {
        let (display, handle, surface) = setup();
        let live = LiveSurfaces::default();
        let first = SharedSurface::new(display, surface, Some(live.clone()));
        let planes: Vec<_> = (0..3).map(|_| first.add_plane()).collect();
        drop(first);

        assert_eq!(planes[0].ref_count(), 3);
        assert_eq!(live.get(), 1);

        let mut planes = planes;
        planes.pop();
        assert_eq!(planes[0].ref_count(), 2);
        planes.pop();
        assert_eq!(handle.surfaces_destroyed(), 0);
        planes.pop();
        assert_eq!(handle.surfaces_destroyed(), 1);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn test_uncounted_surface() {
        let (display, handle, surface) = setup();
        let shared = SharedSurface::new(display, surface, None);
        let plane = shared.add_plane();
        assert!(plane.same_surface(&shared));
        drop(shared);
        drop(plane);
        assert_eq!(handle.live_surfaces(), 0);
    }
}
