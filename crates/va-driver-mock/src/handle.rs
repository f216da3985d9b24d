//! Shared observation and fault-injection handle.
//!
//! The driver itself is moved into a `Display`, so tests keep a
//! [`MockHandle`] to read call counters and to make individual entry points
//! fail on demand.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use va_core::driver::{Codec, SurfaceId};

/// Driver entry points that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `create_surfaces`.
    CreateSurfaces,
    /// `derive_image`.
    DeriveImage,
    /// `create_image`.
    CreateImage,
    /// `get_image`.
    GetImage,
    /// `put_image`.
    PutImage,
    /// `map_buffer`.
    MapBuffer,
    /// `export_surface`.
    ExportSurface,
    /// `submit_decode`.
    SubmitDecode,
}

/// What the driver saw for one decode submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeRecord {
    /// Target surface.
    pub surface: SurfaceId,
    /// Codec of the picture.
    pub codec: Codec,
    /// Bytes over all parameter records.
    pub param_bytes: usize,
    /// Number of slices.
    pub slices: usize,
    /// Bytes of slice data.
    pub slice_bytes: usize,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub surfaces_created: AtomicUsize,
    pub surfaces_destroyed: AtomicUsize,
    pub images_created: AtomicUsize,
    pub images_destroyed: AtomicUsize,
    pub derive_calls: AtomicUsize,
    pub get_image_calls: AtomicUsize,
    pub put_image_calls: AtomicUsize,
    pub sync_calls: AtomicUsize,
    pub export_calls: AtomicUsize,
}

impl Counters {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub(crate) struct Shared {
    pub counters: Counters,
    pub faults: Mutex<HashSet<Fault>>,
    pub decodes: Mutex<Vec<DecodeRecord>>,
}

/// Cloneable view of a [`MockDriver`](crate::MockDriver)'s state.
#[derive(Clone, Default)]
pub struct MockHandle {
    pub(crate) shared: Arc<Shared>,
}

impl MockHandle {
    /// Make `fault` fail (or stop failing) on every following call.
    pub fn set_fault(&self, fault: Fault, enabled: bool) {
        let mut faults = self.shared.faults.lock();
        if enabled {
            faults.insert(fault);
        } else {
            faults.remove(&fault);
        }
    }

    pub(crate) fn faulted(&self, fault: Fault) -> bool {
        self.shared.faults.lock().contains(&fault)
    }

    /// Surfaces created so far.
    #[must_use]
    pub fn surfaces_created(&self) -> usize {
        self.shared.counters.surfaces_created.load(Ordering::Relaxed)
    }

    /// Surfaces destroyed so far.
    #[must_use]
    pub fn surfaces_destroyed(&self) -> usize {
        self.shared.counters.surfaces_destroyed.load(Ordering::Relaxed)
    }

    /// Surfaces created and not yet destroyed.
    #[must_use]
    pub fn live_surfaces(&self) -> usize {
        self.surfaces_created()
            .saturating_sub(self.surfaces_destroyed())
    }

    /// Images created (derived or standalone) and not yet destroyed.
    #[must_use]
    pub fn live_images(&self) -> usize {
        let c = &self.shared.counters;
        c.images_created
            .load(Ordering::Relaxed)
            .saturating_sub(c.images_destroyed.load(Ordering::Relaxed))
    }

    /// `derive_image` calls.
    #[must_use]
    pub fn derive_calls(&self) -> usize {
        self.shared.counters.derive_calls.load(Ordering::Relaxed)
    }

    /// `get_image` calls.
    #[must_use]
    pub fn get_image_calls(&self) -> usize {
        self.shared.counters.get_image_calls.load(Ordering::Relaxed)
    }

    /// `put_image` calls.
    #[must_use]
    pub fn put_image_calls(&self) -> usize {
        self.shared.counters.put_image_calls.load(Ordering::Relaxed)
    }

    /// `sync_surface` calls.
    #[must_use]
    pub fn sync_calls(&self) -> usize {
        self.shared.counters.sync_calls.load(Ordering::Relaxed)
    }

    /// `export_surface` calls.
    #[must_use]
    pub fn export_calls(&self) -> usize {
        self.shared.counters.export_calls.load(Ordering::Relaxed)
    }

    /// Every decode submission so far, oldest first.
    #[must_use]
    pub fn decodes(&self) -> Vec<DecodeRecord> {
        self.shared.decodes.lock().clone()
    }
}
