//! Buffer pool over an [`Allocator`].
//!
//! The pool only ever keeps *empty* buffer holders. Surfaces live in the
//! allocator's queue between uses: releasing a buffer strips its memories
//! back to the allocator, and acquiring one reattaches recycled memories to
//! a pooled holder. Fresh surfaces are created only while the pool is below
//! `max_buffers` and no pooled holder is available.
//!
//! # Lifecycle
//!
//! ```text
//! Unconfigured --set_config--> Configured --start--> Started --> Running
//!                                  ^                                |
//!                                  +----set_config---- Stopped <-stop
//! ```

pub mod config;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};
use va_core::error::{VaError, VaResult};
use va_core::video::{VideoAlignment, VideoInfo};

use crate::allocator::{Allocator, WaitMode};
use crate::buffer::{Buffer, VideoMeta};

pub use config::{AcquireParams, PoolConfig};

/// Lifecycle phase of a [`VaPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    /// No configuration committed yet.
    Unconfigured,
    /// Configured but not started.
    Configured,
    /// Preallocating `min_buffers`.
    Started,
    /// Serving acquires.
    Running,
    /// Stopped; buffers still out return their memory to the allocator.
    Stopped,
}

impl PoolPhase {
    fn is_active(self) -> bool {
        matches!(self, Self::Started | Self::Running)
    }
}

/// What `set_config` committed.
#[derive(Debug)]
struct Configured {
    config: PoolConfig,
    caps_info: VideoInfo,
    alloc_info: VideoInfo,
    /// Plane layout differs from the default one.
    force_videometa: bool,
}

struct PoolState {
    phase: PoolPhase,
    configured: Option<Arc<Configured>>,
    /// Empty holders ready for reuse.
    holders: Vec<Buffer>,
    /// Buffers in existence: pooled holders plus buffers handed out.
    allocated: usize,
    flushing: bool,
    starting: bool,
}

pub(crate) struct PoolShared {
    allocator: Allocator,
    state: Mutex<PoolState>,
    /// Wakes blocking acquires.
    cond: Condvar,
    /// Wakes timed async acquires.
    notify: Notify,
}

impl PoolShared {
    /// Something changed that may let one waiter proceed.
    fn wake_one(&self) {
        self.cond.notify_one();
        self.notify.notify_waiters();
    }

    fn wake_all(&self) {
        self.cond.notify_all();
        self.notify.notify_waiters();
    }

    fn new_holder(&self, configured: &Configured) -> Buffer {
        let mut buffer = Buffer::new();
        if configured.config.video_meta || configured.force_videometa {
            let caps = &configured.caps_info;
            buffer.set_video_meta(VideoMeta {
                format: caps.format,
                width: caps.width,
                height: caps.height,
                n_planes: caps.n_planes(),
                offset: configured.alloc_info.offset,
                stride: configured.alloc_info.stride,
                alignment: configured.config.alignment,
            });
        }
        buffer
    }

    fn alloc_buffer(&self, configured: &Configured) -> VaResult<Buffer> {
        let mut buffer = self.new_holder(configured);
        if let Err(err) = self.allocator.setup_buffer(&mut buffer) {
            warn!(%err, "Can't create memory");
            return Err(err);
        }
        Ok(buffer)
    }

    /// Generic acquire: a pooled holder, a fresh buffer while below the
    /// maximum, or a wait.
    fn acquire_holder(&self, mode: WaitMode) -> VaResult<Buffer> {
        let mut state = self.state.lock();
        loop {
            if state.flushing {
                return Err(VaError::Flushing);
            }
            if state.phase != PoolPhase::Running {
                return Err(VaError::NotActive);
            }
            if let Some(holder) = state.holders.pop() {
                return Ok(holder);
            }

            let configured = state.configured.clone().ok_or(VaError::NotNegotiated)?;
            let max = configured.config.max_buffers as usize;
            if !configured.config.is_bounded() || state.allocated < max {
                state.allocated += 1;
                drop(state);
                return self.alloc_buffer(&configured).inspect_err(|_| {
                    let mut state = self.state.lock();
                    state.allocated = state.allocated.saturating_sub(1);
                    self.wake_one();
                });
            }

            if mode == WaitMode::DontWait {
                return Err(VaError::WouldBlock);
            }
            trace!(allocated = state.allocated, max, "Pool exhausted, waiting");
            self.cond.wait(&mut state);
        }
    }

    /// Generic release. Returns the holder when it must be discarded; the
    /// caller drops it outside the lock.
    fn base_release(&self, state: &mut PoolState, mut holder: Buffer) -> Option<Buffer> {
        if state.starting {
            holder.remove_all_memory();
        }
        self.wake_one();
        if holder.n_memory() > 0 || !state.phase.is_active() {
            state.allocated = state.allocated.saturating_sub(1);
            return Some(holder);
        }
        state.holders.push(holder);
        None
    }

    /// Strip `holder` back to the allocator, then pool it.
    pub(crate) fn release(&self, mut holder: Buffer) {
        let discarded = {
            let mut state = self.state.lock();
            holder.remove_all_memory();
            self.base_release(&mut state, holder)
        };
        drop(discarded);
    }

    /// Preallocate `min_buffers`, adopting memory already in the allocator
    /// queue first. Returns the number of buffers pooled.
    ///
    /// Buffers still held from before a restart count against
    /// `max_buffers`: only the remaining headroom is filled, and recycled
    /// surfaces beyond it are destroyed.
    fn warm_up(&self, configured: &Configured) -> VaResult<usize> {
        let config = &configured.config;
        let (held, headroom) = {
            let state = self.state.lock();
            let headroom = if config.is_bounded() {
                (config.max_buffers as usize).saturating_sub(state.allocated)
            } else {
                usize::MAX
            };
            (state.allocated, headroom)
        };

        let mut warm = Vec::new();
        while warm.len() < headroom {
            let mut buffer = self.new_holder(configured);
            if self
                .allocator
                .prepare_buffer(&mut buffer, WaitMode::DontWait)
                .is_err()
            {
                break;
            }
            warm.push(buffer);
        }
        let adopted = warm.len();
        if adopted == headroom {
            let excess = self.allocator.available_groups();
            if excess > 0 {
                debug!(excess, held, "Destroying recycled surfaces beyond max_buffers");
                self.allocator.flush();
            }
        }

        let min = config.min_buffers as usize;
        let target = min.min(headroom);
        if target < min {
            debug!(held, min, target, "Held buffers limit preallocation");
        }
        while warm.len() < target {
            warm.push(self.alloc_buffer(configured)?);
        }

        let count = warm.len();
        let mut state = self.state.lock();
        state.allocated += count;
        let discarded: Vec<Buffer> = warm
            .into_iter()
            .filter_map(|buffer| self.base_release(&mut state, buffer))
            .collect();
        drop(state);
        drop(discarded);
        debug!(count, adopted, "Preallocated buffers");
        Ok(count)
    }
}

/// Pool of accelerator-backed video buffers.
///
/// Cloning yields another handle to the same pool. Buffers return to the
/// pool when dropped.
#[derive(Clone)]
pub struct VaPool {
    shared: Arc<PoolShared>,
}

impl VaPool {
    /// Empty pool over `allocator`; configure it before starting.
    #[must_use]
    pub fn new(allocator: Allocator) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                allocator,
                state: Mutex::new(PoolState {
                    phase: PoolPhase::Unconfigured,
                    configured: None,
                    holders: Vec::new(),
                    allocated: 0,
                    flushing: false,
                    starting: false,
                }),
                cond: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Allocator the pool draws from.
    #[must_use]
    pub fn allocator(&self) -> &Allocator {
        &self.shared.allocator
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> PoolPhase {
        self.shared.state.lock().phase
    }

    /// Configure geometry and policy and commit the format to the allocator.
    ///
    /// Returns the configuration as applied: alignment masks are updated to
    /// the driver's stride alignment. Fails with [`VaError::Active`] while
    /// the pool is started, and with the allocator's error (for instance
    /// [`VaError::FormatLocked`]) when the format cannot be committed.
    pub fn set_config(&self, config: PoolConfig) -> VaResult<PoolConfig> {
        if self.phase().is_active() {
            warn!("Refusing to reconfigure an active pool");
            return Err(VaError::Active);
        }
        if config.is_bounded() && config.min_buffers > config.max_buffers {
            return Err(VaError::InvalidConfig(format!(
                "min_buffers {} exceeds max_buffers {}",
                config.min_buffers, config.max_buffers
            )));
        }

        let orig = config.info.clone();
        let mut caps_info = orig.clone();
        let (mut width, mut height) = (orig.width, orig.height);
        if let Some(align) = &config.alignment {
            width = width
                .checked_add(align.padding_left)
                .and_then(|w| w.checked_add(align.padding_right))
                .ok_or(VaError::SizeOverflow {
                    context: "padded width",
                })?;
            height = height
                .checked_add(align.padding_top)
                .and_then(|h| h.checked_add(align.padding_bottom))
                .ok_or(VaError::SizeOverflow {
                    context: "padded height",
                })?;
            caps_info.align(align).inspect_err(|err| warn!(%err, "Failed to align"))?;
        }

        let mut request = caps_info.clone();
        request.width = width;
        request.height = height;
        let alloc_info = self
            .shared
            .allocator
            .set_format(&request, config.usage_hint)
            .inspect_err(|err| warn!(%err, "Failed to set format to allocator"))?;

        let alignment = config.alignment.map(|align| hw_alignment(align, &alloc_info));
        let force_videometa = !orig.same_plane_layout(&alloc_info);
        if force_videometa {
            info!("Video meta is required in buffer");
        }

        let applied = PoolConfig { alignment, ..config };
        let configured = Arc::new(Configured {
            config: applied.clone(),
            caps_info,
            alloc_info,
            force_videometa,
        });

        let stale = {
            let mut state = self.shared.state.lock();
            if state.phase.is_active() {
                return Err(VaError::Active);
            }
            state.configured = Some(configured);
            state.phase = PoolPhase::Configured;
            let stale = std::mem::take(&mut state.holders);
            state.allocated = state.allocated.saturating_sub(stale.len());
            stale
        };
        drop(stale);
        debug!(
            format = %applied.info.format,
            width = applied.info.width,
            height = applied.info.height,
            min = applied.min_buffers,
            max = applied.max_buffers,
            force_videometa,
            "Pool configured"
        );
        Ok(applied)
    }

    /// Applied configuration.
    #[must_use]
    pub fn config(&self) -> Option<PoolConfig> {
        self.shared
            .state
            .lock()
            .configured
            .as_ref()
            .map(|c| c.config.clone())
    }

    /// Whether consumers must honour the buffers' [`VideoMeta`] because the
    /// allocated layout differs from the default one.
    #[must_use]
    pub fn requires_video_meta(&self) -> bool {
        self.shared
            .state
            .lock()
            .configured
            .as_ref()
            .is_some_and(|c| c.force_videometa)
    }

    /// Activate the pool, preallocating `min_buffers`.
    pub fn start(&self) -> VaResult<()> {
        let configured = {
            let mut state = self.shared.state.lock();
            match state.phase {
                PoolPhase::Started | PoolPhase::Running => return Ok(()),
                PoolPhase::Unconfigured => return Err(VaError::NotNegotiated),
                PoolPhase::Configured | PoolPhase::Stopped => {}
            }
            let configured = state.configured.clone().ok_or(VaError::NotNegotiated)?;
            state.phase = PoolPhase::Started;
            state.starting = true;
            state.flushing = false;
            configured
        };

        let result = self.shared.warm_up(&configured);

        let stale = {
            let mut state = self.shared.state.lock();
            state.starting = false;
            match result {
                Ok(_) => {
                    state.phase = PoolPhase::Running;
                    Vec::new()
                }
                Err(_) => {
                    state.phase = PoolPhase::Configured;
                    let stale = std::mem::take(&mut state.holders);
                    state.allocated = state.allocated.saturating_sub(stale.len());
                    stale
                }
            }
        };
        drop(stale);

        match result {
            Ok(count) => {
                info!(
                    preallocated = count,
                    max = configured.config.max_buffers,
                    "Pool started"
                );
                Ok(())
            }
            Err(err) => {
                warn!(%err, "Pool failed to start");
                Err(err)
            }
        }
    }

    /// Deactivate: pooled holders are discarded and the allocator flushed.
    /// Buffers still out return their memory to the allocator when dropped.
    pub fn stop(&self) {
        let stale = {
            let mut state = self.shared.state.lock();
            if !state.phase.is_active() {
                return;
            }
            state.phase = PoolPhase::Stopped;
            state.starting = false;
            let stale = std::mem::take(&mut state.holders);
            state.allocated = state.allocated.saturating_sub(stale.len());
            self.shared.wake_all();
            stale
        };
        drop(stale);
        self.shared.allocator.flush();
        info!(outstanding = self.outstanding(), "Pool stopped");
    }

    /// Make every pending and future acquire fail with
    /// [`VaError::Flushing`] and destroy the recycled surfaces.
    pub fn flush_start(&self) {
        {
            let mut state = self.shared.state.lock();
            state.flushing = true;
            self.shared.wake_all();
        }
        self.shared.allocator.flush();
        debug!("Flush started");
    }

    /// Resume acquiring. Pooled holders whose memory the flush destroyed
    /// are discarded.
    pub fn flush_stop(&self) {
        let stale = {
            let mut state = self.shared.state.lock();
            state.flushing = false;
            let groups = self.shared.allocator.available_groups();
            let stale = if state.holders.len() > groups {
                state.holders.split_off(groups)
            } else {
                Vec::new()
            };
            state.allocated = state.allocated.saturating_sub(stale.len());
            self.shared.wake_all();
            stale
        };
        debug!(discarded = stale.len(), "Flush stopped");
    }

    /// Acquire a buffer, waiting while the pool is at capacity.
    pub fn acquire(&self) -> VaResult<Buffer> {
        self.acquire_with(AcquireParams::default())
    }

    /// Acquire without waiting; fails with [`VaError::WouldBlock`].
    pub fn try_acquire(&self) -> VaResult<Buffer> {
        self.acquire_with(AcquireParams { dont_wait: true })
    }

    /// Acquire with explicit parameters.
    pub fn acquire_with(&self, params: AcquireParams) -> VaResult<Buffer> {
        let mode = if params.dont_wait {
            WaitMode::DontWait
        } else {
            WaitMode::Block
        };
        let shared = &self.shared;
        let mut buffer = loop {
            let mut buffer = shared.acquire_holder(mode)?;
            if buffer.n_memory() > 0 {
                break buffer;
            }
            // a pooled holder always has a group queued unless a flush
            // destroyed it
            match shared.allocator.prepare_buffer(&mut buffer, WaitMode::DontWait) {
                Ok(()) => break buffer,
                Err(VaError::WouldBlock | VaError::Flushing) => {
                    {
                        let mut state = shared.state.lock();
                        state.allocated = state.allocated.saturating_sub(1);
                        shared.wake_one();
                    }
                    trace!("Discarding holder whose memory was flushed");
                    drop(buffer);
                }
                Err(err) => {
                    let discarded = {
                        let mut state = shared.state.lock();
                        shared.base_release(&mut state, buffer)
                    };
                    drop(discarded);
                    debug!(%err, "Failed to attach memory to buffer");
                    return Err(err);
                }
            }
        };

        buffer.set_pool(Arc::downgrade(shared));
        trace!(surface = ?buffer.surface(), "Acquired buffer");
        Ok(buffer)
    }

    /// Acquire, giving up after `timeout`.
    ///
    /// Returns `Ok(None)` on timeout. Other failures, such as a flush,
    /// return immediately.
    pub async fn acquire_timeout(&self, timeout: Duration) -> VaResult<Option<Buffer>> {
        let wait = async {
            loop {
                // register before trying so a release in between is not missed
                let mut notified = std::pin::pin!(self.shared.notify.notified());
                notified.as_mut().enable();
                match self.try_acquire() {
                    Err(VaError::WouldBlock) => notified.await,
                    result => return result,
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis(),
                    allocated = self.allocated(),
                    outstanding = self.outstanding(),
                    "Pool acquire timeout - backpressure detected"
                );
                Ok(None)
            }
        }
    }

    /// Return a buffer to its pool. Dropping it does the same.
    pub fn release(&self, buffer: Buffer) {
        drop(buffer);
    }

    /// Buffers in existence, pooled or handed out.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.shared.state.lock().allocated
    }

    /// Buffers currently handed out.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        let state = self.shared.state.lock();
        state.allocated.saturating_sub(state.holders.len())
    }

    /// Empty holders waiting in the pool.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.shared.state.lock().holders.len()
    }
}

/// Replace each plane's stride mask with the alignment the driver actually
/// used: the lowest set bit of its stride.
fn hw_alignment(mut align: VideoAlignment, alloc_info: &VideoInfo) -> VideoAlignment {
    for (mask, &stride) in align
        .stride_align
        .iter_mut()
        .zip(&alloc_info.stride)
        .take(alloc_info.n_planes())
    {
        if stride != 0 {
            *mask = (1usize << stride.trailing_zeros()) - 1;
        }
    }
    align
}

impl fmt::Debug for VaPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("VaPool")
            .field("phase", &state.phase)
            .field("allocated", &state.allocated)
            .field("pooled", &state.holders.len())
            .field("flushing", &state.flushing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::Display;
    use va_core::format::VideoFormat;
    use tracing_test::traced_test;
    use va_driver_mock::{MockConfig, MockDriver, MockHandle};

    fn pool(config: MockConfig) -> (VaPool, MockHandle) {
        let driver = MockDriver::new(config);
        let handle = driver.handle();
        let display = Display::new(driver);
        let allocator = Allocator::new(
            va_core::config::AllocatorKind::Surface,
            display,
            vec![VideoFormat::Nv12],
        );
        (VaPool::new(allocator), handle)
    }

    fn nv12(width: u32, height: u32) -> VideoInfo {
        VideoInfo::new(VideoFormat::Nv12, width, height).unwrap()
    }

    #[test]
    fn test_phases() {
        let (pool, _handle) = pool(MockConfig::default());
        assert_eq!(pool.phase(), PoolPhase::Unconfigured);
        assert!(matches!(pool.start(), Err(VaError::NotNegotiated)));
        assert!(matches!(pool.acquire(), Err(VaError::NotActive)));

        pool.set_config(PoolConfig::new(nv12(64, 64)).with_buffers(2, 4))
            .unwrap();
        assert_eq!(pool.phase(), PoolPhase::Configured);
        pool.start().unwrap();
        assert_eq!(pool.phase(), PoolPhase::Running);
        assert!(matches!(
            pool.set_config(PoolConfig::new(nv12(64, 64))),
            Err(VaError::Active)
        ));
        pool.stop();
        assert_eq!(pool.phase(), PoolPhase::Stopped);
    }

    #[test]
    fn test_warm_up_pools_empty_holders() {
        let (pool, handle) = pool(MockConfig::default());
        pool.set_config(PoolConfig::new(nv12(64, 64)).with_buffers(3, 6))
            .unwrap();
        pool.start().unwrap();

        assert_eq!(pool.allocated(), 3);
        assert_eq!(pool.pooled(), 3);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(handle.live_surfaces(), 3);
        assert_eq!(pool.allocator().surface_count(), 3);

        // acquiring reuses the preallocated surfaces
        let buffers: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(handle.surfaces_created(), 4); // 3 + the probe
        assert!(buffers.iter().all(|b| b.n_memory() == 1));
    }

    #[test]
    fn test_min_above_max_rejected() {
        let (pool, _handle) = pool(MockConfig::default());
        assert!(matches!(
            pool.set_config(PoolConfig::new(nv12(64, 64)).with_buffers(5, 2)),
            Err(VaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_try_acquire_at_capacity() {
        let (pool, _handle) = pool(MockConfig::default());
        pool.set_config(PoolConfig::new(nv12(64, 64)).with_buffers(0, 1))
            .unwrap();
        pool.start().unwrap();

        let held = pool.try_acquire().unwrap();
        assert!(matches!(pool.try_acquire(), Err(VaError::WouldBlock)));
        drop(held);
        assert!(pool.try_acquire().is_ok());
    }

    #[test]
    fn test_alignment_forces_video_meta() {
        let (pool, _handle) = pool(MockConfig::default());
        let align = VideoAlignment {
            padding_right: 16,
            padding_bottom: 8,
            ..VideoAlignment::default()
        };
        let applied = pool
            .set_config(PoolConfig::new(nv12(100, 60)).with_alignment(align))
            .unwrap();
        assert!(pool.requires_video_meta());
        // driver pitch is 128 for a 116-pixel padded row
        assert_eq!(applied.alignment.unwrap().stride_align[0], 127);

        pool.start().unwrap();
        let buffer = pool.acquire().unwrap();
        let meta = buffer.video_meta().unwrap();
        assert_eq!((meta.width, meta.height), (100, 60));
        assert_eq!(meta.stride[0], 128);
        assert!(meta.alignment.is_some());
    }

    #[test]
    fn test_video_meta_offsets_point_at_padded_origin() {
        let (pool, _handle) = pool(MockConfig::default());
        let align = VideoAlignment {
            padding_top: 16,
            ..VideoAlignment::default()
        };
        pool.set_config(PoolConfig::new(nv12(64, 64)).with_alignment(align))
            .unwrap();
        pool.start().unwrap();
        let buffer = pool.acquire().unwrap();
        let meta = buffer.video_meta().unwrap();

        assert_eq!((meta.width, meta.height), (64, 64));
        assert_eq!(meta.offset[0], 0);
        // chroma follows all 80 padded luma rows
        assert_eq!(meta.offset[1], meta.stride[0] * 80);
        assert_eq!(meta.alignment.unwrap().padding_top, 16);
    }

    #[test]
    fn test_default_layout_needs_no_meta() {
        // 64-pixel rows and 16-row heights match the driver's alignment
        let (pool, _handle) = pool(MockConfig::default());
        pool.set_config(PoolConfig::new(nv12(64, 64))).unwrap();
        assert!(!pool.requires_video_meta());
        pool.start().unwrap();
        assert!(pool.acquire().unwrap().video_meta().is_none());
    }

    #[test]
    fn test_release_after_stop_returns_memory_to_allocator() {
        let (pool, _handle) = pool(MockConfig::default());
        pool.set_config(PoolConfig::new(nv12(64, 64)).with_buffers(0, 2))
            .unwrap();
        pool.start().unwrap();
        let buffer = pool.acquire().unwrap();
        let surface = buffer.surface();
        pool.stop();
        drop(buffer);

        assert_eq!(pool.pooled(), 0);
        assert_eq!(pool.allocated(), 0);
        assert_eq!(pool.allocator().surface_count(), 1);

        // restarting adopts the surface instead of allocating
        pool.start().unwrap();
        assert_eq!(pool.pooled(), 1);
        assert_eq!(pool.acquire().unwrap().surface(), surface);
    }

    #[test]
    fn test_restart_counts_held_buffers() {
        let (pool, handle) = pool(MockConfig::default());
        pool.set_config(PoolConfig::new(nv12(64, 64)).with_buffers(2, 2))
            .unwrap();
        pool.start().unwrap();
        let held: Vec<_> = (0..2).map(|_| pool.acquire().unwrap()).collect();
        pool.stop();

        pool.start().unwrap();
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.pooled(), 0);
        assert!(matches!(pool.try_acquire(), Err(VaError::WouldBlock)));
        assert_eq!(handle.live_surfaces(), 2);

        let surfaces: Vec<_> = held.iter().map(Buffer::surface).collect();
        drop(held);
        assert_eq!(pool.allocated(), 2);
        let buffer = pool.try_acquire().unwrap();
        assert!(surfaces.contains(&buffer.surface()));
        assert_eq!(handle.live_surfaces(), 2);
    }

    #[test]
    fn test_restart_with_lower_max_drops_excess_surfaces() {
        let (pool, handle) = pool(MockConfig::default());
        pool.set_config(PoolConfig::new(nv12(64, 64)).with_buffers(0, 4))
            .unwrap();
        pool.start().unwrap();
        let mut held: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        pool.stop();
        // two come back to the allocator queue, two stay out
        held.truncate(2);
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.allocator().surface_count(), 4);

        pool.set_config(PoolConfig::new(nv12(64, 64)).with_buffers(0, 2))
            .unwrap();
        pool.start().unwrap();
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.pooled(), 0);
        assert_eq!(pool.allocator().surface_count(), 2);
        assert_eq!(handle.live_surfaces(), 2);

        drop(held);
        assert_eq!(pool.pooled(), 2);
        assert_eq!(pool.allocated(), 2);
    }

    #[test]
    fn test_restart_preallocates_only_into_headroom() {
        let (pool, _handle) = pool(MockConfig::default());
        pool.set_config(PoolConfig::new(nv12(64, 64)).with_buffers(3, 4))
            .unwrap();
        pool.start().unwrap();
        let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        pool.stop();

        pool.start().unwrap();
        assert_eq!(pool.pooled(), 1);
        assert_eq!(pool.allocated(), 4);
        drop(held);
        assert_eq!(pool.allocated(), 4);
    }

    #[test]
    fn test_timed_acquire_wakes_on_release_from_thread() {
        let (pool, _handle) = pool(MockConfig::default());
        pool.set_config(PoolConfig::new(nv12(64, 64)).with_buffers(0, 1))
            .unwrap();
        pool.start().unwrap();
        let held = pool.acquire().unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(held);
        });
        let started = std::time::Instant::now();
        let buffer =
            tokio_test::block_on(pool.acquire_timeout(Duration::from_secs(10))).unwrap();
        assert!(buffer.is_some());
        assert!(started.elapsed() < Duration::from_secs(5));
        releaser.join().unwrap();
    }

    #[test]
    #[traced_test]
    fn test_acquire_timeout_logs_backpressure() {
        let (pool, _handle) = pool(MockConfig::default());
        pool.set_config(PoolConfig::new(nv12(64, 64)).with_buffers(0, 1))
            .unwrap();
        pool.start().unwrap();
        let _held = pool.acquire().unwrap();

        let result =
            tokio_test::block_on(pool.acquire_timeout(Duration::from_millis(5))).unwrap();
        assert!(result.is_none());
        assert!(logs_contain("Pool acquire timeout - backpressure detected"));
        assert!(logs_contain("timeout_ms=5"));
    }
}
