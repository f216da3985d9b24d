//! # va-pool
//!
//! A recycling pool of accelerator video surfaces.
//!
//! A [`Display`] wraps one driver connection. An [`Allocator`] commits a
//! video format against it, creates surfaces for that format and hands them
//! out as memory objects: [`VaMemory`] for the direct allocator, one
//! [`DmabufMemory`] per plane for the exported allocator. A [`VaPool`] sits
//! on top, handing out [`Buffer`]s that return to it when dropped.
//!
//! ```no_run
//! use va_pool::{Allocator, Display, PoolConfig, VaPool};
//! use va_core::config::AllocatorKind;
//! use va_core::{VideoFormat, VideoInfo};
//! use va_driver_mock::MockDriver;
//!
//! # fn main() -> va_core::VaResult<()> {
//! let display = Display::new(MockDriver::default());
//! let allocator = Allocator::new(AllocatorKind::Surface, display, vec![VideoFormat::Nv12]);
//! let pool = VaPool::new(allocator);
//!
//! let info = VideoInfo::new(VideoFormat::Nv12, 1920, 1080)?;
//! pool.set_config(PoolConfig::new(info).with_buffers(4, 8))?;
//! pool.start()?;
//! let buffer = pool.acquire()?;
//! drop(buffer); // back to the pool
//! # Ok(())
//! # }
//! ```
//!
//! Memory mapping and exported-plane mapping go through raw pointers handed
//! out by the driver and through `memmap2`.
#![allow(unsafe_code)]

pub mod allocator;
pub mod buffer;
pub mod decode;
pub mod display;
pub mod frame;
pub mod memory;
pub mod pool;
pub mod shared;

pub use allocator::{import_dmabuf, Allocator, DmabufAllocator, SurfaceAllocator, WaitMode};
pub use buffer::{Buffer, VideoMeta};
pub use display::Display;
pub use frame::VideoFrame;
pub use memory::{DmabufMemory, Memory, MemoryMap, SubMemory, SurfaceMap, VaMemory};
pub use pool::{AcquireParams, PoolConfig, PoolPhase, VaPool};
pub use shared::{LiveSurfaces, SharedSurface};
