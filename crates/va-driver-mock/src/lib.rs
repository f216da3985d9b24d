//! Mock surface driver for testing without accelerator hardware.
//!
//! [`MockDriver`] implements every [`SurfaceDriver`](va_core::SurfaceDriver)
//! entry point in host memory:
//!
//! - driver-style pitch and height alignment, so negotiated layouts differ
//!   from the default packed layout the way real hardware does
//! - derive support that can be switched off to force the copy path
//! - DMA-BUF exports backed by the surface's own anonymous file
//! - simulated decode latency observed by `sync_surface`
//! - call counters and fault injection through [`MockHandle`]

// Surface storage is memory mapped and handed out as raw driver mappings.
#![allow(unsafe_code)]

mod convert;
mod driver;
mod handle;

pub use driver::{MockConfig, MockDriver};
pub use handle::{DecodeRecord, Fault, MockHandle};
