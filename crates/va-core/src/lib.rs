//! # va-core
//!
//! Driver-independent vocabulary for the accelerator surface pool.
//!
//! - [`format`]: pixel formats, fourcc codes, chroma classes and the
//!   image-format to surface-format table
//! - [`video`]: frame geometry and plane alignment
//! - [`driver`]: the [`SurfaceDriver`](driver::SurfaceDriver) trait and the
//!   plain data types crossing it
//! - [`error`]: [`VaError`] and [`VaResult`]
//! - [`config`] and [`logging`]: settings loading and tracing setup

pub mod config;
pub mod driver;
pub mod error;
pub mod format;
pub mod limits;
pub mod logging;
pub mod video;

pub use driver::{
    Codec, DecodePicture, ExportFlags, Image, MapFlags, SurfaceDriver, SurfaceId, UsageHint,
};
pub use error::{DriverError, VaError, VaResult};
pub use format::{ChromaFormat, Fourcc, VideoFormat, MAX_PLANES};
pub use video::{VideoAlignment, VideoInfo};
