//! Raw accelerator primitives.
//!
//! [`SurfaceDriver`] is the narrow seam to the hardware: one method per driver
//! entry point, no locking, no policy. The pool crate wraps a boxed driver in a
//! `Display`, which owns the device lock, logging and error mapping.
//!
//! Handles are plain integers the driver hands out; the types here only make
//! sure a surface id is never passed where an image id is expected.

use std::fmt;
use std::os::fd::{OwnedFd, RawFd};
use std::ptr::NonNull;

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::format::{ChromaFormat, Fourcc, PlaneLayout, MAX_PLANES};

/// Driver status codes (`VA_STATUS_*`).
pub mod status {
    /// Call succeeded.
    pub const SUCCESS: i32 = 0x00;
    /// Generic failure.
    pub const ERROR_OPERATION_FAILED: i32 = 0x01;
    /// Out of driver memory.
    pub const ERROR_ALLOCATION_FAILED: i32 = 0x02;
    /// Display handle is not valid.
    pub const ERROR_INVALID_DISPLAY: i32 = 0x03;
    /// Surface handle is not valid.
    pub const ERROR_INVALID_SURFACE: i32 = 0x06;
    /// Buffer handle is not valid.
    pub const ERROR_INVALID_BUFFER: i32 = 0x07;
    /// Image handle is not valid.
    pub const ERROR_INVALID_IMAGE: i32 = 0x08;
    /// Chroma format not supported.
    pub const ERROR_UNSUPPORTED_RT_FORMAT: i32 = 0x0e;
    /// Surface still in use.
    pub const ERROR_SURFACE_BUSY: i32 = 0x10;
    /// Parameter rejected.
    pub const ERROR_INVALID_PARAMETER: i32 = 0x12;
    /// Resolution not supported.
    pub const ERROR_RESOLUTION_NOT_SUPPORTED: i32 = 0x13;
    /// Entry point not implemented.
    pub const ERROR_UNIMPLEMENTED: i32 = 0x14;
    /// Image format not supported.
    pub const ERROR_INVALID_IMAGE_FORMAT: i32 = 0x16;

    /// Status string for `code`.
    #[must_use]
    pub fn message(code: i32) -> &'static str {
        match code {
            SUCCESS => "success (no error)",
            ERROR_OPERATION_FAILED => "operation failed",
            ERROR_ALLOCATION_FAILED => "resource allocation failed",
            ERROR_INVALID_DISPLAY => "invalid VADisplay",
            ERROR_INVALID_SURFACE => "invalid VASurfaceID",
            ERROR_INVALID_BUFFER => "invalid VABufferID",
            ERROR_INVALID_IMAGE => "invalid VAImageID",
            ERROR_UNSUPPORTED_RT_FORMAT => "unsupported RT format",
            ERROR_SURFACE_BUSY => "surface is in use",
            ERROR_INVALID_PARAMETER => "invalid parameter",
            ERROR_RESOLUTION_NOT_SUPPORTED => "resolution not supported",
            ERROR_UNIMPLEMENTED => "the requested function is not implemented",
            ERROR_INVALID_IMAGE_FORMAT => "invalid image format",
            _ => "unknown libva error",
        }
    }
}

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#010x})"), self.0)
            }
        }
    };
}

handle_type!(
    /// Accelerator surface handle.
    SurfaceId
);
handle_type!(
    /// Driver image handle.
    ImageId
);
handle_type!(
    /// Driver buffer handle (the storage behind an image).
    BufferId
);

/// Intent tag passed through to surface creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageHint {
    /// No particular use.
    #[default]
    Generic,
    /// Decoder output.
    Decoder,
    /// Encoder input.
    Encoder,
    /// Read by video post-processing.
    VppRead,
    /// Written by video post-processing.
    VppWrite,
    /// Presented on a display.
    Display,
    /// Exported to other devices.
    Export,
}

impl UsageHint {
    /// The `VA_SURFACE_ATTRIB_USAGE_HINT_*` value.
    #[must_use]
    pub const fn va_value(self) -> u32 {
        match self {
            Self::Generic => 0x0000_0000,
            Self::Decoder => 0x0000_0001,
            Self::Encoder => 0x0000_0002,
            Self::VppRead => 0x0000_0004,
            Self::VppWrite => 0x0000_0008,
            Self::Display => 0x0000_0010,
            Self::Export => 0x0000_0020,
        }
    }
}

/// Where surface storage comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// Driver-allocated.
    Va,
    /// Imported DMA-BUF file descriptors.
    DrmPrime,
}

/// Externally allocated storage to wrap in a new surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalBuffers {
    /// DRM fourcc of the storage.
    pub pixel_format: Fourcc,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Total bytes over all descriptors.
    pub data_size: usize,
    /// Row pitch of each plane.
    pub pitches: Vec<usize>,
    /// Offset of each plane.
    pub offsets: Vec<usize>,
    /// Borrowed descriptors; the caller keeps them open for the call.
    pub fds: Vec<RawFd>,
}

/// Parameters for [`SurfaceDriver::create_surfaces`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceRequest {
    /// Chroma class of the surface.
    pub chroma: ChromaFormat,
    /// Exact pixel format, or `None` to let the driver choose for `chroma`.
    pub fourcc: Option<Fourcc>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Intended use.
    pub usage_hint: UsageHint,
    /// Storage to import instead of allocating.
    pub external: Option<ExternalBuffers>,
}

impl SurfaceRequest {
    /// Where the surface storage comes from.
    #[must_use]
    pub fn memory_type(&self) -> MemoryType {
        if self.external.is_some() {
            MemoryType::DrmPrime
        } else {
            MemoryType::Va
        }
    }
}

/// A driver image: CPU-accessible pixel storage plus its layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Image handle.
    pub id: ImageId,
    /// Buffer holding the pixels.
    pub buf: BufferId,
    /// Pixel format.
    pub fourcc: Fourcc,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Total size in bytes.
    pub data_size: usize,
    /// Planes in use.
    pub num_planes: usize,
    /// Row pitch of each plane.
    pub pitches: [usize; MAX_PLANES],
    /// Offset of each plane from the buffer start.
    pub offsets: [usize; MAX_PLANES],
}

impl Image {
    /// Plane layout of this image.
    #[must_use]
    pub fn layout(&self) -> PlaneLayout {
        PlaneLayout {
            n_planes: self.num_planes,
            stride: self.pitches,
            offset: self.offsets,
            size: self.data_size,
        }
    }
}

/// A mapped image buffer.
///
/// The region stays valid until the buffer is unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is plain bytes owned by the driver; access is
// serialized by the memory object that maps it.
#[allow(unsafe_code)]
unsafe impl Send for MappedRegion {}
// SAFETY: see above.
#[allow(unsafe_code)]
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Wrap a driver mapping.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// buffer it came from is unmapped.
    #[allow(unsafe_code)]
    #[must_use]
    pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Start of the mapping.
    #[must_use]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is zero bytes long.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

bitflags! {
    /// Access requested when mapping a memory object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        /// Read access.
        const READ = 1 << 0;
        /// Write access.
        const WRITE = 1 << 1;
        /// Return the raw surface handle instead of pixel data.
        const VA = 1 << 16;
    }
}

bitflags! {
    /// `VA_EXPORT_SURFACE_*` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExportFlags: u32 {
        /// Importer only reads.
        const READ_ONLY = 0x0001;
        /// Importer only writes.
        const WRITE_ONLY = 0x0002;
        /// Importer reads and writes.
        const READ_WRITE = 0x0003;
        /// One layer per plane.
        const SEPARATE_LAYERS = 0x0004;
        /// All planes in one layer.
        const COMPOSED_LAYERS = 0x0008;
    }
}

/// One exported file descriptor.
#[derive(Debug)]
pub struct PrimeObject {
    /// Exported descriptor.
    pub fd: OwnedFd,
    /// Object size in bytes, 0 when the driver did not report it.
    pub size: u64,
    /// DRM format modifier of the object.
    pub drm_format_modifier: u64,
}

/// One plane of an exported layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimePlane {
    /// Index into the descriptor's objects.
    pub object_index: usize,
    /// Byte offset within the object.
    pub offset: usize,
    /// Row pitch in bytes.
    pub pitch: usize,
}

/// An exported layer (one per plane for separate exports).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimeLayer {
    /// DRM fourcc of the layer.
    pub drm_format: u32,
    /// Planes of the layer.
    pub planes: Vec<PrimePlane>,
}

/// Result of [`SurfaceDriver::export_surface`].
#[derive(Debug)]
pub struct PrimeSurfaceDescriptor {
    /// Surface fourcc.
    pub fourcc: Fourcc,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Exported objects.
    pub objects: Vec<PrimeObject>,
    /// Layers referencing the objects.
    pub layers: Vec<PrimeLayer>,
}

/// Codec a picture is decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// MPEG-2.
    Mpeg2,
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    H265,
    /// VP8.
    Vp8,
    /// VP9.
    Vp9,
    /// AV1.
    Av1,
    /// Baseline JPEG.
    Jpeg,
}

/// Kind of a per-picture parameter buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Picture-level parameters.
    PictureParameter,
    /// Inverse quantization matrices.
    IqMatrix,
    /// Probability tables.
    Probability,
    /// Huffman tables.
    HuffmanTable,
}

/// A parameter record forwarded verbatim to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBuffer {
    /// What the record holds.
    pub kind: ParamKind,
    /// Record bytes.
    pub data: Bytes,
}

/// Slice parameters plus the compressed slice bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceBuffer {
    /// Slice parameter record.
    pub params: Bytes,
    /// Compressed slice data.
    pub data: Bytes,
}

/// Everything needed to decode one picture into a surface.
///
/// Contents come already parsed from the codec layer and are never
/// interpreted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodePicture {
    /// Codec of the picture.
    pub codec: Codec,
    /// Parameter records, in submission order.
    pub params: Vec<ParamBuffer>,
    /// Slices, in submission order.
    pub slices: Vec<SliceBuffer>,
}

impl DecodePicture {
    /// Empty picture for `codec`.
    #[must_use]
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            params: Vec::new(),
            slices: Vec::new(),
        }
    }

    /// Queue a parameter buffer.
    pub fn add_param(&mut self, kind: ParamKind, data: impl Into<Bytes>) -> &mut Self {
        self.params.push(ParamBuffer {
            kind,
            data: data.into(),
        });
        self
    }

    /// Queue a slice.
    pub fn add_slice(&mut self, params: impl Into<Bytes>, data: impl Into<Bytes>) -> &mut Self {
        self.slices.push(SliceBuffer {
            params: params.into(),
            data: data.into(),
        });
        self
    }
}

/// Raw accelerator entry points.
///
/// Implementations do no locking of their own; callers serialize every call.
pub trait SurfaceDriver: Send {
    /// Human readable driver name.
    fn vendor(&self) -> &str;

    /// Create `count` surfaces for `request`.
    fn create_surfaces(
        &mut self,
        request: &SurfaceRequest,
        count: usize,
    ) -> Result<Vec<SurfaceId>, DriverError>;

    /// Destroy surfaces.
    fn destroy_surfaces(&mut self, surfaces: &[SurfaceId]) -> Result<(), DriverError>;

    /// Image aliasing the surface storage.
    fn derive_image(&mut self, surface: SurfaceId) -> Result<Image, DriverError>;

    /// Standalone image in `fourcc`.
    fn create_image(&mut self, fourcc: Fourcc, width: u32, height: u32)
        -> Result<Image, DriverError>;

    /// Destroy an image and its buffer.
    fn destroy_image(&mut self, image: ImageId) -> Result<(), DriverError>;

    /// Copy surface content into `image`.
    fn get_image(&mut self, surface: SurfaceId, image: &Image) -> Result<(), DriverError>;

    /// Copy `image` content into the surface.
    fn put_image(&mut self, surface: SurfaceId, image: &Image) -> Result<(), DriverError>;

    /// Block until pending work targeting `surface` has completed.
    fn sync_surface(&mut self, surface: SurfaceId) -> Result<(), DriverError>;

    /// Map an image buffer into the process.
    fn map_buffer(&mut self, buffer: BufferId) -> Result<MappedRegion, DriverError>;

    /// Unmap an image buffer.
    fn unmap_buffer(&mut self, buffer: BufferId) -> Result<(), DriverError>;

    /// Export the surface as DMA-BUF objects.
    fn export_surface(
        &mut self,
        surface: SurfaceId,
        flags: ExportFlags,
    ) -> Result<PrimeSurfaceDescriptor, DriverError>;

    /// Queue decoding of `picture` into `surface`.
    fn submit_decode(
        &mut self,
        surface: SurfaceId,
        picture: &DecodePicture,
    ) -> Result<(), DriverError>;
}
