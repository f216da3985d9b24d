//! Pixel formats, fourcc codes and chroma classes.
//!
//! The accelerator identifies an image layout by a fourcc and a surface by a
//! chroma class ("render target format"). [`VideoFormat`] is the caller-facing
//! pixel format; the table in this module maps it to both. Formats without a
//! table entry (packed 24-bit RGB) exist so that negotiation can reject them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of planes any supported format uses.
pub const MAX_PLANES: usize = 4;

/// A four character code, stored little endian the way the driver expects.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fourcc(pub u32);

impl Fourcc {
    /// Build a fourcc from its four ASCII characters.
    #[must_use]
    pub const fn from_bytes(code: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*code))
    }

    /// The four characters of this code.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.to_bytes() {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fourcc({self})")
    }
}

/// Chroma subsampling class of a surface (the driver's render-target format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromaFormat {
    /// 8-bit 4:2:0
    Yuv420,
    /// 8-bit 4:2:2
    Yuv422,
    /// 8-bit 4:4:4
    Yuv444,
    /// Luma only
    Yuv400,
    /// 10-bit 4:2:0
    Yuv420P10,
    /// 10-bit 4:2:2
    Yuv422P10,
    /// 10-bit 4:4:4
    Yuv444P10,
    /// 32-bit packed RGB
    Rgb32,
}

impl ChromaFormat {
    /// The `VA_RT_FORMAT_*` value for this class.
    #[must_use]
    pub const fn va_rt_format(self) -> u32 {
        match self {
            Self::Yuv420 => 0x0000_0001,
            Self::Yuv422 => 0x0000_0002,
            Self::Yuv444 => 0x0000_0004,
            Self::Yuv400 => 0x0000_0010,
            Self::Yuv420P10 => 0x0000_0100,
            Self::Yuv422P10 => 0x0000_0200,
            Self::Yuv444P10 => 0x0000_0400,
            Self::Rgb32 => 0x0002_0000,
        }
    }

    /// Reverse of [`ChromaFormat::va_rt_format`].
    #[must_use]
    pub fn from_va_rt_format(value: u32) -> Option<Self> {
        [
            Self::Yuv420,
            Self::Yuv422,
            Self::Yuv444,
            Self::Yuv400,
            Self::Yuv420P10,
            Self::Yuv422P10,
            Self::Yuv444P10,
            Self::Rgb32,
        ]
        .into_iter()
        .find(|chroma| chroma.va_rt_format() == value)
    }
}

/// Caller-facing pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    /// Y plane followed by interleaved UV, 4:2:0
    Nv12,
    /// Y plane followed by interleaved VU, 4:2:0
    Nv21,
    /// Three planes Y, U, V, 4:2:0
    I420,
    /// Three planes Y, V, U, 4:2:0
    Yv12,
    /// Packed YUYV 4:2:2
    Yuy2,
    /// Packed UYVY 4:2:2
    Uyvy,
    /// 10-bit NV12 in 16-bit little endian words
    #[serde(rename = "p010_10le", alias = "p010")]
    P010,
    /// Packed 10-bit 4:2:2
    Y210,
    /// Packed 10-bit 4:4:4
    Y410,
    /// Packed 8-bit 4:4:4 with alpha
    Vuya,
    /// 32-bit RGBA
    Rgba,
    /// 32-bit BGRA
    Bgra,
    /// 32-bit RGB, padding byte last
    Rgbx,
    /// 32-bit BGR, padding byte last
    Bgrx,
    /// 32-bit ARGB
    Argb,
    /// 32-bit ABGR
    Abgr,
    /// 32-bit RGB, padding byte first
    Xrgb,
    /// 32-bit BGR, padding byte first
    Xbgr,
    /// 8-bit luma only
    Gray8,
    /// 24-bit packed RGB, no accelerator mapping
    Rgb,
    /// 24-bit packed BGR, no accelerator mapping
    Bgr,
}

struct FormatEntry {
    format: VideoFormat,
    fourcc: Fourcc,
    chroma: ChromaFormat,
}

const fn entry(format: VideoFormat, code: &[u8; 4], chroma: ChromaFormat) -> FormatEntry {
    FormatEntry {
        format,
        fourcc: Fourcc::from_bytes(code),
        chroma,
    }
}

const FORMAT_TABLE: &[FormatEntry] = &[
    entry(VideoFormat::Nv12, b"NV12", ChromaFormat::Yuv420),
    entry(VideoFormat::Nv21, b"NV21", ChromaFormat::Yuv420),
    entry(VideoFormat::Yv12, b"YV12", ChromaFormat::Yuv420),
    entry(VideoFormat::I420, b"I420", ChromaFormat::Yuv420),
    entry(VideoFormat::Vuya, b"AYUV", ChromaFormat::Yuv444),
    entry(VideoFormat::Rgba, b"RGBA", ChromaFormat::Rgb32),
    entry(VideoFormat::Rgbx, b"RGBX", ChromaFormat::Rgb32),
    entry(VideoFormat::Bgra, b"BGRA", ChromaFormat::Rgb32),
    entry(VideoFormat::Argb, b"ARGB", ChromaFormat::Rgb32),
    entry(VideoFormat::Xrgb, b"XRGB", ChromaFormat::Rgb32),
    entry(VideoFormat::Abgr, b"ABGR", ChromaFormat::Rgb32),
    entry(VideoFormat::Xbgr, b"XBGR", ChromaFormat::Rgb32),
    entry(VideoFormat::Bgrx, b"BGRX", ChromaFormat::Rgb32),
    entry(VideoFormat::Uyvy, b"UYVY", ChromaFormat::Yuv422),
    entry(VideoFormat::Yuy2, b"YUY2", ChromaFormat::Yuv422),
    entry(VideoFormat::Y210, b"Y210", ChromaFormat::Yuv422P10),
    entry(VideoFormat::Y410, b"Y410", ChromaFormat::Yuv444P10),
    entry(VideoFormat::P010, b"P010", ChromaFormat::Yuv420P10),
    entry(VideoFormat::Gray8, b"Y800", ChromaFormat::Yuv400),
];

/// One plane of a format: subsampling shifts and bytes per sample.
#[derive(Debug, Clone, Copy)]
struct PlaneDesc {
    x_shift: u32,
    y_shift: u32,
    bytes: usize,
}

const fn plane(x_shift: u32, y_shift: u32, bytes: usize) -> PlaneDesc {
    PlaneDesc {
        x_shift,
        y_shift,
        bytes,
    }
}

/// Byte layout of every plane of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneLayout {
    /// Number of planes in use.
    pub n_planes: usize,
    /// Bytes per row, per plane.
    pub stride: [usize; MAX_PLANES],
    /// Start of each plane from the start of the image.
    pub offset: [usize; MAX_PLANES],
    /// Total bytes.
    pub size: usize,
}

impl VideoFormat {
    /// Every known format, in table order first.
    pub const ALL: [VideoFormat; 21] = [
        Self::Nv12,
        Self::Nv21,
        Self::Yv12,
        Self::I420,
        Self::Vuya,
        Self::Rgba,
        Self::Rgbx,
        Self::Bgra,
        Self::Argb,
        Self::Xrgb,
        Self::Abgr,
        Self::Xbgr,
        Self::Bgrx,
        Self::Uyvy,
        Self::Yuy2,
        Self::Y210,
        Self::Y410,
        Self::P010,
        Self::Gray8,
        Self::Rgb,
        Self::Bgr,
    ];

    fn table_entry(self) -> Option<&'static FormatEntry> {
        FORMAT_TABLE.iter().find(|e| e.format == self)
    }

    /// Fourcc the driver uses for images of this format.
    #[must_use]
    pub fn fourcc(self) -> Option<Fourcc> {
        self.table_entry().map(|e| e.fourcc)
    }

    /// Chroma class of surfaces able to hold this format.
    #[must_use]
    pub fn chroma(self) -> Option<ChromaFormat> {
        self.table_entry().map(|e| e.chroma)
    }

    /// First format in the table using `fourcc`.
    #[must_use]
    pub fn from_fourcc(fourcc: Fourcc) -> Option<Self> {
        FORMAT_TABLE
            .iter()
            .find(|e| e.fourcc == fourcc)
            .map(|e| e.format)
    }

    /// Canonical upper-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nv12 => "NV12",
            Self::Nv21 => "NV21",
            Self::I420 => "I420",
            Self::Yv12 => "YV12",
            Self::Yuy2 => "YUY2",
            Self::Uyvy => "UYVY",
            Self::P010 => "P010_10LE",
            Self::Y210 => "Y210",
            Self::Y410 => "Y410",
            Self::Vuya => "VUYA",
            Self::Rgba => "RGBA",
            Self::Bgra => "BGRA",
            Self::Rgbx => "RGBx",
            Self::Bgrx => "BGRx",
            Self::Argb => "ARGB",
            Self::Abgr => "ABGR",
            Self::Xrgb => "xRGB",
            Self::Xbgr => "xBGR",
            Self::Gray8 => "GRAY8",
            Self::Rgb => "RGB",
            Self::Bgr => "BGR",
        }
    }

    fn planes(self) -> &'static [PlaneDesc] {
        const SEMI_PLANAR: &[PlaneDesc] = &[plane(0, 0, 1), plane(1, 1, 2)];
        const PLANAR_420: &[PlaneDesc] = &[plane(0, 0, 1), plane(1, 1, 1), plane(1, 1, 1)];
        const P010: &[PlaneDesc] = &[plane(0, 0, 2), plane(1, 1, 4)];
        const PACKED_16: &[PlaneDesc] = &[plane(0, 0, 2)];
        const PACKED_24: &[PlaneDesc] = &[plane(0, 0, 3)];
        const PACKED_32: &[PlaneDesc] = &[plane(0, 0, 4)];
        const GRAY: &[PlaneDesc] = &[plane(0, 0, 1)];

        match self {
            Self::Nv12 | Self::Nv21 => SEMI_PLANAR,
            Self::I420 | Self::Yv12 => PLANAR_420,
            Self::P010 => P010,
            Self::Yuy2 | Self::Uyvy => PACKED_16,
            Self::Rgb | Self::Bgr => PACKED_24,
            Self::Gray8 => GRAY,
            Self::Y210
            | Self::Y410
            | Self::Vuya
            | Self::Rgba
            | Self::Bgra
            | Self::Rgbx
            | Self::Bgrx
            | Self::Argb
            | Self::Abgr
            | Self::Xrgb
            | Self::Xbgr => PACKED_32,
        }
    }

    /// Number of planes.
    #[must_use]
    pub fn n_planes(self) -> usize {
        self.planes().len()
    }

    /// Packed 4:2:2 formats, whose planes cannot be addressed independently.
    #[must_use]
    pub const fn is_packed_422(self) -> bool {
        matches!(self, Self::Yuy2 | Self::Uyvy | Self::Y210)
    }

    /// Horizontal and vertical subsampling shifts of `plane`.
    #[must_use]
    pub fn plane_shifts(self, plane: usize) -> (u32, u32) {
        self.planes()
            .get(plane)
            .map_or((0, 0), |p| (p.x_shift, p.y_shift))
    }

    /// Bytes per horizontal sample of `plane`.
    #[must_use]
    pub fn plane_pixel_stride(self, plane: usize) -> usize {
        self.planes().get(plane).map_or(0, |p| p.bytes)
    }

    /// Bytes of visible data in one row of `plane`.
    #[must_use]
    pub fn plane_row_bytes(self, plane: usize, width: u32) -> usize {
        let width = if self.is_packed_422() {
            width.next_multiple_of(2)
        } else {
            width
        };
        self.planes().get(plane).map_or(0, |p| {
            (width as usize).div_ceil(1 << p.x_shift) * p.bytes
        })
    }

    /// Rows of `plane` for an image `height` rows tall.
    #[must_use]
    pub fn plane_rows(self, plane: usize, height: u32) -> usize {
        self.planes()
            .get(plane)
            .map_or(0, |p| (height as usize).div_ceil(1 << p.y_shift))
    }

    /// Whether any plane is vertically subsampled.
    #[must_use]
    pub fn is_vertically_subsampled(self) -> bool {
        self.planes().iter().any(|p| p.y_shift > 0)
    }

    /// Lay the planes out back to back.
    ///
    /// Every stride is rounded up to `stride_align` bytes and the luma height
    /// to `height_align` rows. Returns `None` on arithmetic overflow.
    #[must_use]
    pub fn layout(
        self,
        width: u32,
        height: u32,
        stride_align: usize,
        height_align: u32,
    ) -> Option<PlaneLayout> {
        let stride_align = stride_align.max(1);
        let rows_total = height.checked_next_multiple_of(height_align.max(1))?;

        let mut layout = PlaneLayout {
            n_planes: self.n_planes(),
            ..PlaneLayout::default()
        };
        let mut running = 0usize;
        for i in 0..layout.n_planes {
            let stride = self
                .plane_row_bytes(i, width)
                .checked_next_multiple_of(stride_align)?;
            let rows = self.plane_rows(i, rows_total);
            layout.stride[i] = stride;
            layout.offset[i] = running;
            running = running.checked_add(stride.checked_mul(rows)?)?;
        }
        layout.size = running;
        Some(layout)
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when parsing an unknown format name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown video format '{0}'")]
pub struct ParseFormatError(pub String);

impl FromStr for VideoFormat {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|f| {
                f.name().eq_ignore_ascii_case(wanted)
                    || (*f == Self::P010 && wanted.eq_ignore_ascii_case("p010"))
            })
            .ok_or_else(|| ParseFormatError(wanted.to_string()))
    }
}

/// Pick the physical surface format for an image format.
///
/// Returns the first entry of `surface_formats` equal to `image_format`, else
/// the first entry sharing its chroma class.
#[must_use]
pub fn surface_format_for(
    image_format: VideoFormat,
    surface_formats: &[VideoFormat],
) -> Option<VideoFormat> {
    let chroma = image_format.chroma()?;
    surface_formats
        .iter()
        .copied()
        .find(|f| *f == image_format)
        .or_else(|| {
            surface_formats
                .iter()
                .copied()
                .find(|f| f.chroma() == Some(chroma))
        })
}
