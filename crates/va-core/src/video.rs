//! Video geometry: format, size and per-plane layout.

use serde::{Deserialize, Serialize};

use crate::error::{VaError, VaResult};
use crate::format::{PlaneLayout, VideoFormat, MAX_PLANES};
use crate::limits::{validate_frame_bytes, validate_frame_size};

/// Format, visible size and plane layout of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    /// Image format.
    pub format: VideoFormat,
    /// Visible width in pixels.
    pub width: u32,
    /// Visible height in pixels.
    pub height: u32,
    /// Row pitch of each plane in bytes.
    pub stride: [usize; MAX_PLANES],
    /// Offset of each plane from the frame start.
    pub offset: [usize; MAX_PLANES],
    /// Total frame size in bytes.
    pub size: usize,
}

/// Padding around the visible area and per-plane stride masks.
///
/// `stride_align[i]` is a mask: a stride is aligned when `stride & mask == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoAlignment {
    /// Rows above the visible area.
    pub padding_top: u32,
    /// Rows below the visible area.
    pub padding_bottom: u32,
    /// Pixels left of the visible area.
    pub padding_left: u32,
    /// Pixels right of the visible area.
    pub padding_right: u32,
    /// Per-plane stride masks.
    pub stride_align: [usize; MAX_PLANES],
}

fn default_height_align(format: VideoFormat) -> u32 {
    if format.is_vertically_subsampled() {
        2
    } else {
        1
    }
}

impl VideoInfo {
    /// Default packed layout for `format` at `width` x `height`.
    pub fn new(format: VideoFormat, width: u32, height: u32) -> VaResult<Self> {
        validate_frame_size(width, height, 1)?;
        let layout = format
            .layout(width, height, 4, default_height_align(format))
            .ok_or(VaError::SizeOverflow {
                context: "default plane layout",
            })?;
        validate_frame_bytes(layout.size)?;

        let mut info = Self {
            format,
            width,
            height,
            stride: [0; MAX_PLANES],
            offset: [0; MAX_PLANES],
            size: 0,
        };
        info.set_layout(&layout);
        Ok(info)
    }

    /// Planes used by the format.
    #[must_use]
    pub fn n_planes(&self) -> usize {
        self.format.n_planes()
    }

    /// Replace strides, offsets and size.
    pub fn set_layout(&mut self, layout: &PlaneLayout) {
        self.stride = [0; MAX_PLANES];
        self.offset = [0; MAX_PLANES];
        let n = layout.n_planes.min(MAX_PLANES);
        self.stride[..n].copy_from_slice(&layout.stride[..n]);
        self.offset[..n].copy_from_slice(&layout.offset[..n]);
        self.size = layout.size;
    }

    /// Strides, offsets and size as a layout.
    #[must_use]
    pub fn plane_layout(&self) -> PlaneLayout {
        PlaneLayout {
            n_planes: self.n_planes(),
            stride: self.stride,
            offset: self.offset,
            size: self.size,
        }
    }

    /// Whether every plane has the same offset and stride in both.
    #[must_use]
    pub fn same_plane_layout(&self, other: &VideoInfo) -> bool {
        let n = self.n_planes().min(MAX_PLANES);
        self.stride[..n] == other.stride[..n] && self.offset[..n] == other.offset[..n]
    }

    /// Apply padding and stride alignment.
    ///
    /// The visible size is unchanged; offsets point at the first visible
    /// pixel of each plane inside the padded area.
    pub fn align(&mut self, align: &VideoAlignment) -> VaResult<()> {
        let padded_width = self
            .width
            .checked_add(align.padding_left)
            .and_then(|w| w.checked_add(align.padding_right))
            .ok_or(VaError::SizeOverflow {
                context: "padded width",
            })?;
        let padded_height = self
            .height
            .checked_add(align.padding_top)
            .and_then(|h| h.checked_add(align.padding_bottom))
            .ok_or(VaError::SizeOverflow {
                context: "padded height",
            })?;
        validate_frame_size(padded_width, padded_height, 1)?;

        let height_align = default_height_align(self.format);
        let rows_total = padded_height
            .checked_next_multiple_of(height_align)
            .ok_or(VaError::SizeOverflow {
                context: "padded height",
            })?;
        let base = self
            .format
            .layout(padded_width, padded_height, 4, height_align)
            .ok_or(VaError::SizeOverflow {
                context: "padded layout",
            })?;

        let mut running = 0usize;
        for i in 0..base.n_planes {
            let mask = align.stride_align[i];
            let stride = base
                .stride[i]
                .checked_add(mask)
                .map(|s| s & !mask)
                .ok_or(VaError::SizeOverflow {
                    context: "aligned stride",
                })?;
            let rows = self.format.plane_rows(i, rows_total);
            let (x_shift, y_shift) = self.format.plane_shifts(i);
            let pad_rows = (align.padding_top >> y_shift) as usize;
            let pad_bytes = (align.padding_left >> x_shift) as usize
                * self.format.plane_pixel_stride(i);

            self.stride[i] = stride;
            self.offset[i] = running + pad_rows * stride + pad_bytes;
            running = stride
                .checked_mul(rows)
                .and_then(|plane_size| running.checked_add(plane_size))
                .ok_or(VaError::SizeOverflow {
                    context: "padded geometry",
                })?;
        }
        validate_frame_bytes(running)?;
        self.size = running;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_nv12() {
        let info = VideoInfo::new(VideoFormat::Nv12, 1920, 1080).unwrap();
        assert_eq!(info.n_planes(), 2);
        assert_eq!(info.stride[..2], [1920, 1920]);
        assert_eq!(info.offset[1], 1920 * 1080);
        assert_eq!(info.size, 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn test_rejects_zero_geometry() {
        assert!(VideoInfo::new(VideoFormat::Nv12, 0, 16).is_err());
    }

    #[test]
    fn test_align_with_padding() {
        let mut info = VideoInfo::new(VideoFormat::Nv12, 100, 100).unwrap();
        let align = VideoAlignment {
            padding_top: 2,
            padding_bottom: 2,
            padding_left: 4,
            padding_right: 4,
            stride_align: [63, 63, 0, 0],
        };
        info.align(&align).unwrap();
        // 108 -> 128 after the 64 byte mask, 104 rows, 52 chroma rows
        assert_eq!(info.stride[..2], [128, 128]);
        assert_eq!(info.offset[0], 2 * 128 + 4);
        assert_eq!(info.offset[1], 128 * 104 + 128 + 4);
        assert_eq!(info.size, 128 * 104 + 128 * 52);
        assert_eq!((info.width, info.height), (100, 100));
    }

    #[test]
    fn test_align_without_padding_is_default_layout() {
        let mut info = VideoInfo::new(VideoFormat::Yuy2, 64, 32).unwrap();
        let before = info.clone();
        info.align(&VideoAlignment::default()).unwrap();
        assert_eq!(info, before);
    }

    #[test]
    fn test_same_plane_layout_ignores_unused_planes() {
        let a = VideoInfo::new(VideoFormat::Nv12, 64, 64).unwrap();
        let mut b = a.clone();
        b.stride[3] = 99;
        assert!(a.same_plane_layout(&b));
        b.offset[1] += 64;
        assert!(!a.same_plane_layout(&b));
    }
}
