//! Pixel copies between surfaces and images.
//!
//! Layouts with the same plane geometry are copied row by row. The 8-bit
//! 4:2:0 family (NV12, NV21, I420, YV12) also converts between members by
//! moving chroma samples individually. Anything else is reported as an
//! invalid image format, like a real driver would.

use va_core::format::{PlaneLayout, VideoFormat};

/// One side of a copy.
pub(crate) struct FrameRef<'a> {
    pub format: VideoFormat,
    pub layout: &'a PlaneLayout,
    pub data: &'a [u8],
}

/// Mutable side of a copy.
pub(crate) struct FrameMut<'a> {
    pub format: VideoFormat,
    pub layout: &'a PlaneLayout,
    pub data: &'a mut [u8],
}

fn same_geometry(a: VideoFormat, b: VideoFormat) -> bool {
    a.n_planes() == b.n_planes()
        && (0..a.n_planes()).all(|i| {
            a.plane_shifts(i) == b.plane_shifts(i)
                && a.plane_pixel_stride(i) == b.plane_pixel_stride(i)
        })
}

fn is_yuv420_8bit(format: VideoFormat) -> bool {
    matches!(
        format,
        VideoFormat::Nv12 | VideoFormat::Nv21 | VideoFormat::I420 | VideoFormat::Yv12
    )
}

/// Copy `rows` rows of `row_bytes` from one plane to another.
fn copy_plane(
    src: &FrameRef<'_>,
    dst: &mut FrameMut<'_>,
    plane: usize,
    row_bytes: usize,
    rows: usize,
) -> Option<()> {
    let (src_stride, src_offset) = (src.layout.stride[plane], src.layout.offset[plane]);
    let (dst_stride, dst_offset) = (dst.layout.stride[plane], dst.layout.offset[plane]);
    for row in 0..rows {
        let s = src_offset + row * src_stride;
        let d = dst_offset + row * dst_stride;
        let from = src.data.get(s..s + row_bytes)?;
        dst.data.get_mut(d..d + row_bytes)?.copy_from_slice(from);
    }
    Some(())
}

/// Byte positions of the U and V samples of chroma pixel (`cx`, `cy`).
fn chroma_positions(
    format: VideoFormat,
    layout: &PlaneLayout,
    cx: usize,
    cy: usize,
) -> (usize, usize) {
    let row = |plane: usize| layout.offset[plane] + cy * layout.stride[plane];
    match format {
        VideoFormat::Nv12 => (row(1) + cx * 2, row(1) + cx * 2 + 1),
        VideoFormat::Nv21 => (row(1) + cx * 2 + 1, row(1) + cx * 2),
        VideoFormat::Yv12 => (row(2) + cx, row(1) + cx),
        _ => (row(1) + cx, row(2) + cx),
    }
}

fn convert_yuv420(
    src: &FrameRef<'_>,
    dst: &mut FrameMut<'_>,
    width: u32,
    height: u32,
) -> Option<()> {
    copy_plane(src, dst, 0, width as usize, height as usize)?;

    let chroma_w = (width as usize).div_ceil(2);
    let chroma_h = (height as usize).div_ceil(2);
    for cy in 0..chroma_h {
        for cx in 0..chroma_w {
            let (su, sv) = chroma_positions(src.format, src.layout, cx, cy);
            let (du, dv) = chroma_positions(dst.format, dst.layout, cx, cy);
            let (u, v) = (*src.data.get(su)?, *src.data.get(sv)?);
            *dst.data.get_mut(du)? = u;
            *dst.data.get_mut(dv)? = v;
        }
    }
    Some(())
}

/// Copy the visible `width` x `height` area. Returns `false` when the
/// formats are incompatible or a layout does not fit its data.
pub(crate) fn copy_frame(
    src: &FrameRef<'_>,
    dst: &mut FrameMut<'_>,
    width: u32,
    height: u32,
) -> bool {
    let copied = if same_geometry(src.format, dst.format) {
        (0..src.format.n_planes()).try_for_each(|plane| {
            let row_bytes = src.format.plane_row_bytes(plane, width);
            let rows = src.format.plane_rows(plane, height);
            copy_plane(src, dst, plane, row_bytes, rows)
        })
    } else if is_yuv420_8bit(src.format) && is_yuv420_8bit(dst.format) {
        convert_yuv420(src, dst, width, height)
    } else {
        None
    };
    copied.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(format: VideoFormat, width: u32, height: u32, align: usize) -> (PlaneLayout, Vec<u8>) {
        let layout = format.layout(width, height, align, 2).unwrap();
        let data = vec![0u8; layout.size];
        (layout, data)
    }

    #[test]
    fn test_same_format_respects_strides() {
        let (src_layout, mut src_data) = frame(VideoFormat::Nv12, 6, 4, 64);
        let (dst_layout, mut dst_data) = frame(VideoFormat::Nv12, 6, 4, 8);
        for (i, b) in src_data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let src = FrameRef {
            format: VideoFormat::Nv12,
            layout: &src_layout,
            data: &src_data,
        };
        let mut dst = FrameMut {
            format: VideoFormat::Nv12,
            layout: &dst_layout,
            data: &mut dst_data,
        };
        assert!(copy_frame(&src, &mut dst, 6, 4));
        // second luma row starts at 64 in the source and 8 in the destination
        assert_eq!(dst_data[8..14], src_data[64..70]);
        assert_eq!(
            dst_data[dst_layout.offset[1]..dst_layout.offset[1] + 6],
            src_data[src_layout.offset[1]..src_layout.offset[1] + 6]
        );
    }

    #[test]
    fn test_nv12_to_i420_moves_chroma() {
        let (src_layout, mut src_data) = frame(VideoFormat::Nv12, 4, 2, 4);
        let (dst_layout, mut dst_data) = frame(VideoFormat::I420, 4, 2, 4);
        let uv = src_layout.offset[1];
        src_data[uv..uv + 4].copy_from_slice(&[10, 20, 11, 21]);
        let src = FrameRef {
            format: VideoFormat::Nv12,
            layout: &src_layout,
            data: &src_data,
        };
        let mut dst = FrameMut {
            format: VideoFormat::I420,
            layout: &dst_layout,
            data: &mut dst_data,
        };
        assert!(copy_frame(&src, &mut dst, 4, 2));
        assert_eq!(dst_data[dst_layout.offset[1]..dst_layout.offset[1] + 2], [10, 11]);
        assert_eq!(dst_data[dst_layout.offset[2]..dst_layout.offset[2] + 2], [20, 21]);
    }

    #[test]
    fn test_incompatible_formats_rejected() {
        let (src_layout, src_data) = frame(VideoFormat::Nv12, 4, 4, 4);
        let (dst_layout, mut dst_data) = frame(VideoFormat::Yuy2, 4, 4, 4);
        let src = FrameRef {
            format: VideoFormat::Nv12,
            layout: &src_layout,
            data: &src_data,
        };
        let mut dst = FrameMut {
            format: VideoFormat::Yuy2,
            layout: &dst_layout,
            data: &mut dst_data,
        };
        assert!(!copy_frame(&src, &mut dst, 4, 4));
    }
}
