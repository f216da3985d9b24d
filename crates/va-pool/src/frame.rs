//! CPU access to a whole frame.
//!
//! [`VideoFrame`] maps every memory of a buffer and resolves each plane to a
//! slice, whether the planes share one memory (direct allocator) or live in
//! one memory per plane (exported allocator, imports).

use va_core::driver::MapFlags;
use va_core::error::{VaError, VaResult};
use va_core::format::{VideoFormat, MAX_PLANES};
use va_core::video::VideoInfo;

use crate::buffer::Buffer;
use crate::memory::MemoryMap;

#[derive(Debug, Clone, Copy, Default)]
struct PlaneRef {
    memory: usize,
    offset: usize,
    len: usize,
}

/// A mapped frame.
///
/// Plane offsets count from the start of the first memory; a plane held by
/// a later memory is found by subtracting the sizes of the memories before
/// it. Dropping the frame unmaps everything, writing back copied images.
pub struct VideoFrame<'a> {
    maps: Vec<MemoryMap<'a>>,
    format: VideoFormat,
    width: u32,
    height: u32,
    stride: [usize; MAX_PLANES],
    planes: [PlaneRef; MAX_PLANES],
    n_planes: usize,
}

impl<'a> VideoFrame<'a> {
    /// Map `buffer` with `flags`.
    ///
    /// The geometry comes from the buffer's video meta when it has one,
    /// otherwise from `info`.
    pub fn map(buffer: &'a Buffer, info: &VideoInfo, flags: MapFlags) -> VaResult<Self> {
        if flags.contains(MapFlags::VA) {
            return Err(VaError::InvalidConfig(
                "frames need CPU access, not a surface handle".into(),
            ));
        }
        if buffer.n_memory() == 0 {
            return Err(VaError::InvalidConfig("buffer holds no memory".into()));
        }

        let (format, width, height, n_planes, stride, offset) = match buffer.video_meta() {
            Some(meta) => (
                meta.format,
                meta.width,
                meta.height,
                meta.n_planes,
                meta.stride,
                meta.offset,
            ),
            None => (
                info.format,
                info.width,
                info.height,
                info.n_planes(),
                info.stride,
                info.offset,
            ),
        };
        let n_planes = n_planes.min(MAX_PLANES);
        let n_memory = buffer.n_memory();
        if n_memory != 1 && n_memory != n_planes {
            return Err(VaError::InvalidConfig(format!(
                "{n_memory} memories for {n_planes} planes of {format}"
            )));
        }

        let maps = buffer
            .memories()
            .iter()
            .map(|memory| memory.map(flags))
            .collect::<VaResult<Vec<_>>>()?;

        let mut planes = [PlaneRef::default(); MAX_PLANES];
        for (i, plane) in planes.iter_mut().enumerate().take(n_planes) {
            let memory = if n_memory == 1 { 0 } else { i };
            let base: usize = buffer.memories()[..memory].iter().map(|m| m.size()).sum();
            let rows = format.plane_rows(i, height);
            let len = match rows {
                0 => 0,
                rows => stride[i]
                    .checked_mul(rows - 1)
                    .and_then(|l| l.checked_add(format.plane_row_bytes(i, width)))
                    .ok_or(VaError::SizeOverflow {
                        context: "plane extent",
                    })?,
            };
            let mapped = maps[memory].len();
            let offset = offset[i]
                .checked_sub(base)
                .filter(|off| off.checked_add(len).is_some_and(|end| end <= mapped))
                .ok_or(VaError::OutOfRange {
                    offset: offset[i],
                    size: len,
                    max: base + mapped,
                })?;
            *plane = PlaneRef {
                memory,
                offset,
                len,
            };
        }

        Ok(Self {
            maps,
            format,
            width,
            height,
            stride,
            planes,
            n_planes,
        })
    }

    /// Image format of the frame.
    #[must_use]
    pub fn format(&self) -> VideoFormat {
        self.format
    }

    /// Visible width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Visible height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of planes.
    #[must_use]
    pub fn n_planes(&self) -> usize {
        self.n_planes
    }

    /// Row pitch of `plane`.
    #[must_use]
    pub fn stride(&self, plane: usize) -> Option<usize> {
        (plane < self.n_planes).then(|| self.stride[plane])
    }

    /// Bytes of `plane`, from its first visible pixel to the end of its
    /// last visible row.
    #[must_use]
    pub fn plane(&self, plane: usize) -> Option<&[u8]> {
        if plane >= self.n_planes {
            return None;
        }
        let p = self.planes[plane];
        self.maps[p.memory].get(p.offset..p.offset + p.len)
    }

    /// Writable bytes of `plane`; `None` unless mapped with `WRITE`.
    pub fn plane_mut(&mut self, plane: usize) -> Option<&mut [u8]> {
        if plane >= self.n_planes {
            return None;
        }
        let p = self.planes[plane];
        self.maps[p.memory]
            .as_mut_slice()?
            .get_mut(p.offset..p.offset + p.len)
    }

    /// Copy the visible area into the default packed layout of the format.
    pub fn copy_to_packed(&self) -> VaResult<Vec<u8>> {
        let packed = VideoInfo::new(self.format, self.width, self.height)?;
        let mut out = vec![0u8; packed.size];
        for i in 0..self.n_planes {
            let Some(src) = self.plane(i) else { continue };
            let row_bytes = self.format.plane_row_bytes(i, self.width);
            let rows = self.format.plane_rows(i, self.height);
            for row in 0..rows {
                let from = row * self.stride[i];
                let to = packed.offset[i] + row * packed.stride[i];
                out[to..to + row_bytes].copy_from_slice(&src[from..from + row_bytes]);
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for VideoFrame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("n_planes", &self.n_planes)
            .field("memories", &self.maps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::display::Display;
    use va_core::config::AllocatorKind;
    use va_core::driver::UsageHint;
    use va_driver_mock::{MockConfig, MockDriver, MockHandle};

    fn allocator(kind: AllocatorKind, format: VideoFormat) -> (Allocator, VideoInfo, MockHandle) {
        let driver = MockDriver::new(MockConfig::default());
        let handle = driver.handle();
        let allocator = Allocator::new(kind, Display::new(driver), vec![VideoFormat::Nv12]);
        let info = VideoInfo::new(format, 64, 48).unwrap();
        let committed = allocator.set_format(&info, UsageHint::Generic).unwrap();
        (allocator, committed, handle)
    }

    #[test]
    fn test_derived_frame_planes() {
        let (alloc, info, handle) = allocator(AllocatorKind::Surface, VideoFormat::Nv12);
        let mut buffer = Buffer::new();
        alloc.setup_buffer(&mut buffer).unwrap();

        {
            let mut frame = VideoFrame::map(&buffer, &info, MapFlags::WRITE).unwrap();
            assert_eq!(frame.n_planes(), 2);
            assert_eq!(frame.stride(0), Some(64));
            assert_eq!(frame.stride(2), None);
            frame.plane_mut(0).unwrap().fill(0x10);
            frame.plane_mut(1).unwrap().fill(0x80);
        }
        assert_eq!(handle.put_image_calls(), 0);

        let frame = VideoFrame::map(&buffer, &info, MapFlags::READ).unwrap();
        assert!(frame.plane(0).unwrap().iter().all(|&b| b == 0x10));
        assert!(frame.plane(1).unwrap().iter().all(|&b| b == 0x80));
    }

    #[test]
    fn test_copy_path_round_trip() {
        let (alloc, info, handle) = allocator(AllocatorKind::Surface, VideoFormat::I420);
        let mut buffer = Buffer::new();
        alloc.setup_buffer(&mut buffer).unwrap();

        {
            let mut frame = VideoFrame::map(&buffer, &info, MapFlags::READ | MapFlags::WRITE)
                .unwrap();
            frame.plane_mut(0).unwrap().fill(1);
            frame.plane_mut(1).unwrap().fill(2);
            frame.plane_mut(2).unwrap().fill(3);
        }
        assert_eq!(handle.put_image_calls(), 1);

        let frame = VideoFrame::map(&buffer, &info, MapFlags::READ).unwrap();
        let packed = frame.copy_to_packed().unwrap();
        let default = VideoInfo::new(VideoFormat::I420, 64, 48).unwrap();
        assert_eq!(packed.len(), default.size);
        assert!(packed[..default.offset[1]].iter().all(|&b| b == 1));
        assert!(packed[default.offset[1]..default.offset[2]].iter().all(|&b| b == 2));
        assert!(packed[default.offset[2]..].iter().all(|&b| b == 3));
    }

    #[test]
    fn test_exported_planes_resolve_per_memory() {
        let (alloc, info, _handle) = allocator(AllocatorKind::Dmabuf, VideoFormat::Nv12);
        let mut buffer = Buffer::new();
        alloc.setup_buffer(&mut buffer).unwrap();
        assert_eq!(buffer.n_memory(), 2);

        {
            let mut frame = VideoFrame::map(&buffer, &info, MapFlags::WRITE).unwrap();
            frame.plane_mut(1).unwrap()[0] = 0x42;
        }
        // the chroma plane starts after 48 luma rows of the surface storage
        let luma = buffer.memory(0).unwrap().map(MapFlags::READ).unwrap();
        assert_eq!(luma[64 * 48], 0x42);
        drop(luma);

        let mut frame = VideoFrame::map(&buffer, &info, MapFlags::READ).unwrap();
        assert_eq!(frame.plane(1).unwrap()[0], 0x42);
        assert!(frame.plane_mut(1).is_none());
    }

    #[test]
    fn test_rejects_handle_mapping_and_empty_buffers() {
        let (alloc, info, _handle) = allocator(AllocatorKind::Surface, VideoFormat::Nv12);
        assert!(matches!(
            VideoFrame::map(&Buffer::new(), &info, MapFlags::READ),
            Err(VaError::InvalidConfig(_))
        ));
        let mut buffer = Buffer::new();
        alloc.setup_buffer(&mut buffer).unwrap();
        assert!(matches!(
            VideoFrame::map(&buffer, &info, MapFlags::VA),
            Err(VaError::InvalidConfig(_))
        ));
    }
}
