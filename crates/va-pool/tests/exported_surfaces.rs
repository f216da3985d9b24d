//! Exported-plane allocation through the pool.

use va_core::config::AllocatorKind;
use va_core::driver::MapFlags;
use va_core::{VideoFormat, VideoInfo};
use va_driver_mock::{MockDriver, MockHandle};
use va_pool::{Allocator, Display, PoolConfig, VaPool, VideoFrame};

fn dmabuf_pool() -> (VaPool, MockHandle) {
    let driver = MockDriver::default();
    let handle = driver.handle();
    let allocator = Allocator::new(AllocatorKind::Dmabuf, Display::new(driver), Vec::new());
    (VaPool::new(allocator), handle)
}

#[test]
fn plane_memories_share_one_surface() {
    let (pool, handle) = dmabuf_pool();
    let info = VideoInfo::new(VideoFormat::I420, 64, 64).unwrap();
    pool.set_config(PoolConfig::new(info).with_buffers(0, 2))
        .unwrap();
    pool.start().unwrap();

    let buffer = pool.acquire().unwrap();
    assert_eq!(buffer.n_memory(), 3);
    let planes: Vec<_> = buffer
        .memories()
        .iter()
        .map(|m| m.as_dmabuf().unwrap())
        .collect();
    assert!(planes.iter().all(|p| p.surface() == planes[0].surface()));
    assert_eq!(planes[0].shared_surface().ref_count(), 3);
    assert_eq!(pool.allocator().surface_count(), 1);

    let surface = buffer.surface();
    drop(planes);
    drop(buffer);
    // the whole group comes back as one buffer
    let again = pool.acquire().unwrap();
    assert_eq!(again.surface(), surface);
    assert_eq!(again.n_memory(), 3);
    drop(again);

    pool.stop();
    // probe plus the pooled surface, each destroyed once
    assert_eq!(handle.surfaces_destroyed(), 2);
    assert_eq!(handle.live_surfaces(), 0);
}

#[test]
fn exported_offsets_need_video_meta() {
    let (pool, _handle) = dmabuf_pool();
    let info = VideoInfo::new(VideoFormat::Nv12, 64, 64).unwrap();
    pool.set_config(PoolConfig::new(info.clone()).with_buffers(0, 2))
        .unwrap();
    pool.start().unwrap();
    // the chroma plane counts from the start of the second object
    assert!(pool.requires_video_meta());

    let buffer = pool.acquire().unwrap();
    let meta = buffer.video_meta().unwrap();
    assert_eq!(meta.n_planes, 2);
    assert_eq!(meta.offset[0], 0);
    assert!(meta.offset[1] > buffer.memory(0).unwrap().size());

    {
        let mut frame = VideoFrame::map(&buffer, &info, MapFlags::WRITE).unwrap();
        frame.plane_mut(0).unwrap().fill(0x20);
        frame.plane_mut(1).unwrap().fill(0x90);
    }
    let frame = VideoFrame::map(&buffer, &info, MapFlags::READ).unwrap();
    let packed = frame.copy_to_packed().unwrap();
    assert!(packed[..info.offset[1]].iter().all(|&b| b == 0x20));
    assert!(packed[info.offset[1]..].iter().all(|&b| b == 0x90));
}
