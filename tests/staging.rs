//! 暂存缓冲池在 soft 后端上的端到端场景

use dist_gfx::gfx::soft::{Soft, SoftCommandContext, SoftCommandQueue, SoftDevice, SoftError};
use dist_gfx::gfx::{Device, NativeBuffer};
use dist_gfx::renderer::{
    BufferDescriptor, BufferUsageType, GpuResource, ResourceState, StagingBufferPool,
};

struct Harness {
    device: SoftDevice,
    context: SoftCommandContext,
    queue: SoftCommandQueue,
    pool: StagingBufferPool<Soft>,
}

impl Harness {
    fn new(chunk_size: u64) -> Self {
        let device = SoftDevice::new();
        Self {
            context: SoftCommandContext::new(),
            queue: SoftCommandQueue::new(&device),
            pool: StagingBufferPool::new(device.clone(), chunk_size),
            device,
        }
    }

    fn buffer(&self, size: u64, state: ResourceState) -> GpuResource<Soft> {
        self.device
            .create_resource(&BufferDescriptor::device_local(size, BufferUsageType::Storage), state)
            .unwrap()
    }
}

#[test]
fn upload_then_read_back_across_frames() {
    let mut h = Harness::new(512);
    let mut target = h.buffer(2048, ResourceState::ShaderResource);

    for frame in 0..3u8 {
        let data = vec![frame + 1; 700];
        h.pool
            .write_staged(&mut h.context, &mut target, 100, &data)
            .unwrap();

        let mut out = vec![0u8; 700];
        h.pool
            .read_subresource_region(&mut h.context, &mut h.queue, &mut target, 100, &mut out, 1)
            .unwrap();
        assert_eq!(out, data);
        assert_eq!(target.current_state(), ResourceState::ShaderResource);

        h.pool.reset();
    }

    // 700 字节大于块容量，每帧复用同一个超大块
    assert_eq!(h.pool.chunk_count(), 1);
    assert_eq!(h.pool.stats().readbacks, 3);
    assert_eq!(h.queue.waits(), 3);
}

#[test]
fn mapped_upload_lands_at_written_range() {
    let mut h = Harness::new(1024);
    let mut target = h.buffer(256, ResourceState::Common);

    {
        let upload = h.pool.map_upload_buffer(32).unwrap();
        for (i, byte) in upload.iter_mut().enumerate() {
            *byte = i as u8;
        }
    }
    h.pool
        .unmap_upload_buffer(&mut h.context, &mut h.queue, &mut target, 64..96)
        .unwrap();

    let contents = target.native().contents();
    assert!(contents[..64].iter().all(|&b| b == 0));
    assert_eq!(&contents[64..96], (0..32).collect::<Vec<u8>>().as_slice());
    assert_eq!(target.current_state(), ResourceState::Common);
    assert_eq!(h.queue.waits(), 0);
}

#[test]
fn feedback_buffer_reflects_immediate_writes() {
    let mut h = Harness::new(1024);
    let mut counters = h.buffer(64, ResourceState::UnorderedAccess);

    h.pool
        .write_immediate(&mut h.context, &mut counters, 8, &[9, 9, 9, 9], 4)
        .unwrap();

    let feedback = h
        .pool
        .map_feedback_buffer(&mut h.context, &mut h.queue, &mut counters, 4..16)
        .unwrap();
    assert_eq!(feedback, &[0, 0, 0, 0, 9, 9, 9, 9, 0, 0, 0, 0]);
    h.pool.unmap_feedback_buffer();

    assert_eq!(counters.current_state(), ResourceState::UnorderedAccess);
}

#[test]
fn native_errors_are_returned_unchanged() {
    let mut h = Harness::new(1024);
    let mut target = h.buffer(128, ResourceState::CopySource);

    h.device.inject_allocation_failure();
    let err = h
        .pool
        .write_staged(&mut h.context, &mut target, 0, &[1; 16])
        .unwrap_err();
    assert!(matches!(err, SoftError::OutOfMemory { .. }));
    assert_eq!(target.current_state(), ResourceState::CopySource);

    h.device.lose_device();
    let mut out = [0u8; 4];
    let err = h
        .pool
        .read_subresource_region(&mut h.context, &mut h.queue, &mut target, 0, &mut out, 4)
        .unwrap_err();
    assert_eq!(err, SoftError::DeviceLost);
}

#[test]
fn zero_sized_transfers_do_nothing() {
    let mut h = Harness::new(1024);
    let mut target = h.buffer(64, ResourceState::Common);

    h.pool.write_staged(&mut h.context, &mut target, 0, &[]).unwrap();
    h.pool.write_immediate(&mut h.context, &mut target, 0, &[], 4).unwrap();
    h.pool
        .read_subresource_region(&mut h.context, &mut h.queue, &mut target, 0, &mut [], 4)
        .unwrap();

    assert_eq!(h.pool.chunk_count(), 0);
    assert_eq!(h.device.allocation_count(), 1);
    assert!(h.context.commands().is_empty());
    assert_eq!(target.native().size(), 64);
}
