//! 延迟命令缓冲区在 soft 后端命令上下文上的重放

use dist_gfx::gfx::soft::{Soft, SoftCommandContext, SoftCommandQueue, SoftDevice};
use dist_gfx::gfx::{CommandQueue, Device};
use dist_gfx::renderer::opcode::PrimitiveTopology;
use dist_gfx::renderer::{
    BufferDescriptor, BufferUsageType, CommandBufferDescriptor, CommandBufferRegistry,
    CommandRecorder, ContextExecutor, DeferredCommandBuffer, ResourceState, ResourceTable,
    StagingBufferPool,
};

const VERTICES: u32 = 10;
const SNAPSHOT: u32 = 11;

fn resources(device: &SoftDevice) -> ResourceTable<Soft> {
    let mut table = ResourceTable::new();
    for (name, state) in [
        (VERTICES, ResourceState::VertexAndConstantBuffer),
        (SNAPSHOT, ResourceState::ShaderResource),
    ] {
        let resource = device
            .create_resource(&BufferDescriptor::device_local(128, BufferUsageType::Vertex), state)
            .unwrap();
        table.insert(name, resource);
    }
    table
}

#[test]
fn replayed_update_reaches_the_buffer() {
    let device = SoftDevice::new();
    let mut context = SoftCommandContext::new();
    let mut pool = StagingBufferPool::<Soft>::new(device.clone(), 256);
    let mut table = resources(&device);
    let registry = CommandBufferRegistry::new();

    let mut buffer = DeferredCommandBuffer::new(CommandBufferDescriptor::direct_one_time());
    buffer.begin().unwrap();
    buffer.update_buffer(VERTICES, 16, &[0xAA; 32]);
    buffer.end().unwrap();

    let mut executor = ContextExecutor::new(&mut context, &mut pool, &mut table);
    buffer.submit(&registry, &mut executor);
    executor.finish().unwrap();

    let vertices = table.get(VERTICES).unwrap();
    assert_eq!(&vertices.native().contents()[16..48], &[0xAA; 32]);
    assert!(vertices.native().contents()[..16].iter().all(|&b| b == 0));
    assert_eq!(vertices.current_state(), ResourceState::VertexAndConstantBuffer);
    assert_eq!(pool.stats().staged_bytes, 32);
}

#[test]
fn bundle_transfers_replay_in_order_and_read_back() {
    let device = SoftDevice::new();
    let mut context = SoftCommandContext::new();
    let mut queue = SoftCommandQueue::new(&device);
    let mut pool = StagingBufferPool::<Soft>::new(device.clone(), 256);
    let mut table = resources(&device);
    let mut registry = CommandBufferRegistry::new();

    let mut bundle = DeferredCommandBuffer::new(CommandBufferDescriptor::bundle());
    bundle.begin().unwrap();
    bundle.fill_buffer(VERTICES, 0, 64, 0x1111_1111);
    bundle.update_buffer(VERTICES, 8, &[0x22; 8]);
    bundle.end().unwrap();
    let bundle = registry.register(bundle).unwrap();

    let mut primary = DeferredCommandBuffer::new(CommandBufferDescriptor::direct_reusable());
    primary.begin().unwrap();
    primary.execute(bundle, &registry).unwrap();
    primary.copy_buffer(SNAPSHOT, 0, VERTICES, 0, 64);
    primary.draw(PrimitiveTopology::TriangleList, 0..3);
    primary.end().unwrap();

    let mut executor = ContextExecutor::new(&mut context, &mut pool, &mut table);
    primary.submit(&registry, &mut executor);
    let state = executor.finish().unwrap();
    assert_eq!(state.draws, 1);

    queue
        .finish_and_submit_command_context(&mut context, false)
        .unwrap();

    let mut out = [0u8; 24];
    let snapshot = table.get_mut(SNAPSHOT).unwrap();
    pool.read_subresource_region(&mut context, &mut queue, snapshot, 0, &mut out, 4)
        .unwrap();

    assert_eq!(&out[..8], &[0x11; 8]);
    assert_eq!(&out[8..16], &[0x22; 8]);
    assert_eq!(&out[16..], &[0x11; 8]);
    assert_eq!(snapshot.current_state(), ResourceState::ShaderResource);
    assert_eq!(
        table.get(VERTICES).unwrap().current_state(),
        ResourceState::VertexAndConstantBuffer
    );
}
