//! DistGfx 演示程序
//!
//! 在所选后端上录制并重放延迟命令缓冲区，同时驱动暂存缓冲池完成几帧的数据传输。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件（distgfx.toml）
//! cargo run
//!
//! # 使用 wgpu 后端（命令行覆盖）
//! cargo run -- --wgpu --chunk-size 16384
//! ```
//!
//! # 架构概览
//!
//! ```text
//! ┌─────────────┐
//! │   main.rs   │  演示程序入口
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │  Renderer   │  命令缓冲区 / 暂存缓冲池 / 状态跟踪
//! └──────┬──────┘
//!        │
//!   ┌────┴────┐
//!   │         │
//! ┌─▼──┐   ┌──▼─┐
//! │soft│   │wgpu│  具体后端实现
//! └────┘   └────┘
//! ```

use anyhow::{Context, Result};
use tracing::{debug, info, info_span};

use dist_gfx::core::{log, Config, GraphicsBackend};
use dist_gfx::gfx::soft::{Soft, SoftCommandContext, SoftCommandQueue, SoftDevice, TraceExecutor};
use dist_gfx::gfx::wgpu::{Wgpu, WgpuDevice};
use dist_gfx::gfx::{Backend, CommandQueue, Device};
use dist_gfx::renderer::opcode::{ClearFlags, ClearValue, IndexFormat, PrimitiveTopology, Viewport};
use dist_gfx::{app_error, app_info};
use dist_gfx::renderer::{
    BufferDescriptor, BufferUsageType, CommandBufferDescriptor, CommandBufferRegistry,
    CommandRecorder, ContextExecutor, DeferredCommandBuffer, FenceManager, ResourceState,
    ResourceTable, StagingBufferPool, Timeline,
};

/// 演示的帧数
const FRAME_COUNT: u64 = 3;

/// 传输命令中使用的缓冲区名字
const MESH_BUFFER: u32 = 1;
const MIRROR_BUFFER: u32 = 2;

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载配置文件（distgfx.toml）
/// 2. 应用命令行参数覆盖
/// 3. 初始化日志系统
/// 4. 录制并重放命令缓冲区
/// 5. 在所选后端上运行暂存传输
///
/// # 命令行参数
///
/// - `--soft`: 使用 CPU 参考后端
/// - `--wgpu`: 使用 wgpu 后端
/// - `--chunk-size <value>`: 设置暂存块容量
fn main() -> Result<()> {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("distgfx.toml");

    // 2. 应用命令行参数
    config.apply_args(std::env::args());
    config.validate().context("invalid configuration")?;

    // 3. 初始化日志系统
    let log_file = config
        .logging
        .file_output
        .then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file)
        .context("failed to initialize logger")?;
    app_info!(version = env!("CARGO_PKG_VERSION"), "DistGfx starting...");
    info!(
        backend = config.graphics.backend.name(),
        chunk_size = config.staging.chunk_size,
        "Graphics configuration"
    );

    // 4. 命令缓冲区
    replay_command_buffers(&config)?;

    // 5. 暂存传输
    let result = match config.graphics.backend {
        GraphicsBackend::Soft => {
            let device = SoftDevice::new();
            let mut context = SoftCommandContext::new();
            let mut queue = SoftCommandQueue::new(&device);
            let fence = queue.fence().clone();
            run_staging_frames::<Soft>(&config, device, &mut context, &mut queue, &fence)
        }
        GraphicsBackend::Wgpu => WgpuDevice::from_config(&config.graphics)
            .context("failed to create wgpu device")
            .and_then(|device| {
                info!(adapter = %device.adapter_info().name, "wgpu device ready");
                let mut context = device.create_context();
                let mut queue = device.create_queue();
                let fence = queue.fence().clone();
                run_staging_frames::<Wgpu>(&config, device, &mut context, &mut queue, &fence)
            }),
    };

    if let Err(err) = &result {
        app_error!("Staging run failed: {:#}", err);
    }
    result?;

    app_info!("DistGfx finished");
    Ok(())
}

/// 录制一个 bundle 和一个主命令缓冲区，然后在记录执行上下文上重放
fn replay_command_buffers(config: &Config) -> Result<()> {
    let _span = info_span!("command_buffers").entered();
    let mut registry = CommandBufferRegistry::new();

    let mut bundle = DeferredCommandBuffer::with_config(
        CommandBufferDescriptor::bundle().with_name("mesh bundle"),
        &config.command,
    );
    bundle.begin()?;
    bundle.set_vertex_array(1);
    bundle.draw_indexed(PrimitiveTopology::TriangleList, IndexFormat::Uint16, 0..36, 0, 0..1);
    bundle.end()?;
    let bundle_id = registry.register(bundle)?;

    let mut primary = DeferredCommandBuffer::with_config(
        CommandBufferDescriptor::direct_reusable().with_name("main pass"),
        &config.command,
    );
    primary.begin()?;
    primary.push_debug_group("main pass");
    primary.set_viewport(Viewport::new(0.0, 0.0, 1280.0, 720.0));
    primary.begin_render_pass(
        1,
        1,
        &[ClearValue {
            color: [0.1, 0.1, 0.1, 1.0],
            depth: 1.0,
            stencil: 0,
        }],
    )?;
    primary.set_pipeline_state(7);
    primary.execute(bundle_id, &registry)?;
    primary.end_render_pass()?;
    primary.clear(ClearFlags::DEPTH_STENCIL);
    primary.pop_debug_group();
    primary.end()?;

    info!(
        records = primary.stream().num_records(),
        bytes = primary.stream().len(),
        "Primary command buffer recorded"
    );

    let mut trace = TraceExecutor::new();
    primary.submit(&registry, &mut trace);
    for call in trace.calls() {
        debug!(?call, "Replayed");
    }
    info!(calls = trace.calls().len(), "Primary command buffer replayed");
    Ok(())
}

/// 每帧上传顶点数据和常量，重放一段传输命令，并回读结果
fn run_staging_frames<B: Backend>(
    config: &Config,
    device: B::Device,
    context: &mut B::CommandContext,
    queue: &mut B::CommandQueue,
    fence: &FenceManager,
) -> Result<()> {
    let mut pool = StagingBufferPool::<B>::from_config(device.clone(), &config.staging);

    let mut vertices = device
        .create_resource(
            &BufferDescriptor::device_local(4096, BufferUsageType::Vertex).with_name("vertices"),
            ResourceState::VertexAndConstantBuffer,
        )
        .context("failed to create vertex buffer")?;
    let mut constants = device
        .create_resource(
            &BufferDescriptor::device_local(256, BufferUsageType::Constant).with_name("constants"),
            ResourceState::VertexAndConstantBuffer,
        )
        .context("failed to create constant buffer")?;

    let mut resources = ResourceTable::<B>::new();
    for (name, label) in [(MESH_BUFFER, "mesh"), (MIRROR_BUFFER, "mirror")] {
        let resource = device
            .create_resource(
                &BufferDescriptor::device_local(512, BufferUsageType::Storage).with_name(label),
                ResourceState::ShaderResource,
            )
            .with_context(|| format!("failed to create {} buffer", label))?;
        resources.insert(name, resource);
    }
    let registry = CommandBufferRegistry::new();
    let mut transfers = DeferredCommandBuffer::with_config(
        CommandBufferDescriptor::transfer_one_time().with_name("transfers"),
        &config.command,
    );

    for frame in 0..FRAME_COUNT {
        let _span = info_span!("frame", frame, backend = B::NAME).entered();
        let mut timeline = Timeline::new(frame, fence.current_value());

        let vertex_data: Vec<u8> = (0..1024u32).map(|i| (i as u64 + frame) as u8).collect();
        pool.write_staged(context, &mut vertices, 0, &vertex_data)
            .context("staged vertex upload failed")?;

        let constant_data = [frame as u8; 64];
        pool.write_immediate(context, &mut constants, 0, &constant_data, 4)
            .context("immediate constant upload failed")?;

        {
            let upload = pool.map_upload_buffer(256).context("failed to map upload buffer")?;
            upload[..256].fill(0xA0 | frame as u8);
        }
        pool.unmap_upload_buffer(context, queue, &mut vertices, 1024..1280)
            .context("failed to unmap upload buffer")?;

        let mut readback = vec![0u8; 16];
        pool.read_subresource_region(context, queue, &mut vertices, 1024, &mut readback, 4)
            .context("readback failed")?;

        let feedback_sum: u64 = {
            let feedback = pool
                .map_feedback_buffer(context, queue, &mut constants, 0..64)
                .context("failed to map feedback buffer")?;
            feedback.iter().map(|&b| b as u64).sum()
        };
        pool.unmap_feedback_buffer();

        transfers.begin()?;
        transfers.fill_buffer(MESH_BUFFER, 0, 256, 0x0101_0101 * (frame as u32 + 1));
        transfers.update_buffer(MESH_BUFFER, 256, &[0xF0 | frame as u8; 256]);
        transfers.copy_buffer(MIRROR_BUFFER, 0, MESH_BUFFER, 0, 512);
        transfers.end()?;
        let mut executor = ContextExecutor::new(context, &mut pool, &mut resources);
        transfers.submit(&registry, &mut executor);
        executor.finish().context("transfer replay failed")?;

        let mut mirrored = [0u8; 4];
        let mirror = resources
            .get_mut(MIRROR_BUFFER)
            .context("mirror buffer is not registered")?;
        pool.read_subresource_region(context, queue, mirror, 252, &mut mirrored, 4)
            .context("mirror readback failed")?;

        queue
            .finish_and_submit_command_context(context, false)
            .context("frame submission failed")?;
        timeline.end_frame(fence.current_value());

        info!(
            submissions = timeline.submissions(),
            readback = ?&readback[..4],
            mirrored = ?mirrored,
            feedback_sum,
            "Frame complete"
        );
        pool.reset();
    }

    info!(stats = ?pool.stats(), chunks = pool.chunk_count(), "Staging pool statistics");
    Ok(())
}
