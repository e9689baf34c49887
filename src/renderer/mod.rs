//! 渲染器模块
//!
//! 与具体后端无关的命令录制和资源管理，底层实现在 `gfx` 模块中。
//!
//! # 模块组织
//!
//! - `opcode`：操作码命令流（延迟命令缓冲区的存储格式）
//! - `executor`：把命令流解码为原生调用
//! - `replay`：在后端命令上下文上执行命令（传输命令经由暂存缓冲池）
//! - `command`：命令缓冲区（立即模式和延迟模式）以及 bundle 注册表
//! - `state`：资源状态跟踪和屏障合并
//! - `resource`：缓冲区描述符和暂存缓冲区
//! - `staging`：暂存缓冲池（CPU 与 GPU 之间的数据传输）
//! - `sync`：Fence 和帧时间线

pub mod command;
pub mod executor;
pub mod opcode;
pub mod replay;
pub mod resource;
pub mod staging;
pub mod state;
pub mod sync;

pub use command::{
    CommandBufferDescriptor, CommandBufferId, CommandBufferRegistry, CommandBufferState,
    CommandBufferType, CommandBufferUsage, CommandRecorder, DeferredCommandBuffer,
    ImmediateCommandBuffer,
};
pub use executor::{execute_stream, CommandExecutor};
pub use opcode::{Opcode, OpcodeStream};
pub use replay::{BoundState, ContextExecutor, ReplayError, ResourceTable};
pub use resource::{BufferDescriptor, BufferUsageType, HeapType, StagingBuffer};
pub use staging::{StagingBufferPool, StagingStats};
pub use state::{GpuResource, ResourceBarrier, ResourceState, ResourceStateTracker};
pub use sync::{FenceManager, FenceValue, Timeline};
