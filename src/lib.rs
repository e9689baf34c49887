//! DistGfx - 多后端图形抽象层
//!
//! 提供三个相互配合的部件：
//!
//! - 延迟命令缓冲区：把图形命令录制为紧凑的操作码流，之后在原生上下文上重放
//! - 暂存缓冲池：在 CPU 与 GPU 私有内存之间搬运数据
//! - 资源状态跟踪：为复制和读取自动插入、合并状态转换屏障
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（日志、配置、错误处理）
//! - `renderer`: 命令缓冲区、暂存缓冲池、状态跟踪
//! - `gfx`: 图形后端抽象层和具体后端（soft、wgpu）
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_gfx::gfx::soft::{SoftDevice, SoftCommandContext};
//! use dist_gfx::gfx::Device;
//! use dist_gfx::renderer::{BufferDescriptor, BufferUsageType, ResourceState, StagingBufferPool};
//!
//! let device = SoftDevice::new();
//! let mut context = SoftCommandContext::new();
//! let mut pool = StagingBufferPool::new(device.clone(), 64 * 1024);
//!
//! let mut vertices = device
//!     .create_resource(
//!         &BufferDescriptor::device_local(1024, BufferUsageType::Vertex),
//!         ResourceState::VertexAndConstantBuffer,
//!     )
//!     .unwrap();
//! pool.write_staged(&mut context, &mut vertices, 0, &[0u8; 256]).unwrap();
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
