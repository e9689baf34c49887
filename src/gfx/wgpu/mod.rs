//! wgpu 图形后端实现
//!
//! 基于 wgpu 的无窗口后端，可以在 Vulkan、Metal、DirectX 12、OpenGL 等多种后端上运行。
//!
//! # 模块结构
//!
//! - `backend` - 设备初始化和缓冲区分配
//! - `context` - 命令上下文和命令队列

mod backend;
mod context;

pub use backend::{Wgpu, WgpuBuffer, WgpuDevice, WgpuError};
pub use context::{WgpuCommandContext, WgpuCommandQueue};
