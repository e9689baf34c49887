//! 图形后端模块
//!
//! 本模块封装了不同后端的底层实现，包括：
//! - soft：在主机内存上执行的参考后端，支持故障注入
//! - wgpu：跨平台的高层图形抽象（支持 Vulkan、Metal、DX12、OpenGL）
//!
//! 所有后端都实现了 `backend` 中的统一 trait，
//! 暂存缓冲池和命令上下文只依赖这些 trait。

pub mod backend;
pub mod soft;
pub mod wgpu;

pub use backend::{Backend, CommandContext, CommandQueue, Device, NativeBuffer, NativeHandle};
