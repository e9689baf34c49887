//! soft 图形后端实现
//!
//! 在主机内存上实现后端协作者接口，不依赖任何 GPU。
//! 用作默认后端、单元测试的参照实现，以及调用序列的记录器。
//!
//! # 模块结构
//!
//! - `backend` - `Soft` 标记类型、设备和缓冲区
//! - `context` - 命令上下文和命令队列
//! - `trace` - 记录原生调用的执行上下文

mod backend;
mod context;
mod trace;

pub use backend::{Soft, SoftBuffer, SoftDevice, SoftError};
pub use context::{CopyRegion, SoftCommand, SoftCommandContext, SoftCommandQueue};
pub use trace::{NativeCall, TraceExecutor};
