//! 图形后端的统一抽象接口
//!
//! 本模块定义了暂存缓冲池和命令上下文所依赖的后端协作者：
//!
//! - `Device`：分配 GPU 可见缓冲区（上传堆、回读堆、设备本地）
//! - `NativeBuffer`：原生缓冲区句柄，支持映射到 CPU 地址空间
//! - `CommandContext`：资源状态转换和原生复制命令
//! - `CommandQueue`：提交命令上下文，并可选择阻塞等待 GPU 完成
//!
//! 所有后端（soft、wgpu）都通过一个 `Backend` 标记类型把这些关联类型绑在一起，
//! 上层代码只需要一个泛型参数 `B: Backend`。

use std::ops::Range;

use crate::renderer::resource::{BufferDescriptor, HeapType};
use crate::renderer::state::{GpuResource, ResourceBarrier, ResourceState, ResourceStateTracker};

/// 原生资源句柄
///
/// 由各后端的设备分配，在同一设备内唯一。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

/// 图形后端
///
/// 把一个后端的所有原生类型组合在一起。
pub trait Backend: Sized + 'static {
    /// 后端名称，用于日志输出
    const NAME: &'static str;

    /// 原生错误类型，暂存操作原样返回它
    type Error: std::error::Error + Send + Sync + 'static;

    /// 原生缓冲区
    type Buffer: NativeBuffer<Error = Self::Error>;

    /// 设备工厂
    type Device: Device<Self>;

    /// 命令上下文（命令列表 + 状态跟踪）
    type CommandContext: CommandContext<Self>;

    /// 命令队列
    type CommandQueue: CommandQueue<Self>;
}

/// 原生 GPU 缓冲区
pub trait NativeBuffer {
    type Error;

    /// 原生句柄
    fn handle(&self) -> NativeHandle;

    /// 缓冲区大小（字节）
    fn size(&self) -> u64;

    /// 所在的堆类型
    fn heap_type(&self) -> HeapType;

    /// 映射整个缓冲区到 CPU 地址空间
    ///
    /// `read_range` 是 CPU 将要读取的范围，空范围表示只写不读。
    /// 返回的切片覆盖 `[0, size)`。
    fn map(&mut self, read_range: Range<u64>) -> Result<&mut [u8], Self::Error>;

    /// 取消映射
    ///
    /// `written_range` 是 CPU 写入过的范围，空范围表示没有写入。
    fn unmap(&mut self, written_range: Range<u64>);
}

/// 设备工厂
pub trait Device<B: Backend>: Clone {
    /// 分配一个缓冲区
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<B::Buffer, B::Error>;

    /// 分配一个带初始状态标签的资源
    fn create_resource(
        &self,
        desc: &BufferDescriptor,
        initial_state: ResourceState,
    ) -> Result<GpuResource<B>, B::Error> {
        let native = self.create_buffer(desc)?;
        let resource = GpuResource::new(native, initial_state);
        Ok(match &desc.name {
            Some(name) => resource.with_name(name.clone()),
            None => resource,
        })
    }
}

/// 命令上下文
///
/// 对应 DX12 的命令列表 + 状态跟踪，或 Vulkan 的主命令缓冲区。
pub trait CommandContext<B: Backend> {
    /// 本上下文的状态跟踪器
    fn state_tracker(&mut self) -> &mut ResourceStateTracker;

    /// 把一批屏障写入原生命令列表
    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]);

    /// 记录一次缓冲区区域复制
    fn copy_buffer_region(
        &mut self,
        dst: &mut B::Buffer,
        dst_offset: u64,
        src: &B::Buffer,
        src_offset: u64,
        size: u64,
    );

    /// 转换资源状态
    ///
    /// `flush_immediate` 为 true 时立即把待提交屏障写入命令列表。
    fn transition_resource(
        &mut self,
        resource: &mut GpuResource<B>,
        target: ResourceState,
        flush_immediate: bool,
    ) {
        self.state_tracker().transition(resource, target);
        if flush_immediate {
            self.flush_resource_barriers();
        }
    }

    /// 提交所有待提交的屏障
    fn flush_resource_barriers(&mut self) {
        let batch = self.state_tracker().take_pending();
        if !batch.is_empty() {
            self.resource_barriers(&batch);
        }
        self.state_tracker().recycle(batch);
    }
}

/// 命令队列
pub trait CommandQueue<B: Backend> {
    /// 结束并提交命令上下文
    ///
    /// 提交前会先提交待提交的屏障；`wait` 为 true 时阻塞直到 GPU 完成。
    /// 提交后上下文被重置，可以继续录制。
    fn finish_and_submit_command_context(
        &mut self,
        context: &mut B::CommandContext,
        wait: bool,
    ) -> Result<(), B::Error>;
}
