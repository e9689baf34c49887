//! 资源状态跟踪模块
//!
//! 跟踪每个 GPU 资源当前的访问状态，并在状态变化时生成最少的转换屏障。
//! 借鉴 DX12 的 `D3D12_RESOURCE_STATES` 和 Vulkan 的访问掩码设计。
//!
//! # 屏障合并
//!
//! 转换先进入待提交队列，只有在 `flush` 时才真正发给后端：
//!
//! - 同一资源连续的 A→B、B→C 合并为 A→C
//! - 同一资源的 A→B、B→A 互相抵消
//!
//! 这样连续的暂存写入（CopyDest → 原状态 → CopyDest）在两次复制之间不会产生任何屏障。

use tracing::trace;

use crate::gfx::backend::{Backend, CommandContext, NativeBuffer, NativeHandle};

/// 资源访问状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// 通用状态（无特定访问）
    Common,
    /// 顶点/常量缓冲区读取
    VertexAndConstantBuffer,
    /// 索引缓冲区读取
    IndexBuffer,
    /// 渲染目标写入
    RenderTarget,
    /// 无序访问（UAV / Storage）
    UnorderedAccess,
    /// 深度写入
    DepthWrite,
    /// 着色器读取
    ShaderResource,
    /// 流输出
    StreamOut,
    /// 间接绘制参数
    IndirectArgument,
    /// 复制目标
    CopyDest,
    /// 复制源
    CopySource,
    /// 上传堆的通用读取状态
    GenericRead,
}

impl ResourceState {
    /// 是否为只读状态
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            ResourceState::VertexAndConstantBuffer
                | ResourceState::IndexBuffer
                | ResourceState::ShaderResource
                | ResourceState::IndirectArgument
                | ResourceState::CopySource
                | ResourceState::GenericRead
        )
    }
}

/// 资源转换屏障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBarrier {
    /// 原生资源句柄
    pub handle: NativeHandle,
    /// 转换前状态
    pub before: ResourceState,
    /// 转换后状态
    pub after: ResourceState,
}

/// 屏障统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarrierStats {
    /// 记录的转换次数（不含状态相同的空转换）
    pub transitions: u64,
    /// 与待提交屏障合并的次数
    pub merged: u64,
    /// 互相抵消的次数
    pub cancelled: u64,
    /// 实际提交给后端的屏障数量
    pub flushed: u64,
}

/// 带状态标签的 GPU 资源
///
/// 状态标签只能通过 `ResourceStateTracker::transition` 修改。
pub struct GpuResource<B: Backend> {
    native: B::Buffer,
    current_state: ResourceState,
    name: Option<String>,
}

impl<B: Backend> GpuResource<B> {
    /// 包装一个原生缓冲区
    pub fn new(native: B::Buffer, initial_state: ResourceState) -> Self {
        Self {
            native,
            current_state: initial_state,
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn native(&self) -> &B::Buffer {
        &self.native
    }

    pub fn native_mut(&mut self) -> &mut B::Buffer {
        &mut self.native
    }

    pub fn handle(&self) -> NativeHandle {
        self.native.handle()
    }

    pub fn size(&self) -> u64 {
        self.native.size()
    }

    /// 当前访问状态
    pub fn current_state(&self) -> ResourceState {
        self.current_state
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl<B: Backend> std::fmt::Debug for GpuResource<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuResource")
            .field("handle", &self.handle())
            .field("state", &self.current_state)
            .field("name", &self.name)
            .finish()
    }
}

/// 资源状态跟踪器
///
/// 每个命令上下文持有一个。只在单线程中使用，不做内部加锁。
#[derive(Debug, Default)]
pub struct ResourceStateTracker {
    pending: Vec<ResourceBarrier>,
    stats: BarrierStats,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把资源转换到目标状态，必要时记录（或合并）一个待提交屏障
    pub fn transition<B: Backend>(&mut self, resource: &mut GpuResource<B>, target: ResourceState) {
        let before = resource.current_state;
        if before == target {
            return;
        }

        resource.current_state = target;
        self.stats.transitions += 1;

        let handle = resource.handle();
        match self.pending.iter().rposition(|b| b.handle == handle) {
            Some(pos) => {
                debug_assert_eq!(self.pending[pos].after, before);
                if self.pending[pos].before == target {
                    self.pending.remove(pos);
                    self.stats.cancelled += 1;
                    trace!(?handle, ?target, "Pending barrier cancelled");
                } else {
                    self.pending[pos].after = target;
                    self.stats.merged += 1;
                    trace!(?handle, ?target, "Pending barrier merged");
                }
            }
            None => {
                self.pending.push(ResourceBarrier {
                    handle,
                    before,
                    after: target,
                });
            }
        }
    }

    /// 待提交的屏障
    pub fn pending(&self) -> &[ResourceBarrier] {
        &self.pending
    }

    /// 是否有待提交的屏障
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// 取出所有待提交屏障（调用方提交后应通过 `recycle` 归还存储）
    pub fn take_pending(&mut self) -> Vec<ResourceBarrier> {
        self.stats.flushed += self.pending.len() as u64;
        std::mem::take(&mut self.pending)
    }

    /// 归还 `take_pending` 取出的存储，避免每次 flush 重新分配
    pub fn recycle(&mut self, mut batch: Vec<ResourceBarrier>) {
        if self.pending.is_empty() {
            batch.clear();
            self.pending = batch;
        }
    }

    pub fn stats(&self) -> BarrierStats {
        self.stats
    }
}

/// 在一个临时状态中执行操作，结束后恢复资源原来的状态
///
/// 进入时的转换立即提交（复制命令紧随其后），恢复转换留在待提交队列中，
/// 以便与后续操作合并。无论 `op` 返回什么都会恢复状态。
pub fn with_transition<B, R, F>(
    context: &mut B::CommandContext,
    resource: &mut GpuResource<B>,
    state: ResourceState,
    op: F,
) -> R
where
    B: Backend,
    F: FnOnce(&mut B::CommandContext, &mut GpuResource<B>) -> R,
{
    let old_state = resource.current_state();
    context.transition_resource(resource, state, true);
    let result = op(context, resource);
    context.transition_resource(resource, old_state, false);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::Device;
    use crate::gfx::soft::{Soft, SoftCommandContext, SoftDevice};
    use crate::renderer::resource::{BufferDescriptor, BufferUsageType};

    fn resource(device: &SoftDevice, state: ResourceState) -> GpuResource<Soft> {
        let desc = BufferDescriptor::device_local(256, BufferUsageType::Vertex);
        GpuResource::new(device.create_buffer(&desc).unwrap(), state)
    }

    #[test]
    fn test_same_state_is_noop() {
        let device = SoftDevice::new();
        let mut res = resource(&device, ResourceState::ShaderResource);
        let mut tracker = ResourceStateTracker::new();

        tracker.transition(&mut res, ResourceState::ShaderResource);
        assert!(!tracker.has_pending());
        assert_eq!(tracker.stats().transitions, 0);
    }

    #[test]
    fn test_merge_and_cancel() {
        let device = SoftDevice::new();
        let mut res = resource(&device, ResourceState::ShaderResource);
        let mut tracker = ResourceStateTracker::new();

        tracker.transition(&mut res, ResourceState::CopyDest);
        tracker.transition(&mut res, ResourceState::CopySource);
        assert_eq!(
            tracker.pending(),
            &[ResourceBarrier {
                handle: res.handle(),
                before: ResourceState::ShaderResource,
                after: ResourceState::CopySource,
            }]
        );

        tracker.transition(&mut res, ResourceState::ShaderResource);
        assert!(!tracker.has_pending());
        assert_eq!(res.current_state(), ResourceState::ShaderResource);

        let stats = tracker.stats();
        assert_eq!(stats.transitions, 3);
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.cancelled, 1);
    }

    #[test]
    fn test_take_and_recycle() {
        let device = SoftDevice::new();
        let mut a = resource(&device, ResourceState::Common);
        let mut b = resource(&device, ResourceState::Common);
        let mut tracker = ResourceStateTracker::new();

        tracker.transition(&mut a, ResourceState::CopyDest);
        tracker.transition(&mut b, ResourceState::CopySource);

        let batch = tracker.take_pending();
        assert_eq!(batch.len(), 2);
        assert!(!tracker.has_pending());
        tracker.recycle(batch);
        assert!(!tracker.has_pending());
        assert_eq!(tracker.stats().flushed, 2);
    }

    #[test]
    fn test_with_transition_restores_state_on_error() {
        let device = SoftDevice::new();
        let mut context = SoftCommandContext::new();
        let mut res = resource(&device, ResourceState::IndexBuffer);

        let result: std::result::Result<(), &str> =
            with_transition::<Soft, _, _>(&mut context, &mut res, ResourceState::CopyDest, |_, r| {
                assert_eq!(r.current_state(), ResourceState::CopyDest);
                Err("copy failed")
            });

        assert!(result.is_err());
        assert_eq!(res.current_state(), ResourceState::IndexBuffer);
    }

    #[test]
    fn test_read_only_states() {
        assert!(ResourceState::CopySource.is_read_only());
        assert!(!ResourceState::CopyDest.is_read_only());
        assert!(!ResourceState::RenderTarget.is_read_only());
    }
}
