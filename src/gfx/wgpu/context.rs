//! wgpu 后端的命令上下文和命令队列
//!
//! wgpu 自己跟踪资源的使用冲突，状态转换屏障只用于统计和日志。
//! 从上传堆出发的复制会立即提交：上传缓冲区的内容由 `queue.write_buffer`
//! 写入，必须在下一次写入覆盖它之前执行完这次复制。

use std::sync::Arc;

use tracing::trace;

use crate::{backend_debug, backend_warn};

use super::backend::{Wgpu, WgpuBuffer, WgpuError, WgpuShared};
use crate::gfx::backend::{CommandContext, CommandQueue, NativeBuffer};
use crate::renderer::resource::HeapType;
use crate::renderer::state::{ResourceBarrier, ResourceStateTracker};
use crate::renderer::sync::FenceManager;

/// wgpu 命令上下文
pub struct WgpuCommandContext {
    shared: Arc<WgpuShared>,
    tracker: ResourceStateTracker,
    encoder: Option<wgpu::CommandEncoder>,
    deferred_error: Option<WgpuError>,
    barriers_recorded: u64,
    copies_recorded: u64,
    eager_submissions: u64,
}

impl WgpuCommandContext {
    pub(super) fn new(shared: Arc<WgpuShared>) -> Self {
        Self {
            shared,
            tracker: ResourceStateTracker::new(),
            encoder: None,
            deferred_error: None,
            barriers_recorded: 0,
            copies_recorded: 0,
            eager_submissions: 0,
        }
    }

    pub fn barriers_recorded(&self) -> u64 {
        self.barriers_recorded
    }

    pub fn copies_recorded(&self) -> u64 {
        self.copies_recorded
    }

    /// 因上传复制而提前提交的次数
    pub fn eager_submissions(&self) -> u64 {
        self.eager_submissions
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.shared.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("dist_gfx command context"),
            })
        })
    }

    /// 结束当前编码器，返回待提交的命令缓冲区
    fn finish(&mut self) -> Option<wgpu::CommandBuffer> {
        self.encoder.take().map(|encoder| encoder.finish())
    }

    fn submit_now(&mut self) -> Option<wgpu::SubmissionIndex> {
        self.finish()
            .map(|commands| self.shared.queue.submit(std::iter::once(commands)))
    }
}

impl CommandContext<Wgpu> for WgpuCommandContext {
    fn state_tracker(&mut self) -> &mut ResourceStateTracker {
        &mut self.tracker
    }

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]) {
        self.barriers_recorded += barriers.len() as u64;
        trace!(count = barriers.len(), "wgpu barriers elided");
    }

    fn copy_buffer_region(
        &mut self,
        dst: &mut WgpuBuffer,
        dst_offset: u64,
        src: &WgpuBuffer,
        src_offset: u64,
        size: u64,
    ) {
        assert!(
            src_offset + size <= src.size() && dst_offset + size <= dst.size(),
            "copy region out of bounds"
        );

        let align = wgpu::COPY_BUFFER_ALIGNMENT;
        if src_offset % align != 0 || dst_offset % align != 0 || size % align != 0 {
            backend_warn!(src_offset, dst_offset, size, "Unaligned wgpu buffer copy dropped");
            self.deferred_error.get_or_insert(WgpuError::Validation(format!(
                "buffer copy (src {}, dst {}, size {}) is not {}-byte aligned",
                src_offset, dst_offset, size, align
            )));
            return;
        }

        self.encoder()
            .copy_buffer_to_buffer(src.raw(), src_offset, dst.raw(), dst_offset, size);
        self.copies_recorded += 1;

        if src.heap_type() == HeapType::Upload {
            self.submit_now();
            self.eager_submissions += 1;
        }
    }
}

/// wgpu 命令队列
pub struct WgpuCommandQueue {
    shared: Arc<WgpuShared>,
    fence: FenceManager,
    submissions: u64,
}

impl WgpuCommandQueue {
    pub(super) fn new(shared: Arc<WgpuShared>) -> Self {
        Self {
            shared,
            fence: FenceManager::new(),
            submissions: 0,
        }
    }

    pub fn fence(&self) -> &FenceManager {
        &self.fence
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }
}

impl CommandQueue<Wgpu> for WgpuCommandQueue {
    fn finish_and_submit_command_context(
        &mut self,
        context: &mut WgpuCommandContext,
        wait: bool,
    ) -> Result<(), WgpuError> {
        context.flush_resource_barriers();

        if let Some(err) = context.deferred_error.take() {
            context.encoder = None;
            return Err(err);
        }

        let commands = context.finish();
        let queue = &self.shared.queue;
        queue.submit(commands);

        let value = self.fence.signal();
        let fence = self.fence.clone();
        queue.on_submitted_work_done(move || {
            fence.update_completed_value(value);
        });
        self.submissions += 1;

        if wait {
            let device = &self.shared.device;
            self.fence.wait_for_value(value, || {
                let _ = device.poll(wgpu::Maintain::Wait);
                None
            });
        }

        backend_debug!(fence = value.value(), wait, "wgpu command context submitted");
        Ok(())
    }
}
