//! soft 后端的命令上下文和命令队列
//!
//! 复制命令在录制时立即在主机内存上执行，同时记入命令日志，
//! 提交只负责 signal Fence 和统计。

use crate::backend_debug;

use super::backend::{Soft, SoftBuffer, SoftDevice, SoftError};
use crate::gfx::backend::{CommandContext, CommandQueue, NativeBuffer, NativeHandle};
use crate::renderer::state::{ResourceBarrier, ResourceStateTracker};
use crate::renderer::sync::FenceManager;

/// 一次缓冲区区域复制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRegion {
    pub dst: NativeHandle,
    pub dst_offset: u64,
    pub src: NativeHandle,
    pub src_offset: u64,
    pub size: u64,
}

/// 录制到 soft 命令列表中的原生命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftCommand {
    Barrier(ResourceBarrier),
    Copy(CopyRegion),
}

/// soft 命令上下文
#[derive(Debug, Default)]
pub struct SoftCommandContext {
    tracker: ResourceStateTracker,
    commands: Vec<SoftCommand>,
    unsubmitted: usize,
    submissions: u64,
}

impl SoftCommandContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 自创建以来录制的全部命令
    pub fn commands(&self) -> &[SoftCommand] {
        &self.commands
    }

    pub fn copies(&self) -> Vec<CopyRegion> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                SoftCommand::Copy(region) => Some(*region),
                SoftCommand::Barrier(_) => None,
            })
            .collect()
    }

    pub fn barriers(&self) -> Vec<ResourceBarrier> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                SoftCommand::Barrier(barrier) => Some(*barrier),
                SoftCommand::Copy(_) => None,
            })
            .collect()
    }

    /// 上次提交以来录制的命令数
    pub fn unsubmitted(&self) -> usize {
        self.unsubmitted
    }

    /// 这个上下文被提交的次数
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    fn record(&mut self, command: SoftCommand) {
        self.commands.push(command);
        self.unsubmitted += 1;
    }

    /// 关闭命令列表，返回本次提交的命令数
    fn close(&mut self) -> usize {
        self.submissions += 1;
        std::mem::take(&mut self.unsubmitted)
    }
}

impl CommandContext<Soft> for SoftCommandContext {
    fn state_tracker(&mut self) -> &mut ResourceStateTracker {
        &mut self.tracker
    }

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]) {
        for barrier in barriers {
            self.record(SoftCommand::Barrier(*barrier));
        }
    }

    fn copy_buffer_region(
        &mut self,
        dst: &mut SoftBuffer,
        dst_offset: u64,
        src: &SoftBuffer,
        src_offset: u64,
        size: u64,
    ) {
        let (dst_start, src_start, len) = (dst_offset as usize, src_offset as usize, size as usize);
        assert!(
            src_start + len <= src.contents().len() && dst_start + len <= dst.contents().len(),
            "copy region out of bounds"
        );

        dst.contents_mut()[dst_start..dst_start + len]
            .copy_from_slice(&src.contents()[src_start..src_start + len]);

        self.record(SoftCommand::Copy(CopyRegion {
            dst: dst.handle(),
            dst_offset,
            src: src.handle(),
            src_offset,
            size,
        }));
    }
}

/// soft 命令队列
#[derive(Debug)]
pub struct SoftCommandQueue {
    device: SoftDevice,
    fence: FenceManager,
    submissions: u64,
    waits: u64,
}

impl SoftCommandQueue {
    pub fn new(device: &SoftDevice) -> Self {
        Self {
            device: device.clone(),
            fence: FenceManager::new(),
            submissions: 0,
            waits: 0,
        }
    }

    pub fn fence(&self) -> &FenceManager {
        &self.fence
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    /// 阻塞等待的提交次数
    pub fn waits(&self) -> u64 {
        self.waits
    }
}

impl CommandQueue<Soft> for SoftCommandQueue {
    fn finish_and_submit_command_context(
        &mut self,
        context: &mut SoftCommandContext,
        wait: bool,
    ) -> Result<(), SoftError> {
        if self.device.is_lost() {
            return Err(SoftError::DeviceLost);
        }

        context.flush_resource_barriers();
        let num_commands = context.close();

        // 命令在录制时已经执行完毕
        let value = self.fence.signal();
        self.fence.update_completed_value(value);
        self.submissions += 1;

        if wait {
            self.fence.wait_for_value(value, || None);
            self.waits += 1;
        }

        backend_debug!(
            fence = value.value(),
            commands = num_commands,
            wait,
            "Soft command context submitted"
        );
        Ok(())
    }
}
