//! 在真实命令上下文上重放命令
//!
//! `ContextExecutor` 把解码后的操作码落到某个后端的命令上下文上：
//!
//! - `BufferSubData` / `FillBuffer` 经由暂存缓冲池的 `write_staged` 写入目标
//! - `CopyBufferSubData` 直接记录原生复制，源和目标分别转换到 `CopySource` / `CopyDest`
//! - 其余命令更新绑定状态和绘制计数
//!
//! 命令中的缓冲区名字（`u32`）通过 `ResourceTable` 解析为带状态标签的资源。
//! 重放本身不提交；调用方在重放后通过命令队列提交上下文。

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::engine_warn;

use crate::gfx::backend::{Backend, CommandContext};
use crate::renderer::executor::CommandExecutor;
use crate::renderer::opcode::*;
use crate::renderer::staging::StagingBufferPool;
use crate::renderer::state::{with_transition, GpuResource, ResourceState};

/// 缓冲区名字到资源的映射
pub struct ResourceTable<B: Backend> {
    resources: HashMap<u32, GpuResource<B>>,
}

impl<B: Backend> ResourceTable<B> {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
        }
    }

    /// 以 `name` 登记资源，返回之前登记在同一名字下的资源
    pub fn insert(&mut self, name: u32, resource: GpuResource<B>) -> Option<GpuResource<B>> {
        self.resources.insert(name, resource)
    }

    pub fn remove(&mut self, name: u32) -> Option<GpuResource<B>> {
        self.resources.remove(&name)
    }

    pub fn get(&self, name: u32) -> Option<&GpuResource<B>> {
        self.resources.get(&name)
    }

    pub fn get_mut(&mut self, name: u32) -> Option<&mut GpuResource<B>> {
        self.resources.get_mut(&name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl<B: Backend> Default for ResourceTable<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> fmt::Debug for ResourceTable<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.resources.iter()).finish()
    }
}

/// 重放失败的原因
#[derive(Debug)]
pub enum ReplayError<E> {
    /// 后端的原生错误，原样保留
    Native(E),
    /// 命令引用了没有登记的缓冲区
    UnknownBuffer(u32),
    /// 复制的源和目标是同一个缓冲区
    AliasedCopy(u32),
}

impl<E: fmt::Display> fmt::Display for ReplayError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::Native(err) => write!(f, "{}", err),
            ReplayError::UnknownBuffer(name) => write!(f, "buffer {} is not registered", name),
            ReplayError::AliasedCopy(name) => {
                write!(f, "buffer {} cannot be both copy source and destination", name)
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ReplayError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::Native(err) => Some(err),
            _ => None,
        }
    }
}

/// 重放过程中累积的绑定状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundState {
    pub viewports: Vec<Viewport>,
    pub scissors: Vec<Scissor>,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub clear_stencil: i32,
    pub vertex_array: u32,
    pub pipeline: u32,
    pub render_target: u32,
    pub resource_heap: (u32, u32),
    pub blend_color: [f32; 4],
    pub stencil_reference: i32,
    pub in_render_pass: bool,
    pub debug_groups: Vec<String>,
    pub draws: u64,
    pub dispatches: u64,
}

fn bind_slot<T: Copy + Default>(slots: &mut Vec<T>, first: u32, values: &[T]) {
    let end = first as usize + values.len();
    if slots.len() < end {
        slots.resize(end, T::default());
    }
    slots[first as usize..end].copy_from_slice(values);
}

/// 把命令落到后端命令上下文上的执行上下文
///
/// 第一个失败的传输命令之后，后续传输命令全部跳过，错误由 `finish` 返回。
pub struct ContextExecutor<'a, B: Backend> {
    context: &'a mut B::CommandContext,
    pool: &'a mut StagingBufferPool<B>,
    resources: &'a mut ResourceTable<B>,
    state: BoundState,
    error: Option<ReplayError<B::Error>>,
}

impl<'a, B: Backend> ContextExecutor<'a, B> {
    pub fn new(
        context: &'a mut B::CommandContext,
        pool: &'a mut StagingBufferPool<B>,
        resources: &'a mut ResourceTable<B>,
    ) -> Self {
        Self {
            context,
            pool,
            resources,
            state: BoundState::default(),
            error: None,
        }
    }

    pub fn bound_state(&self) -> &BoundState {
        &self.state
    }

    /// 结束重放，返回第一个失败传输命令的错误
    pub fn finish(self) -> Result<BoundState, ReplayError<B::Error>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.state),
        }
    }

    fn transfer<F>(&mut self, op: F)
    where
        F: FnOnce(&mut Self) -> Result<(), ReplayError<B::Error>>,
    {
        if self.error.is_some() {
            trace!("Transfer skipped after an earlier failure");
            return;
        }
        if let Err(err) = op(self) {
            engine_warn!(error = %err, backend = B::NAME, "Replayed transfer failed");
            self.error = Some(err);
        }
    }

    fn write(&mut self, name: u32, offset: u64, data: &[u8]) -> Result<(), ReplayError<B::Error>> {
        let dst = self
            .resources
            .get_mut(name)
            .ok_or(ReplayError::UnknownBuffer(name))?;
        self.pool
            .write_staged(self.context, dst, offset, data)
            .map_err(ReplayError::Native)
    }

    fn copy(&mut self, cmd: &CmdCopyBufferSubData) -> Result<(), ReplayError<B::Error>> {
        if cmd.read_buffer == cmd.write_buffer {
            return Err(ReplayError::AliasedCopy(cmd.read_buffer));
        }
        if cmd.size == 0 {
            return Ok(());
        }
        let mut src = self
            .resources
            .remove(cmd.read_buffer)
            .ok_or(ReplayError::UnknownBuffer(cmd.read_buffer))?;
        let result = match self.resources.get_mut(cmd.write_buffer) {
            Some(dst) => {
                with_transition::<B, _, _>(self.context, &mut src, ResourceState::CopySource, |context, src| {
                    with_transition::<B, _, _>(context, dst, ResourceState::CopyDest, |context, dst| {
                        context.copy_buffer_region(
                            dst.native_mut(),
                            cmd.write_offset,
                            src.native(),
                            cmd.read_offset,
                            cmd.size,
                        )
                    })
                });
                Ok(())
            }
            None => Err(ReplayError::UnknownBuffer(cmd.write_buffer)),
        };
        self.resources.insert(cmd.read_buffer, src);
        result
    }
}

impl<'a, B: Backend> CommandExecutor for ContextExecutor<'a, B> {
    fn buffer_sub_data(&mut self, cmd: &CmdBufferSubData, data: &[u8]) {
        self.transfer(|this| this.write(cmd.buffer, cmd.offset, data));
    }

    fn copy_buffer_sub_data(&mut self, cmd: &CmdCopyBufferSubData) {
        self.transfer(|this| this.copy(cmd));
    }

    fn fill_buffer(&mut self, cmd: &CmdFillBuffer) {
        // 按小端字节序重复 32 位值，末尾不足 4 字节时截断
        let pattern = cmd.value.to_le_bytes();
        let data: Vec<u8> = pattern.iter().copied().cycle().take(cmd.size as usize).collect();
        self.transfer(|this| this.write(cmd.buffer, cmd.offset, &data));
    }

    fn generate_mipmap(&mut self, cmd: &CmdGenerateMipmap) {
        trace!(texture = cmd.texture, "Mipmap generation has no buffer effect");
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        bind_slot(&mut self.state.viewports, 0, std::slice::from_ref(viewport));
    }

    fn set_viewports(&mut self, first: u32, viewports: &[Viewport]) {
        bind_slot(&mut self.state.viewports, first, viewports);
    }

    fn set_scissor(&mut self, scissor: &Scissor) {
        bind_slot(&mut self.state.scissors, 0, std::slice::from_ref(scissor));
    }

    fn set_scissors(&mut self, first: u32, scissors: &[Scissor]) {
        bind_slot(&mut self.state.scissors, first, scissors);
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.state.clear_color = color;
    }

    fn set_clear_depth(&mut self, depth: f32) {
        self.state.clear_depth = depth;
    }

    fn set_clear_stencil(&mut self, stencil: i32) {
        self.state.clear_stencil = stencil;
    }

    fn clear(&mut self, flags: ClearFlags) {
        trace!(flags = flags.bits(), "Clear");
    }

    fn clear_attachments(&mut self, attachments: &[AttachmentClear]) {
        trace!(count = attachments.len(), "Clear attachments");
    }

    fn bind_vertex_array(&mut self, vao: u32) {
        self.state.vertex_array = vao;
    }

    fn bind_buffer_base(&mut self, _target: BufferTarget, _index: u32, _buffer: u32) {}

    fn bind_buffers_base(&mut self, _target: BufferTarget, _first: u32, _buffers: &[u32]) {}

    fn bind_texture(&mut self, _slot: u32, _texture: u32) {}

    fn bind_sampler(&mut self, _layer: u32, _sampler: u32) {}

    fn bind_pipeline_state(&mut self, pipeline: u32) {
        self.state.pipeline = pipeline;
    }

    fn bind_resource_heap(&mut self, heap: u32, descriptor_set: u32) {
        self.state.resource_heap = (heap, descriptor_set);
    }

    fn bind_render_target(&mut self, render_target: u32) {
        self.state.render_target = render_target;
    }

    fn set_blend_color(&mut self, color: [f32; 4]) {
        self.state.blend_color = color;
    }

    fn set_stencil_reference(&mut self, reference: i32, _face: StencilFace) {
        self.state.stencil_reference = reference;
    }

    fn set_uniforms(&mut self, _cmd: &CmdSetUniforms, _data: &[u8]) {}

    fn begin_query(&mut self, _query_heap: u32, _query: u32) {}

    fn end_query(&mut self, _query_heap: u32) {}

    fn begin_render_pass(&mut self, render_target: u32, _render_pass: u32, _clear_values: &[ClearValue]) {
        self.state.render_target = render_target;
        self.state.in_render_pass = true;
    }

    fn end_render_pass(&mut self) {
        self.state.in_render_pass = false;
    }

    fn draw_arrays(&mut self, _mode: PrimitiveTopology, _first: i32, _count: u32) {
        self.state.draws += 1;
    }

    fn draw_arrays_instanced(&mut self, _cmd: &CmdDrawArraysInstanced) {
        self.state.draws += 1;
    }

    fn draw_elements(&mut self, _cmd: &CmdDrawElements) {
        self.state.draws += 1;
    }

    fn draw_arrays_indirect(&mut self, cmd: &CmdDrawArraysIndirect) {
        self.state.draws += cmd.num_commands as u64;
    }

    fn draw_elements_indirect(&mut self, cmd: &CmdDrawElementsIndirect) {
        self.state.draws += cmd.num_commands as u64;
    }

    fn dispatch_compute(&mut self, _groups: [u32; 3]) {
        self.state.dispatches += 1;
    }

    fn dispatch_compute_indirect(&mut self, _buffer: u32, _offset: u64) {
        self.state.dispatches += 1;
    }

    fn push_debug_group(&mut self, _id: u32, name: &str) {
        self.state.debug_groups.push(name.to_string());
    }

    fn pop_debug_group(&mut self) {
        self.state.debug_groups.pop();
    }
}
