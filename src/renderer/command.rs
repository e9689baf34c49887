//! 命令缓冲区管理模块
//!
//! 提供统一的命令录制接口，封装立即执行和延迟执行两种命令缓冲区。
//! 借鉴 DistEngine 的 CommandList 设计。
//!
//! # 命令缓冲区类型
//!
//! - **Direct**: 图形和计算命令，可以执行 bundle
//! - **Bundle**: 可复用的命令包（DX12）/ Secondary（Vulkan），由注册表持有
//! - **Compute**: 计算专用命令
//! - **Transfer**: 传输专用命令
//!
//! # 立即与延迟
//!
//! 两种命令缓冲区都实现 `CommandRecorder`：
//!
//! - `ImmediateCommandBuffer` 每条命令直接调用执行上下文
//! - `DeferredCommandBuffer` 把命令编码进操作码流，之后重放
//!
//! 同一段录制代码在两种缓冲区上产生完全相同的原生调用序列。
//!
//! # 嵌套
//!
//! `execute` 通过代际索引 `CommandBufferId` 引用注册表中的 bundle，不持有它。
//! 注册表只接受 bundle，而 bundle 不能录制 `execute`，所以命令缓冲区之间不可能成环。

use std::ops::Range;

use tracing::debug;

use crate::core::config::CommandConfig;
use crate::core::error::{DistGfxError, GraphicsError, Result};
use crate::renderer::executor::{execute_bundle, execute_stream, CommandExecutor};
use crate::renderer::opcode::*;

/// 命令缓冲区类型
///
/// 对应 DistEngine 的 CommandListType
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferType {
    /// 直接命令缓冲区（Primary）
    /// 可以包含所有类型的命令
    Direct,

    /// 间接命令缓冲区（Secondary/Bundle）
    /// 可以被Direct命令缓冲区调用，用于复用
    Bundle,

    /// 计算专用命令缓冲区
    Compute,

    /// 传输专用命令缓冲区
    Transfer,
}

/// 命令缓冲区状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// 初始状态
    Initial,
    /// 正在记录
    Recording,
    /// 已完成记录
    Executable,
}

/// 命令缓冲区使用模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferUsage {
    /// 一次性使用
    /// 提交后自动重置
    OneTimeSubmit,

    /// 可重复使用
    /// 需要手动重置
    Reusable,
}

/// 命令缓冲区描述符
#[derive(Debug, Clone)]
pub struct CommandBufferDescriptor {
    /// 缓冲区类型
    pub buffer_type: CommandBufferType,
    /// 使用模式
    pub usage: CommandBufferUsage,
    /// 调试名称
    pub name: Option<String>,
}

impl CommandBufferDescriptor {
    pub fn new(buffer_type: CommandBufferType, usage: CommandBufferUsage) -> Self {
        Self {
            buffer_type,
            usage,
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 创建Direct类型的一次性命令缓冲区
    pub fn direct_one_time() -> Self {
        Self::new(CommandBufferType::Direct, CommandBufferUsage::OneTimeSubmit)
    }

    /// 创建Direct类型的可复用命令缓冲区
    pub fn direct_reusable() -> Self {
        Self::new(CommandBufferType::Direct, CommandBufferUsage::Reusable)
    }

    /// 创建可复用的 bundle
    pub fn bundle() -> Self {
        Self::new(CommandBufferType::Bundle, CommandBufferUsage::Reusable)
    }

    /// 创建Transfer类型的命令缓冲区
    pub fn transfer_one_time() -> Self {
        Self::new(CommandBufferType::Transfer, CommandBufferUsage::OneTimeSubmit)
    }
}

fn recording_error(msg: &str) -> DistGfxError {
    DistGfxError::Graphics(GraphicsError::CommandRecording(msg.to_string()))
}

/// 命令编码器
///
/// 录制状态机：跟踪录制状态、渲染通道和调试组的嵌套
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    buffer_type: CommandBufferType,
    state: CommandBufferState,
    in_render_pass: bool,
    debug_group_depth: u32,
}

impl CommandEncoder {
    pub fn new(buffer_type: CommandBufferType) -> Self {
        Self {
            buffer_type,
            state: CommandBufferState::Initial,
            in_render_pass: false,
            debug_group_depth: 0,
        }
    }

    /// 开始记录命令
    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            CommandBufferState::Initial | CommandBufferState::Executable => {
                self.state = CommandBufferState::Recording;
                self.in_render_pass = false;
                self.debug_group_depth = 0;
                Ok(())
            }
            CommandBufferState::Recording => Err(recording_error("Invalid state for begin")),
        }
    }

    /// 结束记录命令
    pub fn end(&mut self) -> Result<()> {
        match self.state {
            CommandBufferState::Recording => {
                if self.in_render_pass {
                    return Err(recording_error("Still in render pass"));
                }
                if self.debug_group_depth != 0 {
                    return Err(recording_error("Unbalanced debug groups"));
                }
                self.state = CommandBufferState::Executable;
                Ok(())
            }
            _ => Err(recording_error("Invalid state for end")),
        }
    }

    /// 开始渲染通道
    pub fn begin_render_pass(&mut self) -> Result<()> {
        if self.buffer_type != CommandBufferType::Direct {
            return Err(recording_error("Only Direct buffers can begin render pass"));
        }

        if self.state != CommandBufferState::Recording {
            return Err(recording_error("Must be in recording state"));
        }

        if self.in_render_pass {
            return Err(recording_error("Already in render pass"));
        }

        self.in_render_pass = true;
        Ok(())
    }

    /// 结束渲染通道
    pub fn end_render_pass(&mut self) -> Result<()> {
        if !self.in_render_pass {
            return Err(recording_error("Not in render pass"));
        }

        self.in_render_pass = false;
        Ok(())
    }

    /// 检查当前缓冲区能否执行 bundle
    pub fn check_execute(&self) -> Result<()> {
        if self.state != CommandBufferState::Recording {
            return Err(recording_error("Must be in recording state"));
        }
        if self.buffer_type == CommandBufferType::Bundle {
            return Err(recording_error("Bundles cannot execute other command buffers"));
        }
        Ok(())
    }

    /// 压入调试组，返回新组的 id（即压入前的嵌套深度）
    pub fn push_debug_group(&mut self) -> u32 {
        let id = self.debug_group_depth;
        self.debug_group_depth += 1;
        id
    }

    pub fn pop_debug_group(&mut self) {
        debug_assert!(self.debug_group_depth > 0, "pop_debug_group without push");
        self.debug_group_depth = self.debug_group_depth.saturating_sub(1);
    }

    /// 重置编码器
    pub fn reset(&mut self) {
        self.state = CommandBufferState::Initial;
        self.in_render_pass = false;
        self.debug_group_depth = 0;
    }

    pub fn buffer_type(&self) -> CommandBufferType {
        self.buffer_type
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == CommandBufferState::Recording
    }

    pub fn is_in_render_pass(&self) -> bool {
        self.in_render_pass
    }
}

/// 命令录制接口
///
/// 资源用 u32 对象名引用。除生命周期调用外，录制命令不返回错误；
/// 在非录制状态下调用属于编程错误（debug 断言）。
pub trait CommandRecorder {
    fn begin(&mut self) -> Result<()>;
    fn end(&mut self) -> Result<()>;

    /// 用 `data` 更新缓冲区内容
    fn update_buffer(&mut self, buffer: u32, offset: u64, data: &[u8]);
    fn copy_buffer(&mut self, dst: u32, dst_offset: u64, src: u32, src_offset: u64, size: u64);
    fn fill_buffer(&mut self, buffer: u32, offset: u64, size: u64, value: u32);
    fn generate_mips(&mut self, texture: u32, mip_levels: Range<u32>, array_layers: Range<u32>);

    fn set_viewport(&mut self, viewport: Viewport);
    fn set_viewports(&mut self, first: u32, viewports: &[Viewport]);
    fn set_scissor(&mut self, scissor: Scissor);
    fn set_scissors(&mut self, first: u32, scissors: &[Scissor]);

    fn set_clear_color(&mut self, color: [f32; 4]);
    fn set_clear_depth(&mut self, depth: f32);
    fn set_clear_stencil(&mut self, stencil: i32);
    fn clear(&mut self, flags: ClearFlags);
    /// 清除多个附件，数量不能超过 `MAX_NUM_ATTACHMENTS`
    fn clear_attachments(&mut self, attachments: &[AttachmentClear]);

    fn set_vertex_array(&mut self, vao: u32);
    fn bind_buffer_base(&mut self, target: BufferTarget, index: u32, buffer: u32);
    fn bind_buffers_base(&mut self, target: BufferTarget, first: u32, buffers: &[u32]);
    fn bind_texture(&mut self, slot: u32, texture: u32);
    fn bind_sampler(&mut self, layer: u32, sampler: u32);
    fn set_pipeline_state(&mut self, pipeline: u32);
    fn set_resource_heap(&mut self, heap: u32, descriptor_set: u32);
    fn set_render_target(&mut self, render_target: u32);

    fn set_blend_factor(&mut self, color: [f32; 4]);
    fn set_stencil_reference(&mut self, reference: i32, face: StencilFace);
    fn set_uniforms(&mut self, program: u32, location: i32, count: u32, data: &[u8]);

    fn begin_query(&mut self, query_heap: u32, query: u32);
    fn end_query(&mut self, query_heap: u32);
    fn begin_render_pass(
        &mut self,
        render_target: u32,
        render_pass: u32,
        clear_values: &[ClearValue],
    ) -> Result<()>;
    fn end_render_pass(&mut self) -> Result<()>;

    fn draw(&mut self, mode: PrimitiveTopology, vertices: Range<u32>);
    fn draw_instanced(&mut self, mode: PrimitiveTopology, vertices: Range<u32>, instances: Range<u32>);
    fn draw_indexed(
        &mut self,
        mode: PrimitiveTopology,
        format: IndexFormat,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    );
    fn draw_indirect(
        &mut self,
        mode: PrimitiveTopology,
        buffer: u32,
        offset: u64,
        num_commands: u32,
        stride: u32,
    );
    fn draw_indexed_indirect(
        &mut self,
        mode: PrimitiveTopology,
        format: IndexFormat,
        buffer: u32,
        offset: u64,
        num_commands: u32,
        stride: u32,
    );
    fn dispatch(&mut self, groups: [u32; 3]);
    fn dispatch_indirect(&mut self, buffer: u32, offset: u64);

    fn push_debug_group(&mut self, name: &str);
    fn pop_debug_group(&mut self);

    /// 执行注册表中的一个 bundle
    fn execute(&mut self, bundle: CommandBufferId, registry: &CommandBufferRegistry) -> Result<()>;
}

// 两种命令缓冲区共用的载荷构造

fn buffer_sub_data(buffer: u32, offset: u64, data: &[u8]) -> CmdBufferSubData {
    CmdBufferSubData {
        offset,
        size: data.len() as u64,
        buffer,
        _reserved: 0,
    }
}

fn generate_mipmap(texture: u32, mip_levels: Range<u32>, array_layers: Range<u32>) -> CmdGenerateMipmap {
    CmdGenerateMipmap {
        texture,
        base_mip_level: mip_levels.start,
        num_mip_levels: mip_levels.len() as u32,
        base_array_layer: array_layers.start,
        num_array_layers: array_layers.len() as u32,
    }
}

fn set_uniforms(program: u32, location: i32, count: u32, data: &[u8]) -> CmdSetUniforms {
    CmdSetUniforms {
        program,
        location,
        count,
        size: data.len() as u32,
    }
}

fn draw_arrays_instanced(
    mode: PrimitiveTopology,
    vertices: Range<u32>,
    instances: Range<u32>,
) -> CmdDrawArraysInstanced {
    CmdDrawArraysInstanced {
        mode: mode as u32,
        first: vertices.start as i32,
        count: vertices.len() as u32,
        instance_count: instances.len() as u32,
        base_instance: instances.start,
    }
}

fn draw_elements(
    mode: PrimitiveTopology,
    format: IndexFormat,
    indices: Range<u32>,
    base_vertex: i32,
    instances: Range<u32>,
) -> CmdDrawElements {
    CmdDrawElements {
        offset: u64::from(indices.start) * format.size(),
        mode: mode as u32,
        count: indices.len() as u32,
        index_type: format as u32,
        base_vertex,
        instance_count: instances.len() as u32,
        base_instance: instances.start,
    }
}

fn check_attachments(attachments: &[AttachmentClear]) {
    assert!(
        attachments.len() <= MAX_NUM_ATTACHMENTS,
        "cannot clear more than {} attachments at once",
        MAX_NUM_ATTACHMENTS
    );
}

fn check_bundle(id: CommandBufferId, registry: &CommandBufferRegistry) -> Result<()> {
    match registry.get(id) {
        Some(bundle) if bundle.state() == CommandBufferState::Executable => Ok(()),
        Some(_) => Err(recording_error("Bundle is not executable")),
        None => Err(recording_error("Bundle is not registered")),
    }
}

/// 立即命令缓冲区
///
/// 每条录制的命令都直接转发给执行上下文。
pub struct ImmediateCommandBuffer<E: CommandExecutor> {
    encoder: CommandEncoder,
    executor: E,
    max_nesting_depth: u32,
}

impl<E: CommandExecutor> ImmediateCommandBuffer<E> {
    pub fn new(buffer_type: CommandBufferType, executor: E) -> Self {
        Self {
            encoder: CommandEncoder::new(buffer_type),
            executor,
            max_nesting_depth: CommandConfig::default().max_nesting_depth,
        }
    }

    pub fn with_config(buffer_type: CommandBufferType, executor: E, config: &CommandConfig) -> Self {
        let mut buffer = Self::new(buffer_type, executor);
        buffer.max_nesting_depth = config.max_nesting_depth;
        buffer
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    pub fn state(&self) -> CommandBufferState {
        self.encoder.state()
    }

    fn recording(&mut self) -> &mut E {
        debug_assert!(self.encoder.is_recording(), "command emitted outside begin/end");
        &mut self.executor
    }
}

impl<E: CommandExecutor> CommandRecorder for ImmediateCommandBuffer<E> {
    fn begin(&mut self) -> Result<()> {
        self.encoder.begin()
    }

    fn end(&mut self) -> Result<()> {
        self.encoder.end()
    }

    fn update_buffer(&mut self, buffer: u32, offset: u64, data: &[u8]) {
        self.recording().buffer_sub_data(&buffer_sub_data(buffer, offset, data), data);
    }

    fn copy_buffer(&mut self, dst: u32, dst_offset: u64, src: u32, src_offset: u64, size: u64) {
        self.recording().copy_buffer_sub_data(&CmdCopyBufferSubData {
            read_offset: src_offset,
            write_offset: dst_offset,
            size,
            write_buffer: dst,
            read_buffer: src,
        });
    }

    fn fill_buffer(&mut self, buffer: u32, offset: u64, size: u64, value: u32) {
        self.recording().fill_buffer(&CmdFillBuffer {
            offset,
            size,
            buffer,
            value,
        });
    }

    fn generate_mips(&mut self, texture: u32, mip_levels: Range<u32>, array_layers: Range<u32>) {
        self.recording()
            .generate_mipmap(&generate_mipmap(texture, mip_levels, array_layers));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.recording().set_viewport(&viewport);
    }

    fn set_viewports(&mut self, first: u32, viewports: &[Viewport]) {
        self.recording().set_viewports(first, viewports);
    }

    fn set_scissor(&mut self, scissor: Scissor) {
        self.recording().set_scissor(&scissor);
    }

    fn set_scissors(&mut self, first: u32, scissors: &[Scissor]) {
        self.recording().set_scissors(first, scissors);
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.recording().set_clear_color(color);
    }

    fn set_clear_depth(&mut self, depth: f32) {
        self.recording().set_clear_depth(depth);
    }

    fn set_clear_stencil(&mut self, stencil: i32) {
        self.recording().set_clear_stencil(stencil);
    }

    fn clear(&mut self, flags: ClearFlags) {
        self.recording().clear(flags);
    }

    fn clear_attachments(&mut self, attachments: &[AttachmentClear]) {
        check_attachments(attachments);
        self.recording().clear_attachments(attachments);
    }

    fn set_vertex_array(&mut self, vao: u32) {
        self.recording().bind_vertex_array(vao);
    }

    fn bind_buffer_base(&mut self, target: BufferTarget, index: u32, buffer: u32) {
        self.recording().bind_buffer_base(target, index, buffer);
    }

    fn bind_buffers_base(&mut self, target: BufferTarget, first: u32, buffers: &[u32]) {
        self.recording().bind_buffers_base(target, first, buffers);
    }

    fn bind_texture(&mut self, slot: u32, texture: u32) {
        self.recording().bind_texture(slot, texture);
    }

    fn bind_sampler(&mut self, layer: u32, sampler: u32) {
        self.recording().bind_sampler(layer, sampler);
    }

    fn set_pipeline_state(&mut self, pipeline: u32) {
        self.recording().bind_pipeline_state(pipeline);
    }

    fn set_resource_heap(&mut self, heap: u32, descriptor_set: u32) {
        self.recording().bind_resource_heap(heap, descriptor_set);
    }

    fn set_render_target(&mut self, render_target: u32) {
        self.recording().bind_render_target(render_target);
    }

    fn set_blend_factor(&mut self, color: [f32; 4]) {
        self.recording().set_blend_color(color);
    }

    fn set_stencil_reference(&mut self, reference: i32, face: StencilFace) {
        self.recording().set_stencil_reference(reference, face);
    }

    fn set_uniforms(&mut self, program: u32, location: i32, count: u32, data: &[u8]) {
        self.recording()
            .set_uniforms(&set_uniforms(program, location, count, data), data);
    }

    fn begin_query(&mut self, query_heap: u32, query: u32) {
        self.recording().begin_query(query_heap, query);
    }

    fn end_query(&mut self, query_heap: u32) {
        self.recording().end_query(query_heap);
    }

    fn begin_render_pass(
        &mut self,
        render_target: u32,
        render_pass: u32,
        clear_values: &[ClearValue],
    ) -> Result<()> {
        self.encoder.begin_render_pass()?;
        self.recording()
            .begin_render_pass(render_target, render_pass, clear_values);
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.encoder.end_render_pass()?;
        self.recording().end_render_pass();
        Ok(())
    }

    fn draw(&mut self, mode: PrimitiveTopology, vertices: Range<u32>) {
        self.recording()
            .draw_arrays(mode, vertices.start as i32, vertices.len() as u32);
    }

    fn draw_instanced(&mut self, mode: PrimitiveTopology, vertices: Range<u32>, instances: Range<u32>) {
        self.recording()
            .draw_arrays_instanced(&draw_arrays_instanced(mode, vertices, instances));
    }

    fn draw_indexed(
        &mut self,
        mode: PrimitiveTopology,
        format: IndexFormat,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) {
        self.recording()
            .draw_elements(&draw_elements(mode, format, indices, base_vertex, instances));
    }

    fn draw_indirect(
        &mut self,
        mode: PrimitiveTopology,
        buffer: u32,
        offset: u64,
        num_commands: u32,
        stride: u32,
    ) {
        self.recording().draw_arrays_indirect(&CmdDrawArraysIndirect {
            offset,
            buffer,
            num_commands,
            mode: mode as u32,
            stride,
        });
    }

    fn draw_indexed_indirect(
        &mut self,
        mode: PrimitiveTopology,
        format: IndexFormat,
        buffer: u32,
        offset: u64,
        num_commands: u32,
        stride: u32,
    ) {
        self.recording().draw_elements_indirect(&CmdDrawElementsIndirect {
            offset,
            buffer,
            num_commands,
            mode: mode as u32,
            index_type: format as u32,
            stride,
            _reserved: 0,
        });
    }

    fn dispatch(&mut self, groups: [u32; 3]) {
        self.recording().dispatch_compute(groups);
    }

    fn dispatch_indirect(&mut self, buffer: u32, offset: u64) {
        self.recording().dispatch_compute_indirect(buffer, offset);
    }

    fn push_debug_group(&mut self, name: &str) {
        let id = self.encoder.push_debug_group();
        self.recording().push_debug_group(id, name);
    }

    fn pop_debug_group(&mut self) {
        self.encoder.pop_debug_group();
        self.recording().pop_debug_group();
    }

    fn execute(&mut self, bundle: CommandBufferId, registry: &CommandBufferRegistry) -> Result<()> {
        self.encoder.check_execute()?;
        check_bundle(bundle, registry)?;
        let max_depth = self.max_nesting_depth;
        execute_bundle(bundle, registry, self.recording(), max_depth);
        Ok(())
    }
}

/// 延迟命令缓冲区
///
/// 录制的命令编码进私有的操作码流，通过 `execute_on` / `submit` 重放。
#[derive(Debug, Clone)]
pub struct DeferredCommandBuffer {
    desc: CommandBufferDescriptor,
    encoder: CommandEncoder,
    stream: OpcodeStream,
    max_nesting_depth: u32,
}

impl DeferredCommandBuffer {
    pub fn new(desc: CommandBufferDescriptor) -> Self {
        Self::with_config(desc, &CommandConfig::default())
    }

    pub fn with_config(desc: CommandBufferDescriptor, config: &CommandConfig) -> Self {
        Self {
            encoder: CommandEncoder::new(desc.buffer_type),
            stream: OpcodeStream::with_capacity(config.initial_stream_capacity),
            max_nesting_depth: config.max_nesting_depth,
            desc,
        }
    }

    pub fn descriptor(&self) -> &CommandBufferDescriptor {
        &self.desc
    }

    pub fn buffer_type(&self) -> CommandBufferType {
        self.desc.buffer_type
    }

    pub fn name(&self) -> Option<&str> {
        self.desc.name.as_deref()
    }

    pub fn state(&self) -> CommandBufferState {
        self.encoder.state()
    }

    /// 录制好的操作码流
    pub fn stream(&self) -> &OpcodeStream {
        &self.stream
    }

    /// 清空录制内容，回到初始状态
    pub fn reset(&mut self) {
        self.encoder.reset();
        self.stream.reset();
    }

    /// 按录制顺序重放到 `executor`
    pub fn execute_on<E: CommandExecutor + ?Sized>(&self, registry: &CommandBufferRegistry, executor: &mut E) {
        assert_eq!(
            self.state(),
            CommandBufferState::Executable,
            "only executable command buffers can be replayed"
        );
        execute_stream(&self.stream, registry, executor, self.max_nesting_depth);
    }

    /// 重放；一次性缓冲区重放后自动重置
    pub fn submit<E: CommandExecutor + ?Sized>(&mut self, registry: &CommandBufferRegistry, executor: &mut E) {
        self.execute_on(registry, executor);
        debug!(
            name = self.name().unwrap_or("<unnamed>"),
            records = self.stream.num_records(),
            bytes = self.stream.len(),
            "Deferred command buffer submitted"
        );
        if self.desc.usage == CommandBufferUsage::OneTimeSubmit {
            self.reset();
        }
    }

    fn emit<P: Payload>(&mut self, payload: &P) {
        debug_assert!(self.encoder.is_recording(), "command emitted outside begin/end");
        self.stream.emit(payload);
    }

    fn emit_with_tail<P: Payload, T: bytemuck::Pod>(&mut self, payload: &P, tail: &[T]) {
        debug_assert!(self.encoder.is_recording(), "command emitted outside begin/end");
        self.stream.emit_with_tail(payload, tail);
    }

    fn emit_opcode(&mut self, opcode: Opcode) {
        debug_assert!(self.encoder.is_recording(), "command emitted outside begin/end");
        self.stream.emit_opcode(opcode);
    }
}

impl CommandRecorder for DeferredCommandBuffer {
    /// 开始录制；之前录制的内容被丢弃
    fn begin(&mut self) -> Result<()> {
        self.encoder.begin()?;
        self.stream.reset();
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.encoder.end()
    }

    fn update_buffer(&mut self, buffer: u32, offset: u64, data: &[u8]) {
        self.emit_with_tail(&buffer_sub_data(buffer, offset, data), data);
    }

    fn copy_buffer(&mut self, dst: u32, dst_offset: u64, src: u32, src_offset: u64, size: u64) {
        self.emit(&CmdCopyBufferSubData {
            read_offset: src_offset,
            write_offset: dst_offset,
            size,
            write_buffer: dst,
            read_buffer: src,
        });
    }

    fn fill_buffer(&mut self, buffer: u32, offset: u64, size: u64, value: u32) {
        self.emit(&CmdFillBuffer {
            offset,
            size,
            buffer,
            value,
        });
    }

    fn generate_mips(&mut self, texture: u32, mip_levels: Range<u32>, array_layers: Range<u32>) {
        self.emit(&generate_mipmap(texture, mip_levels, array_layers));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.emit(&CmdViewport { viewport });
    }

    fn set_viewports(&mut self, first: u32, viewports: &[Viewport]) {
        let cmd = CmdViewportArray {
            first,
            count: viewports.len() as u32,
        };
        self.emit_with_tail(&cmd, viewports);
    }

    fn set_scissor(&mut self, scissor: Scissor) {
        self.emit(&CmdScissor { scissor });
    }

    fn set_scissors(&mut self, first: u32, scissors: &[Scissor]) {
        let cmd = CmdScissorArray {
            first,
            count: scissors.len() as u32,
        };
        self.emit_with_tail(&cmd, scissors);
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.emit(&CmdClearColor { color });
    }

    fn set_clear_depth(&mut self, depth: f32) {
        self.emit(&CmdClearDepth { depth });
    }

    fn set_clear_stencil(&mut self, stencil: i32) {
        self.emit(&CmdClearStencil { stencil });
    }

    fn clear(&mut self, flags: ClearFlags) {
        self.emit(&CmdClear { flags: flags.bits() });
    }

    fn clear_attachments(&mut self, attachments: &[AttachmentClear]) {
        check_attachments(attachments);
        let cmd = CmdClearBuffers {
            num_attachments: attachments.len() as u32,
        };
        self.emit_with_tail(&cmd, attachments);
    }

    fn set_vertex_array(&mut self, vao: u32) {
        self.emit(&CmdBindVertexArray { vao });
    }

    fn bind_buffer_base(&mut self, target: BufferTarget, index: u32, buffer: u32) {
        self.emit(&CmdBindBufferBase {
            target: target as u32,
            index,
            buffer,
        });
    }

    fn bind_buffers_base(&mut self, target: BufferTarget, first: u32, buffers: &[u32]) {
        let cmd = CmdBindBuffersBase {
            target: target as u32,
            first,
            count: buffers.len() as u32,
        };
        self.emit_with_tail(&cmd, buffers);
    }

    fn bind_texture(&mut self, slot: u32, texture: u32) {
        self.emit(&CmdBindTexture { slot, texture });
    }

    fn bind_sampler(&mut self, layer: u32, sampler: u32) {
        self.emit(&CmdBindSampler { layer, sampler });
    }

    fn set_pipeline_state(&mut self, pipeline: u32) {
        self.emit(&CmdBindPipelineState { pipeline });
    }

    fn set_resource_heap(&mut self, heap: u32, descriptor_set: u32) {
        self.emit(&CmdBindResourceHeap { heap, descriptor_set });
    }

    fn set_render_target(&mut self, render_target: u32) {
        self.emit(&CmdBindRenderTarget { render_target });
    }

    fn set_blend_factor(&mut self, color: [f32; 4]) {
        self.emit(&CmdSetBlendColor { color });
    }

    fn set_stencil_reference(&mut self, reference: i32, face: StencilFace) {
        self.emit(&CmdSetStencilRef {
            reference,
            face: face as u32,
        });
    }

    fn set_uniforms(&mut self, program: u32, location: i32, count: u32, data: &[u8]) {
        self.emit_with_tail(&set_uniforms(program, location, count, data), data);
    }

    fn begin_query(&mut self, query_heap: u32, query: u32) {
        self.emit(&CmdBeginQuery { query_heap, query });
    }

    fn end_query(&mut self, query_heap: u32) {
        self.emit(&CmdEndQuery { query_heap });
    }

    fn begin_render_pass(
        &mut self,
        render_target: u32,
        render_pass: u32,
        clear_values: &[ClearValue],
    ) -> Result<()> {
        self.encoder.begin_render_pass()?;
        let cmd = CmdBeginRenderPass {
            render_target,
            render_pass,
            num_clear_values: clear_values.len() as u32,
        };
        self.emit_with_tail(&cmd, clear_values);
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.encoder.end_render_pass()?;
        self.emit_opcode(Opcode::EndRenderPass);
        Ok(())
    }

    fn draw(&mut self, mode: PrimitiveTopology, vertices: Range<u32>) {
        self.emit(&CmdDrawArrays {
            mode: mode as u32,
            first: vertices.start as i32,
            count: vertices.len() as u32,
        });
    }

    fn draw_instanced(&mut self, mode: PrimitiveTopology, vertices: Range<u32>, instances: Range<u32>) {
        self.emit(&draw_arrays_instanced(mode, vertices, instances));
    }

    fn draw_indexed(
        &mut self,
        mode: PrimitiveTopology,
        format: IndexFormat,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) {
        self.emit(&draw_elements(mode, format, indices, base_vertex, instances));
    }

    fn draw_indirect(
        &mut self,
        mode: PrimitiveTopology,
        buffer: u32,
        offset: u64,
        num_commands: u32,
        stride: u32,
    ) {
        self.emit(&CmdDrawArraysIndirect {
            offset,
            buffer,
            num_commands,
            mode: mode as u32,
            stride,
        });
    }

    fn draw_indexed_indirect(
        &mut self,
        mode: PrimitiveTopology,
        format: IndexFormat,
        buffer: u32,
        offset: u64,
        num_commands: u32,
        stride: u32,
    ) {
        self.emit(&CmdDrawElementsIndirect {
            offset,
            buffer,
            num_commands,
            mode: mode as u32,
            index_type: format as u32,
            stride,
            _reserved: 0,
        });
    }

    fn dispatch(&mut self, groups: [u32; 3]) {
        self.emit(&CmdDispatchCompute { groups });
    }

    fn dispatch_indirect(&mut self, buffer: u32, offset: u64) {
        self.emit(&CmdDispatchComputeIndirect {
            offset,
            buffer,
            _reserved: 0,
        });
    }

    fn push_debug_group(&mut self, name: &str) {
        let id = self.encoder.push_debug_group();
        let cmd = CmdPushDebugGroup {
            id,
            length: name.len() as u32,
        };
        self.emit_with_tail(&cmd, name.as_bytes());
    }

    fn pop_debug_group(&mut self) {
        self.encoder.pop_debug_group();
        self.emit_opcode(Opcode::PopDebugGroup);
    }

    fn execute(&mut self, bundle: CommandBufferId, registry: &CommandBufferRegistry) -> Result<()> {
        self.encoder.check_execute()?;
        check_bundle(bundle, registry)?;
        self.emit(&CmdExecute {
            bundle_index: bundle.index,
            bundle_generation: bundle.generation,
        });
        Ok(())
    }
}

/// 注册表中 bundle 的代际索引
///
/// 释放后槽位的代数递增，旧 id 随之失效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBufferId {
    index: u32,
    generation: u32,
}

impl CommandBufferId {
    pub fn from_raw(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    buffer: Option<DeferredCommandBuffer>,
}

/// bundle 注册表
///
/// 持有所有可被 `execute` 引用的 bundle。引用它们的命令缓冲区只保存 `CommandBufferId`。
#[derive(Debug, Default)]
pub struct CommandBufferRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl CommandBufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个已结束录制的 bundle
    pub fn register(&mut self, bundle: DeferredCommandBuffer) -> Result<CommandBufferId> {
        if bundle.buffer_type() != CommandBufferType::Bundle {
            return Err(recording_error("Only bundles can be registered"));
        }
        if bundle.state() != CommandBufferState::Executable {
            return Err(recording_error("Bundle must be executable to be registered"));
        }

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.buffer = Some(bundle);
                CommandBufferId::from_raw(index, slot.generation)
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    buffer: Some(bundle),
                });
                CommandBufferId::from_raw(self.slots.len() as u32 - 1, 0)
            }
        };
        self.len += 1;
        debug!(index = id.index, generation = id.generation, "Bundle registered");
        Ok(id)
    }

    /// 释放 bundle，之后 `id` 失效
    pub fn release(&mut self, id: CommandBufferId) -> Option<DeferredCommandBuffer> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let bundle = slot.buffer.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(bundle)
    }

    pub fn get(&self, id: CommandBufferId) -> Option<&DeferredCommandBuffer> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.buffer.as_ref())
    }

    /// 用于重新录制一个已登记的 bundle
    ///
    /// 重新录制结束之前，引用它的命令缓冲区在重放时会触发断言。
    pub fn get_mut(&mut self, id: CommandBufferId) -> Option<&mut DeferredCommandBuffer> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.buffer.as_mut())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::soft::{NativeCall, TraceExecutor};

    fn recorded_bundle(registry: &mut CommandBufferRegistry) -> CommandBufferId {
        let mut bundle = DeferredCommandBuffer::new(CommandBufferDescriptor::bundle());
        bundle.begin().unwrap();
        bundle.set_vertex_array(3);
        bundle.draw(PrimitiveTopology::TriangleList, 0..6);
        bundle.end().unwrap();
        registry.register(bundle).unwrap()
    }

    #[test]
    fn test_command_buffer_descriptor() {
        let desc = CommandBufferDescriptor::direct_one_time();
        assert_eq!(desc.buffer_type, CommandBufferType::Direct);
        assert_eq!(desc.usage, CommandBufferUsage::OneTimeSubmit);

        let desc2 = CommandBufferDescriptor::transfer_one_time().with_name("Upload Buffer");
        assert_eq!(desc2.buffer_type, CommandBufferType::Transfer);
        assert_eq!(desc2.name.as_deref(), Some("Upload Buffer"));
    }

    #[test]
    fn test_command_encoder_state_machine() {
        let mut encoder = CommandEncoder::new(CommandBufferType::Direct);
        assert_eq!(encoder.state(), CommandBufferState::Initial);

        encoder.begin().unwrap();
        assert_eq!(encoder.state(), CommandBufferState::Recording);

        // 不能重复开始
        assert!(encoder.begin().is_err());

        encoder.begin_render_pass().unwrap();
        assert!(encoder.is_in_render_pass());

        // 在渲染通道中不能结束命令缓冲区
        assert!(encoder.end().is_err());

        encoder.end_render_pass().unwrap();
        encoder.end().unwrap();
        assert_eq!(encoder.state(), CommandBufferState::Executable);
    }

    #[test]
    fn test_command_encoder_type_restrictions() {
        let mut encoder = CommandEncoder::new(CommandBufferType::Compute);
        encoder.begin().unwrap();
        assert!(encoder.begin_render_pass().is_err());

        let mut bundle = CommandEncoder::new(CommandBufferType::Bundle);
        bundle.begin().unwrap();
        assert!(bundle.check_execute().is_err());
    }

    #[test]
    fn test_unbalanced_debug_groups() {
        let mut encoder = CommandEncoder::new(CommandBufferType::Direct);
        encoder.begin().unwrap();
        assert_eq!(encoder.push_debug_group(), 0);
        assert_eq!(encoder.push_debug_group(), 1);
        encoder.pop_debug_group();
        assert!(encoder.end().is_err());
        encoder.pop_debug_group();
        encoder.end().unwrap();
    }

    #[test]
    fn test_clear_then_draw_replay() {
        let registry = CommandBufferRegistry::new();
        let mut buffer = DeferredCommandBuffer::new(CommandBufferDescriptor::direct_reusable());
        buffer.begin().unwrap();
        buffer.set_clear_color([1.0, 0.0, 0.0, 1.0]);
        buffer.draw(PrimitiveTopology::TriangleList, 0..3);
        buffer.end().unwrap();

        let mut trace = TraceExecutor::new();
        buffer.execute_on(&registry, &mut trace);
        assert_eq!(
            trace.calls(),
            &[
                NativeCall::SetClearColor([1.0, 0.0, 0.0, 1.0]),
                NativeCall::DrawArrays {
                    mode: PrimitiveTopology::TriangleList,
                    first: 0,
                    count: 3,
                },
            ]
        );

        // 可复用的缓冲区可以重复重放
        let mut again = TraceExecutor::new();
        buffer.submit(&registry, &mut again);
        assert_eq!(again.calls(), trace.calls());
        assert_eq!(buffer.state(), CommandBufferState::Executable);
    }

    #[test]
    fn test_one_time_submit_resets() {
        let registry = CommandBufferRegistry::new();
        let mut buffer = DeferredCommandBuffer::new(CommandBufferDescriptor::direct_one_time());
        buffer.begin().unwrap();
        buffer.dispatch([4, 4, 1]);
        buffer.end().unwrap();

        let mut trace = TraceExecutor::new();
        buffer.submit(&registry, &mut trace);
        assert_eq!(trace.calls(), &[NativeCall::DispatchCompute([4, 4, 1])]);
        assert_eq!(buffer.state(), CommandBufferState::Initial);
        assert!(buffer.stream().is_empty());
    }

    #[test]
    fn test_begin_discards_previous_recording() {
        let mut buffer = DeferredCommandBuffer::new(CommandBufferDescriptor::direct_reusable());
        buffer.begin().unwrap();
        buffer.set_clear_depth(1.0);
        buffer.end().unwrap();
        assert_eq!(buffer.stream().num_records(), 1);

        buffer.begin().unwrap();
        assert!(buffer.stream().is_empty());
    }

    #[test]
    fn test_execute_bundle_is_inlined() {
        let mut registry = CommandBufferRegistry::new();
        let bundle = recorded_bundle(&mut registry);

        let mut primary = DeferredCommandBuffer::new(CommandBufferDescriptor::direct_reusable());
        primary.begin().unwrap();
        primary.bind_texture(0, 11);
        primary.execute(bundle, &registry).unwrap();
        primary.clear(ClearFlags::DEPTH);
        primary.end().unwrap();

        let mut trace = TraceExecutor::new();
        primary.execute_on(&registry, &mut trace);
        assert_eq!(
            trace.calls(),
            &[
                NativeCall::BindTexture { slot: 0, texture: 11 },
                NativeCall::BindVertexArray(3),
                NativeCall::DrawArrays {
                    mode: PrimitiveTopology::TriangleList,
                    first: 0,
                    count: 6,
                },
                NativeCall::Clear(ClearFlags::DEPTH),
            ]
        );
    }

    #[test]
    fn test_bundle_cannot_execute() {
        let mut registry = CommandBufferRegistry::new();
        let bundle = recorded_bundle(&mut registry);

        let mut nested = DeferredCommandBuffer::new(CommandBufferDescriptor::bundle());
        nested.begin().unwrap();
        assert!(nested.execute(bundle, &registry).is_err());
        assert!(nested.stream().is_empty());
    }

    #[test]
    fn test_registry_rejects_primaries_and_stale_ids() {
        let mut registry = CommandBufferRegistry::new();

        let mut primary = DeferredCommandBuffer::new(CommandBufferDescriptor::direct_reusable());
        primary.begin().unwrap();
        primary.end().unwrap();
        assert!(registry.register(primary).is_err());

        let id = recorded_bundle(&mut registry);
        assert_eq!(registry.len(), 1);
        assert!(registry.release(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(registry.release(id).is_none());

        // 槽位复用后旧 id 仍然无效
        let reused = recorded_bundle(&mut registry);
        assert_eq!(reused.index(), id.index());
        assert_ne!(reused.generation(), id.generation());
        assert!(registry.get(id).is_none());

        let mut primary = DeferredCommandBuffer::new(CommandBufferDescriptor::direct_reusable());
        primary.begin().unwrap();
        assert!(primary.execute(id, &registry).is_err());
        primary.execute(reused, &registry).unwrap();
    }

    #[test]
    #[should_panic(expected = "is being re-recorded")]
    fn test_rerecorded_bundle_cannot_replay() {
        let mut registry = CommandBufferRegistry::new();
        let bundle = recorded_bundle(&mut registry);

        let mut primary = DeferredCommandBuffer::new(CommandBufferDescriptor::direct_reusable());
        primary.begin().unwrap();
        primary.execute(bundle, &registry).unwrap();
        primary.end().unwrap();

        let reopened = registry.get_mut(bundle).unwrap();
        reopened.begin().unwrap();
        reopened.set_clear_depth(0.5);

        let mut trace = TraceExecutor::new();
        primary.execute_on(&registry, &mut trace);
    }

    #[test]
    fn test_immediate_buffer_forwards_calls() {
        let mut registry = CommandBufferRegistry::new();
        let bundle = recorded_bundle(&mut registry);

        let mut buffer = ImmediateCommandBuffer::new(CommandBufferType::Direct, TraceExecutor::new());
        buffer.begin().unwrap();
        buffer.push_debug_group("shadow pass");
        buffer.execute(bundle, &registry).unwrap();
        buffer.pop_debug_group();
        buffer.end().unwrap();

        let trace = buffer.into_executor();
        assert_eq!(trace.calls().len(), 4);
        assert_eq!(
            trace.calls()[0],
            NativeCall::PushDebugGroup {
                id: 0,
                name: "shadow pass".to_string(),
            }
        );
        assert_eq!(trace.calls()[3], NativeCall::PopDebugGroup);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside begin/end")]
    fn test_immediate_buffer_requires_recording() {
        let mut buffer = ImmediateCommandBuffer::new(CommandBufferType::Direct, TraceExecutor::new());
        buffer.begin().unwrap();
        buffer.end().unwrap();
        buffer.draw(PrimitiveTopology::PointList, 0..1);
    }

    #[test]
    #[should_panic(expected = "cannot clear more than")]
    fn test_too_many_attachments() {
        let mut buffer = DeferredCommandBuffer::new(CommandBufferDescriptor::direct_reusable());
        buffer.begin().unwrap();
        buffer.clear_attachments(&[AttachmentClear::default(); MAX_NUM_ATTACHMENTS + 1]);
    }
}
