//! 命令执行模块
//!
//! `CommandExecutor` 是执行上下文的原生调用面：每种操作码对应一个方法。
//! 立即命令缓冲区直接调用它，延迟命令缓冲区在重放时由 `execute_stream` 调用它。
//!
//! 重放严格按照写入顺序进行。`Execute` 记录会先递归重放被引用的 bundle，
//! 再继续外层流的下一条记录。

use tracing::trace;

use crate::span_trace;

use crate::renderer::command::{CommandBufferId, CommandBufferRegistry, CommandBufferState};
use crate::renderer::opcode::*;

/// 执行上下文
///
/// 多字段的命令直接接收解码后的载荷，简单命令接收拆开的参数。
pub trait CommandExecutor {
    fn buffer_sub_data(&mut self, cmd: &CmdBufferSubData, data: &[u8]);
    fn copy_buffer_sub_data(&mut self, cmd: &CmdCopyBufferSubData);
    fn fill_buffer(&mut self, cmd: &CmdFillBuffer);
    fn generate_mipmap(&mut self, cmd: &CmdGenerateMipmap);

    fn set_viewport(&mut self, viewport: &Viewport);
    fn set_viewports(&mut self, first: u32, viewports: &[Viewport]);
    fn set_scissor(&mut self, scissor: &Scissor);
    fn set_scissors(&mut self, first: u32, scissors: &[Scissor]);

    fn set_clear_color(&mut self, color: [f32; 4]);
    fn set_clear_depth(&mut self, depth: f32);
    fn set_clear_stencil(&mut self, stencil: i32);
    fn clear(&mut self, flags: ClearFlags);
    fn clear_attachments(&mut self, attachments: &[AttachmentClear]);

    fn bind_vertex_array(&mut self, vao: u32);
    fn bind_buffer_base(&mut self, target: BufferTarget, index: u32, buffer: u32);
    fn bind_buffers_base(&mut self, target: BufferTarget, first: u32, buffers: &[u32]);
    fn bind_texture(&mut self, slot: u32, texture: u32);
    fn bind_sampler(&mut self, layer: u32, sampler: u32);
    fn bind_pipeline_state(&mut self, pipeline: u32);
    fn bind_resource_heap(&mut self, heap: u32, descriptor_set: u32);
    fn bind_render_target(&mut self, render_target: u32);

    fn set_blend_color(&mut self, color: [f32; 4]);
    fn set_stencil_reference(&mut self, reference: i32, face: StencilFace);
    fn set_uniforms(&mut self, cmd: &CmdSetUniforms, data: &[u8]);

    fn begin_query(&mut self, query_heap: u32, query: u32);
    fn end_query(&mut self, query_heap: u32);
    fn begin_render_pass(&mut self, render_target: u32, render_pass: u32, clear_values: &[ClearValue]);
    fn end_render_pass(&mut self);

    fn draw_arrays(&mut self, mode: PrimitiveTopology, first: i32, count: u32);
    fn draw_arrays_instanced(&mut self, cmd: &CmdDrawArraysInstanced);
    fn draw_elements(&mut self, cmd: &CmdDrawElements);
    fn draw_arrays_indirect(&mut self, cmd: &CmdDrawArraysIndirect);
    fn draw_elements_indirect(&mut self, cmd: &CmdDrawElementsIndirect);
    fn dispatch_compute(&mut self, groups: [u32; 3]);
    fn dispatch_compute_indirect(&mut self, buffer: u32, offset: u64);

    fn push_debug_group(&mut self, id: u32, name: &str);
    fn pop_debug_group(&mut self);
}

/// 重放一个操作码流
///
/// `max_depth` 是允许的 `Execute` 嵌套层数。注册表中只有 bundle，而 bundle 不能
/// 录制 `Execute`，所以合法的流最多嵌套一层。
pub fn execute_stream<E: CommandExecutor + ?Sized>(
    stream: &OpcodeStream,
    registry: &CommandBufferRegistry,
    executor: &mut E,
    max_depth: u32,
) {
    let span = span_trace!("execute_stream");
    let _enter = span.enter();

    for record in stream.records() {
        trace!(opcode = record.opcode.name(), "Replaying opcode");
        dispatch(record, registry, executor, max_depth);
    }
}

/// 重放注册表中的一个 bundle
pub fn execute_bundle<E: CommandExecutor + ?Sized>(
    id: CommandBufferId,
    registry: &CommandBufferRegistry,
    executor: &mut E,
    max_depth: u32,
) {
    assert!(max_depth > 0, "command buffer nesting exceeds the configured depth");
    let bundle = match registry.get(id) {
        Some(bundle) => bundle,
        None => panic!("execute references a released command buffer {:?}", id),
    };
    assert_eq!(
        bundle.state(),
        CommandBufferState::Executable,
        "bundle {:?} is being re-recorded and cannot be replayed",
        id
    );
    execute_stream(bundle.stream(), registry, executor, max_depth - 1);
}

fn dispatch<E: CommandExecutor + ?Sized>(
    record: Record<'_>,
    registry: &CommandBufferRegistry,
    executor: &mut E,
    max_depth: u32,
) {
    match record.opcode {
        Opcode::BufferSubData => {
            executor.buffer_sub_data(record.payload::<CmdBufferSubData>(), record.tail_bytes())
        }
        Opcode::CopyBufferSubData => executor.copy_buffer_sub_data(record.payload()),
        Opcode::FillBuffer => executor.fill_buffer(record.payload()),
        Opcode::GenerateMipmap => executor.generate_mipmap(record.payload()),
        Opcode::Execute => {
            let cmd: &CmdExecute = record.payload();
            let id = CommandBufferId::from_raw(cmd.bundle_index, cmd.bundle_generation);
            execute_bundle(id, registry, executor, max_depth);
        }
        Opcode::Viewport => executor.set_viewport(&record.payload::<CmdViewport>().viewport),
        Opcode::ViewportArray => {
            let cmd: &CmdViewportArray = record.payload();
            executor.set_viewports(cmd.first, record.tail())
        }
        Opcode::Scissor => executor.set_scissor(&record.payload::<CmdScissor>().scissor),
        Opcode::ScissorArray => {
            let cmd: &CmdScissorArray = record.payload();
            executor.set_scissors(cmd.first, record.tail())
        }
        Opcode::ClearColor => executor.set_clear_color(record.payload::<CmdClearColor>().color),
        Opcode::ClearDepth => executor.set_clear_depth(record.payload::<CmdClearDepth>().depth),
        Opcode::ClearStencil => {
            executor.set_clear_stencil(record.payload::<CmdClearStencil>().stencil)
        }
        Opcode::Clear => executor.clear(record.payload::<CmdClear>().clear_flags()),
        Opcode::ClearBuffers => {
            let _: &CmdClearBuffers = record.payload();
            executor.clear_attachments(record.tail())
        }
        Opcode::BindVertexArray => {
            executor.bind_vertex_array(record.payload::<CmdBindVertexArray>().vao)
        }
        Opcode::BindBufferBase => {
            let cmd: &CmdBindBufferBase = record.payload();
            executor.bind_buffer_base(cmd.target(), cmd.index, cmd.buffer)
        }
        Opcode::BindBuffersBase => {
            let cmd: &CmdBindBuffersBase = record.payload();
            executor.bind_buffers_base(cmd.target(), cmd.first, record.tail())
        }
        Opcode::BindTexture => {
            let cmd: &CmdBindTexture = record.payload();
            executor.bind_texture(cmd.slot, cmd.texture)
        }
        Opcode::BindSampler => {
            let cmd: &CmdBindSampler = record.payload();
            executor.bind_sampler(cmd.layer, cmd.sampler)
        }
        Opcode::BindPipelineState => {
            executor.bind_pipeline_state(record.payload::<CmdBindPipelineState>().pipeline)
        }
        Opcode::BindResourceHeap => {
            let cmd: &CmdBindResourceHeap = record.payload();
            executor.bind_resource_heap(cmd.heap, cmd.descriptor_set)
        }
        Opcode::BindRenderTarget => {
            executor.bind_render_target(record.payload::<CmdBindRenderTarget>().render_target)
        }
        Opcode::SetBlendColor => executor.set_blend_color(record.payload::<CmdSetBlendColor>().color),
        Opcode::SetStencilRef => {
            let cmd: &CmdSetStencilRef = record.payload();
            executor.set_stencil_reference(cmd.reference, cmd.face())
        }
        Opcode::SetUniforms => {
            executor.set_uniforms(record.payload::<CmdSetUniforms>(), record.tail_bytes())
        }
        Opcode::BeginQuery => {
            let cmd: &CmdBeginQuery = record.payload();
            executor.begin_query(cmd.query_heap, cmd.query)
        }
        Opcode::EndQuery => executor.end_query(record.payload::<CmdEndQuery>().query_heap),
        Opcode::BeginRenderPass => {
            let cmd: &CmdBeginRenderPass = record.payload();
            executor.begin_render_pass(cmd.render_target, cmd.render_pass, record.tail())
        }
        Opcode::EndRenderPass => executor.end_render_pass(),
        Opcode::DrawArrays => {
            let cmd: &CmdDrawArrays = record.payload();
            executor.draw_arrays(cmd.mode(), cmd.first, cmd.count)
        }
        Opcode::DrawArraysInstanced => executor.draw_arrays_instanced(record.payload()),
        Opcode::DrawElements => executor.draw_elements(record.payload()),
        Opcode::DrawArraysIndirect => executor.draw_arrays_indirect(record.payload()),
        Opcode::DrawElementsIndirect => executor.draw_elements_indirect(record.payload()),
        Opcode::DispatchCompute => {
            executor.dispatch_compute(record.payload::<CmdDispatchCompute>().groups)
        }
        Opcode::DispatchComputeIndirect => {
            let cmd: &CmdDispatchComputeIndirect = record.payload();
            executor.dispatch_compute_indirect(cmd.buffer, cmd.offset)
        }
        Opcode::PushDebugGroup => {
            let cmd: &CmdPushDebugGroup = record.payload();
            let name = std::str::from_utf8(record.tail_bytes())
                .unwrap_or_else(|_| panic!("corrupted opcode stream: debug group name is not UTF-8"));
            executor.push_debug_group(cmd.id, name)
        }
        Opcode::PopDebugGroup => executor.pop_debug_group(),
    }
}
