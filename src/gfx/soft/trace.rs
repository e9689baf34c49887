//! 记录原生调用的执行上下文
//!
//! `TraceExecutor` 不驱动任何设备，只把收到的每个调用连同解码后的参数记下来，
//! 用于比较立即录制与延迟重放的调用序列，以及调试输出。

use tracing::trace;

use crate::renderer::executor::CommandExecutor;
use crate::renderer::opcode::*;

/// 一次原生调用
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCall {
    BufferSubData { buffer: u32, offset: u64, data: Vec<u8> },
    CopyBufferSubData(CmdCopyBufferSubData),
    FillBuffer(CmdFillBuffer),
    GenerateMipmap(CmdGenerateMipmap),
    SetViewport(Viewport),
    SetViewports { first: u32, viewports: Vec<Viewport> },
    SetScissor(Scissor),
    SetScissors { first: u32, scissors: Vec<Scissor> },
    SetClearColor([f32; 4]),
    SetClearDepth(f32),
    SetClearStencil(i32),
    Clear(ClearFlags),
    ClearAttachments(Vec<AttachmentClear>),
    BindVertexArray(u32),
    BindBufferBase { target: BufferTarget, index: u32, buffer: u32 },
    BindBuffersBase { target: BufferTarget, first: u32, buffers: Vec<u32> },
    BindTexture { slot: u32, texture: u32 },
    BindSampler { layer: u32, sampler: u32 },
    BindPipelineState(u32),
    BindResourceHeap { heap: u32, descriptor_set: u32 },
    BindRenderTarget(u32),
    SetBlendColor([f32; 4]),
    SetStencilReference { reference: i32, face: StencilFace },
    SetUniforms { program: u32, location: i32, count: u32, data: Vec<u8> },
    BeginQuery { query_heap: u32, query: u32 },
    EndQuery(u32),
    BeginRenderPass { render_target: u32, render_pass: u32, clear_values: Vec<ClearValue> },
    EndRenderPass,
    DrawArrays { mode: PrimitiveTopology, first: i32, count: u32 },
    DrawArraysInstanced(CmdDrawArraysInstanced),
    DrawElements(CmdDrawElements),
    DrawArraysIndirect(CmdDrawArraysIndirect),
    DrawElementsIndirect(CmdDrawElementsIndirect),
    DispatchCompute([u32; 3]),
    DispatchComputeIndirect { buffer: u32, offset: u64 },
    PushDebugGroup { id: u32, name: String },
    PopDebugGroup,
}

/// 记录调用序列的执行上下文
#[derive(Debug, Default, Clone)]
pub struct TraceExecutor {
    calls: Vec<NativeCall>,
}

impl TraceExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[NativeCall] {
        &self.calls
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }

    pub fn into_calls(self) -> Vec<NativeCall> {
        self.calls
    }

    fn push(&mut self, call: NativeCall) {
        trace!(?call, "Native call");
        self.calls.push(call);
    }
}

impl CommandExecutor for TraceExecutor {
    fn buffer_sub_data(&mut self, cmd: &CmdBufferSubData, data: &[u8]) {
        self.push(NativeCall::BufferSubData {
            buffer: cmd.buffer,
            offset: cmd.offset,
            data: data.to_vec(),
        });
    }

    fn copy_buffer_sub_data(&mut self, cmd: &CmdCopyBufferSubData) {
        self.push(NativeCall::CopyBufferSubData(*cmd));
    }

    fn fill_buffer(&mut self, cmd: &CmdFillBuffer) {
        self.push(NativeCall::FillBuffer(*cmd));
    }

    fn generate_mipmap(&mut self, cmd: &CmdGenerateMipmap) {
        self.push(NativeCall::GenerateMipmap(*cmd));
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.push(NativeCall::SetViewport(*viewport));
    }

    fn set_viewports(&mut self, first: u32, viewports: &[Viewport]) {
        self.push(NativeCall::SetViewports {
            first,
            viewports: viewports.to_vec(),
        });
    }

    fn set_scissor(&mut self, scissor: &Scissor) {
        self.push(NativeCall::SetScissor(*scissor));
    }

    fn set_scissors(&mut self, first: u32, scissors: &[Scissor]) {
        self.push(NativeCall::SetScissors {
            first,
            scissors: scissors.to_vec(),
        });
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.push(NativeCall::SetClearColor(color));
    }

    fn set_clear_depth(&mut self, depth: f32) {
        self.push(NativeCall::SetClearDepth(depth));
    }

    fn set_clear_stencil(&mut self, stencil: i32) {
        self.push(NativeCall::SetClearStencil(stencil));
    }

    fn clear(&mut self, flags: ClearFlags) {
        self.push(NativeCall::Clear(flags));
    }

    fn clear_attachments(&mut self, attachments: &[AttachmentClear]) {
        self.push(NativeCall::ClearAttachments(attachments.to_vec()));
    }

    fn bind_vertex_array(&mut self, vao: u32) {
        self.push(NativeCall::BindVertexArray(vao));
    }

    fn bind_buffer_base(&mut self, target: BufferTarget, index: u32, buffer: u32) {
        self.push(NativeCall::BindBufferBase {
            target,
            index,
            buffer,
        });
    }

    fn bind_buffers_base(&mut self, target: BufferTarget, first: u32, buffers: &[u32]) {
        self.push(NativeCall::BindBuffersBase {
            target,
            first,
            buffers: buffers.to_vec(),
        });
    }

    fn bind_texture(&mut self, slot: u32, texture: u32) {
        self.push(NativeCall::BindTexture { slot, texture });
    }

    fn bind_sampler(&mut self, layer: u32, sampler: u32) {
        self.push(NativeCall::BindSampler { layer, sampler });
    }

    fn bind_pipeline_state(&mut self, pipeline: u32) {
        self.push(NativeCall::BindPipelineState(pipeline));
    }

    fn bind_resource_heap(&mut self, heap: u32, descriptor_set: u32) {
        self.push(NativeCall::BindResourceHeap {
            heap,
            descriptor_set,
        });
    }

    fn bind_render_target(&mut self, render_target: u32) {
        self.push(NativeCall::BindRenderTarget(render_target));
    }

    fn set_blend_color(&mut self, color: [f32; 4]) {
        self.push(NativeCall::SetBlendColor(color));
    }

    fn set_stencil_reference(&mut self, reference: i32, face: StencilFace) {
        self.push(NativeCall::SetStencilReference { reference, face });
    }

    fn set_uniforms(&mut self, cmd: &CmdSetUniforms, data: &[u8]) {
        self.push(NativeCall::SetUniforms {
            program: cmd.program,
            location: cmd.location,
            count: cmd.count,
            data: data.to_vec(),
        });
    }

    fn begin_query(&mut self, query_heap: u32, query: u32) {
        self.push(NativeCall::BeginQuery { query_heap, query });
    }

    fn end_query(&mut self, query_heap: u32) {
        self.push(NativeCall::EndQuery(query_heap));
    }

    fn begin_render_pass(&mut self, render_target: u32, render_pass: u32, clear_values: &[ClearValue]) {
        self.push(NativeCall::BeginRenderPass {
            render_target,
            render_pass,
            clear_values: clear_values.to_vec(),
        });
    }

    fn end_render_pass(&mut self) {
        self.push(NativeCall::EndRenderPass);
    }

    fn draw_arrays(&mut self, mode: PrimitiveTopology, first: i32, count: u32) {
        self.push(NativeCall::DrawArrays { mode, first, count });
    }

    fn draw_arrays_instanced(&mut self, cmd: &CmdDrawArraysInstanced) {
        self.push(NativeCall::DrawArraysInstanced(*cmd));
    }

    fn draw_elements(&mut self, cmd: &CmdDrawElements) {
        self.push(NativeCall::DrawElements(*cmd));
    }

    fn draw_arrays_indirect(&mut self, cmd: &CmdDrawArraysIndirect) {
        self.push(NativeCall::DrawArraysIndirect(*cmd));
    }

    fn draw_elements_indirect(&mut self, cmd: &CmdDrawElementsIndirect) {
        self.push(NativeCall::DrawElementsIndirect(*cmd));
    }

    fn dispatch_compute(&mut self, groups: [u32; 3]) {
        self.push(NativeCall::DispatchCompute(groups));
    }

    fn dispatch_compute_indirect(&mut self, buffer: u32, offset: u64) {
        self.push(NativeCall::DispatchComputeIndirect { buffer, offset });
    }

    fn push_debug_group(&mut self, id: u32, name: &str) {
        self.push(NativeCall::PushDebugGroup {
            id,
            name: name.to_string(),
        });
    }

    fn pop_debug_group(&mut self) {
        self.push(NativeCall::PopDebugGroup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::command::CommandBufferRegistry;
    use crate::renderer::executor::execute_stream;

    #[test]
    fn test_viewport_array_replay() {
        let viewports: Vec<Viewport> = (0..5)
            .map(|i| Viewport::new(0.0, i as f32 * 32.0, 64.0, 32.0))
            .collect();

        let mut stream = OpcodeStream::new();
        stream.emit_with_tail(&CmdViewportArray { first: 0, count: 5 }, &viewports);

        let mut trace = TraceExecutor::new();
        execute_stream(&stream, &CommandBufferRegistry::new(), &mut trace, 1);

        assert_eq!(
            trace.calls(),
            &[NativeCall::SetViewports {
                first: 0,
                viewports,
            }]
        );
    }

    #[test]
    fn test_mixed_tails_replay_in_order() {
        let mut stream = OpcodeStream::new();
        stream.emit_with_tail(
            &CmdBufferSubData {
                offset: 16,
                size: 3,
                buffer: 2,
                _reserved: 0,
            },
            &[7u8, 8, 9],
        );
        stream.emit_with_tail(
            &CmdBindBuffersBase {
                target: BufferTarget::Storage as u32,
                first: 1,
                count: 3,
            },
            &[10u32, 11, 12],
        );
        stream.emit_opcode(Opcode::EndRenderPass);
        stream.emit(&CmdSetStencilRef {
            reference: 3,
            face: StencilFace::Back as u32,
        });

        let mut trace = TraceExecutor::new();
        execute_stream(&stream, &CommandBufferRegistry::new(), &mut trace, 1);

        assert_eq!(
            trace.into_calls(),
            vec![
                NativeCall::BufferSubData {
                    buffer: 2,
                    offset: 16,
                    data: vec![7, 8, 9],
                },
                NativeCall::BindBuffersBase {
                    target: BufferTarget::Storage,
                    first: 1,
                    buffers: vec![10, 11, 12],
                },
                NativeCall::EndRenderPass,
                NativeCall::SetStencilReference {
                    reference: 3,
                    face: StencilFace::Back,
                },
            ]
        );
    }
}
