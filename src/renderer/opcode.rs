//! 操作码命令流模块
//!
//! 把异构的绘制/绑定/状态命令编码进一个扁平的字节缓冲区，供延迟命令缓冲区之后重放。
//! 借鉴 OpenGL 后端延迟命令缓冲区的"标签 + 定长结构 + 变长尾部"布局。
//!
//! # 记录布局
//!
//! ```text
//! ┌──────────────┬────────────────────┬──────────────────┬─────────┐
//! │ OpcodeHeader │ 定长载荷 (P)        │ 变长尾部 (可选)   │ 填充     │
//! │ opcode, size │ payload_size 字节   │ 长度由载荷字段决定 │ 到 8 字节│
//! └──────────────┴────────────────────┴──────────────────┴─────────┘
//! ```
//!
//! - 每条记录的总长度是 `RECORD_ALIGNMENT`（8 字节）的倍数
//! - 底层存储是 `Vec<u64>`，因此每条记录的起始地址都按 8 字节对齐，
//!   解码时可以直接用 `bytemuck::from_bytes` 借用载荷，不需要复制
//! - 尾部紧跟在定长载荷之后，数组长度保存在定长载荷中（例如 `count`）
//! - 流只会追加，直到 `reset`
//!
//! # 错误语义
//!
//! 流只能通过本模块的 `emit*` 接口产生，解码时遇到损坏的标签或截断的尾部属于
//! 编程契约错误，直接断言失败，不作为可恢复错误返回。

use bytemuck::{Pod, Zeroable};
use tracing::trace;

/// 记录对齐（字节）
pub const RECORD_ALIGNMENT: usize = 8;

/// 记录头大小（字节）
pub const HEADER_SIZE: usize = std::mem::size_of::<OpcodeHeader>();

/// 一次清除命令中允许的最大附件数量（8 个颜色附件 + 1 个深度模板附件）
pub const MAX_NUM_ATTACHMENTS: usize = 9;

/// 记录头
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct OpcodeHeader {
    /// 操作码标签
    pub opcode: u32,
    /// 定长载荷的字节数
    pub payload_size: u32,
}

macro_rules! define_opcodes {
    ($($(#[$meta:meta])* $name:ident = $value:expr,)*) => {
        /// 操作码标签
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($(#[$meta])* $name = $value,)*
        }

        impl Opcode {
            /// 从原始标签解析
            pub fn from_raw(raw: u32) -> Option<Self> {
                match raw {
                    $($value => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            /// 操作码名称
            pub fn name(&self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name),)*
                }
            }
        }
    };
}

define_opcodes! {
    /// 更新缓冲区数据（尾部：数据字节）
    BufferSubData = 1,
    /// 缓冲区之间复制
    CopyBufferSubData = 2,
    /// 用 32 位值填充缓冲区
    FillBuffer = 3,
    /// 生成 mip 链
    GenerateMipmap = 4,
    /// 执行一个 bundle
    Execute = 5,
    /// 设置单个视口
    Viewport = 6,
    /// 设置视口数组（尾部：`Viewport[count]`）
    ViewportArray = 7,
    /// 设置单个裁剪矩形
    Scissor = 8,
    /// 设置裁剪矩形数组（尾部：`Scissor[count]`）
    ScissorArray = 9,
    /// 设置清除颜色
    ClearColor = 10,
    /// 设置清除深度
    ClearDepth = 11,
    /// 设置清除模板值
    ClearStencil = 12,
    /// 按标志清除当前渲染目标
    Clear = 13,
    /// 清除多个附件（尾部：`AttachmentClear[num_attachments]`）
    ClearBuffers = 14,
    /// 绑定顶点数组
    BindVertexArray = 15,
    /// 绑定单个缓冲区到索引绑定点
    BindBufferBase = 16,
    /// 绑定多个缓冲区（尾部：`u32[count]`）
    BindBuffersBase = 17,
    /// 绑定纹理
    BindTexture = 18,
    /// 绑定采样器
    BindSampler = 19,
    /// 绑定管线状态
    BindPipelineState = 20,
    /// 绑定资源堆
    BindResourceHeap = 21,
    /// 绑定渲染目标
    BindRenderTarget = 22,
    /// 设置混合颜色
    SetBlendColor = 23,
    /// 设置模板参考值
    SetStencilRef = 24,
    /// 设置 uniform（尾部：数据字节）
    SetUniforms = 25,
    /// 开始查询
    BeginQuery = 26,
    /// 结束查询
    EndQuery = 27,
    /// 开始渲染通道（尾部：`ClearValue[num_clear_values]`）
    BeginRenderPass = 28,
    /// 结束渲染通道（无载荷）
    EndRenderPass = 29,
    /// 非索引绘制
    DrawArrays = 30,
    /// 非索引实例化绘制
    DrawArraysInstanced = 31,
    /// 索引绘制
    DrawElements = 32,
    /// 非索引间接绘制
    DrawArraysIndirect = 33,
    /// 索引间接绘制
    DrawElementsIndirect = 34,
    /// 计算分派
    DispatchCompute = 35,
    /// 间接计算分派
    DispatchComputeIndirect = 36,
    /// 压入调试组（尾部：名称字节）
    PushDebugGroup = 37,
    /// 弹出调试组（无载荷）
    PopDebugGroup = 38,
}

impl Opcode {
    /// 根据定长载荷计算尾部字节数
    ///
    /// 只有带变长尾部的命令需要解码载荷，其余直接返回 0。
    pub fn tail_len(&self, payload: &[u8]) -> usize {
        match self {
            Opcode::BufferSubData => decode::<CmdBufferSubData>(payload).tail_len(),
            Opcode::ViewportArray => decode::<CmdViewportArray>(payload).tail_len(),
            Opcode::ScissorArray => decode::<CmdScissorArray>(payload).tail_len(),
            Opcode::ClearBuffers => decode::<CmdClearBuffers>(payload).tail_len(),
            Opcode::BindBuffersBase => decode::<CmdBindBuffersBase>(payload).tail_len(),
            Opcode::SetUniforms => decode::<CmdSetUniforms>(payload).tail_len(),
            Opcode::BeginRenderPass => decode::<CmdBeginRenderPass>(payload).tail_len(),
            Opcode::PushDebugGroup => decode::<CmdPushDebugGroup>(payload).tail_len(),
            _ => 0,
        }
    }
}

fn decode<P: Pod>(payload: &[u8]) -> &P {
    bytemuck::from_bytes(payload)
}

/// 定长载荷
///
/// 每种载荷对应唯一的操作码；带尾部的载荷通过 `tail_len` 给出尾部字节数。
pub trait Payload: Pod {
    const OPCODE: Opcode;

    /// 尾部字节数
    fn tail_len(&self) -> usize {
        0
    }
}

// ---------------------------------------------------------------------------
// 枚举值（载荷中以 u32 保存）
// ---------------------------------------------------------------------------

/// 图元拓扑
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList = 0,
    LineList = 1,
    LineStrip = 2,
    TriangleList = 3,
    TriangleStrip = 4,
}

impl PrimitiveTopology {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(PrimitiveTopology::PointList),
            1 => Some(PrimitiveTopology::LineList),
            2 => Some(PrimitiveTopology::LineStrip),
            3 => Some(PrimitiveTopology::TriangleList),
            4 => Some(PrimitiveTopology::TriangleStrip),
            _ => None,
        }
    }
}

/// 索引格式
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16 = 0,
    Uint32 = 1,
}

impl IndexFormat {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(IndexFormat::Uint16),
            1 => Some(IndexFormat::Uint32),
            _ => None,
        }
    }

    /// 单个索引的字节数
    pub fn size(&self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// 缓冲区索引绑定点
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Uniform = 0,
    Storage = 1,
    TransformFeedback = 2,
}

impl BufferTarget {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(BufferTarget::Uniform),
            1 => Some(BufferTarget::Storage),
            2 => Some(BufferTarget::TransformFeedback),
            _ => None,
        }
    }
}

/// 模板面
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilFace {
    Front = 0,
    Back = 1,
    FrontAndBack = 2,
}

impl StencilFace {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(StencilFace::Front),
            1 => Some(StencilFace::Back),
            2 => Some(StencilFace::FrontAndBack),
            _ => None,
        }
    }
}

/// 清除标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClearFlags(pub u32);

impl ClearFlags {
    pub const COLOR: Self = Self(1 << 0);
    pub const DEPTH: Self = Self(1 << 1);
    pub const STENCIL: Self = Self(1 << 2);
    pub const COLOR_DEPTH: Self = Self(Self::COLOR.0 | Self::DEPTH.0);
    pub const DEPTH_STENCIL: Self = Self(Self::DEPTH.0 | Self::STENCIL.0);
    pub const ALL: Self = Self(Self::COLOR.0 | Self::DEPTH.0 | Self::STENCIL.0);

    pub fn contains(&self, other: ClearFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for ClearFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

fn expect_enum<T>(value: Option<T>, what: &str, raw: u32) -> T {
    match value {
        Some(v) => v,
        None => panic!("corrupted opcode stream: invalid {} {}", what, raw),
    }
}

// ---------------------------------------------------------------------------
// 尾部元素
// ---------------------------------------------------------------------------

/// 视口
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 裁剪矩形
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Scissor {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Scissor {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

/// 单个附件的清除描述
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct AttachmentClear {
    /// `ClearFlags` 位
    pub flags: u32,
    /// 颜色附件索引（仅 COLOR 时有效）
    pub color_attachment: u32,
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

impl AttachmentClear {
    pub fn color(color_attachment: u32, color: [f32; 4]) -> Self {
        Self {
            flags: ClearFlags::COLOR.bits(),
            color_attachment,
            color,
            ..Self::default()
        }
    }

    pub fn depth_stencil(depth: f32, stencil: u32) -> Self {
        Self {
            flags: ClearFlags::DEPTH_STENCIL.bits(),
            depth,
            stencil,
            ..Self::default()
        }
    }

    pub fn clear_flags(&self) -> ClearFlags {
        ClearFlags(self.flags)
    }
}

/// 渲染通道开始时的清除值
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct ClearValue {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

// ---------------------------------------------------------------------------
// 定长载荷
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBufferSubData {
    pub offset: u64,
    pub size: u64,
    pub buffer: u32,
    pub _reserved: u32,
}

impl Payload for CmdBufferSubData {
    const OPCODE: Opcode = Opcode::BufferSubData;

    fn tail_len(&self) -> usize {
        self.size as usize
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdCopyBufferSubData {
    pub read_offset: u64,
    pub write_offset: u64,
    pub size: u64,
    pub write_buffer: u32,
    pub read_buffer: u32,
}

impl Payload for CmdCopyBufferSubData {
    const OPCODE: Opcode = Opcode::CopyBufferSubData;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdFillBuffer {
    pub offset: u64,
    pub size: u64,
    pub buffer: u32,
    pub value: u32,
}

impl Payload for CmdFillBuffer {
    const OPCODE: Opcode = Opcode::FillBuffer;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdGenerateMipmap {
    pub texture: u32,
    pub base_mip_level: u32,
    pub num_mip_levels: u32,
    pub base_array_layer: u32,
    pub num_array_layers: u32,
}

impl Payload for CmdGenerateMipmap {
    const OPCODE: Opcode = Opcode::GenerateMipmap;
}

/// 执行 bundle：通过注册表中的代际索引引用，不拥有被引用的命令缓冲区
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdExecute {
    pub bundle_index: u32,
    pub bundle_generation: u32,
}

impl Payload for CmdExecute {
    const OPCODE: Opcode = Opcode::Execute;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CmdViewport {
    pub viewport: Viewport,
}

impl Payload for CmdViewport {
    const OPCODE: Opcode = Opcode::Viewport;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdViewportArray {
    pub first: u32,
    pub count: u32,
}

impl Payload for CmdViewportArray {
    const OPCODE: Opcode = Opcode::ViewportArray;

    fn tail_len(&self) -> usize {
        self.count as usize * std::mem::size_of::<Viewport>()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdScissor {
    pub scissor: Scissor,
}

impl Payload for CmdScissor {
    const OPCODE: Opcode = Opcode::Scissor;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdScissorArray {
    pub first: u32,
    pub count: u32,
}

impl Payload for CmdScissorArray {
    const OPCODE: Opcode = Opcode::ScissorArray;

    fn tail_len(&self) -> usize {
        self.count as usize * std::mem::size_of::<Scissor>()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CmdClearColor {
    pub color: [f32; 4],
}

impl Payload for CmdClearColor {
    const OPCODE: Opcode = Opcode::ClearColor;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CmdClearDepth {
    pub depth: f32,
}

impl Payload for CmdClearDepth {
    const OPCODE: Opcode = Opcode::ClearDepth;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdClearStencil {
    pub stencil: i32,
}

impl Payload for CmdClearStencil {
    const OPCODE: Opcode = Opcode::ClearStencil;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdClear {
    pub flags: u32,
}

impl CmdClear {
    pub fn clear_flags(&self) -> ClearFlags {
        ClearFlags(self.flags)
    }
}

impl Payload for CmdClear {
    const OPCODE: Opcode = Opcode::Clear;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdClearBuffers {
    pub num_attachments: u32,
}

impl Payload for CmdClearBuffers {
    const OPCODE: Opcode = Opcode::ClearBuffers;

    fn tail_len(&self) -> usize {
        self.num_attachments as usize * std::mem::size_of::<AttachmentClear>()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBindVertexArray {
    pub vao: u32,
}

impl Payload for CmdBindVertexArray {
    const OPCODE: Opcode = Opcode::BindVertexArray;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBindBufferBase {
    pub target: u32,
    pub index: u32,
    pub buffer: u32,
}

impl CmdBindBufferBase {
    pub fn target(&self) -> BufferTarget {
        expect_enum(BufferTarget::from_raw(self.target), "buffer target", self.target)
    }
}

impl Payload for CmdBindBufferBase {
    const OPCODE: Opcode = Opcode::BindBufferBase;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBindBuffersBase {
    pub target: u32,
    pub first: u32,
    pub count: u32,
}

impl CmdBindBuffersBase {
    pub fn target(&self) -> BufferTarget {
        expect_enum(BufferTarget::from_raw(self.target), "buffer target", self.target)
    }
}

impl Payload for CmdBindBuffersBase {
    const OPCODE: Opcode = Opcode::BindBuffersBase;

    fn tail_len(&self) -> usize {
        self.count as usize * std::mem::size_of::<u32>()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBindTexture {
    pub slot: u32,
    pub texture: u32,
}

impl Payload for CmdBindTexture {
    const OPCODE: Opcode = Opcode::BindTexture;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBindSampler {
    pub layer: u32,
    pub sampler: u32,
}

impl Payload for CmdBindSampler {
    const OPCODE: Opcode = Opcode::BindSampler;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBindPipelineState {
    pub pipeline: u32,
}

impl Payload for CmdBindPipelineState {
    const OPCODE: Opcode = Opcode::BindPipelineState;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBindResourceHeap {
    pub heap: u32,
    pub descriptor_set: u32,
}

impl Payload for CmdBindResourceHeap {
    const OPCODE: Opcode = Opcode::BindResourceHeap;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBindRenderTarget {
    pub render_target: u32,
}

impl Payload for CmdBindRenderTarget {
    const OPCODE: Opcode = Opcode::BindRenderTarget;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CmdSetBlendColor {
    pub color: [f32; 4],
}

impl Payload for CmdSetBlendColor {
    const OPCODE: Opcode = Opcode::SetBlendColor;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdSetStencilRef {
    pub reference: i32,
    pub face: u32,
}

impl CmdSetStencilRef {
    pub fn face(&self) -> StencilFace {
        expect_enum(StencilFace::from_raw(self.face), "stencil face", self.face)
    }
}

impl Payload for CmdSetStencilRef {
    const OPCODE: Opcode = Opcode::SetStencilRef;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdSetUniforms {
    pub program: u32,
    pub location: i32,
    pub count: u32,
    pub size: u32,
}

impl Payload for CmdSetUniforms {
    const OPCODE: Opcode = Opcode::SetUniforms;

    fn tail_len(&self) -> usize {
        self.size as usize
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBeginQuery {
    pub query_heap: u32,
    pub query: u32,
}

impl Payload for CmdBeginQuery {
    const OPCODE: Opcode = Opcode::BeginQuery;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdEndQuery {
    pub query_heap: u32,
}

impl Payload for CmdEndQuery {
    const OPCODE: Opcode = Opcode::EndQuery;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdBeginRenderPass {
    pub render_target: u32,
    pub render_pass: u32,
    pub num_clear_values: u32,
}

impl Payload for CmdBeginRenderPass {
    const OPCODE: Opcode = Opcode::BeginRenderPass;

    fn tail_len(&self) -> usize {
        self.num_clear_values as usize * std::mem::size_of::<ClearValue>()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdDrawArrays {
    pub mode: u32,
    pub first: i32,
    pub count: u32,
}

impl CmdDrawArrays {
    pub fn mode(&self) -> PrimitiveTopology {
        expect_enum(PrimitiveTopology::from_raw(self.mode), "topology", self.mode)
    }
}

impl Payload for CmdDrawArrays {
    const OPCODE: Opcode = Opcode::DrawArrays;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdDrawArraysInstanced {
    pub mode: u32,
    pub first: i32,
    pub count: u32,
    pub instance_count: u32,
    pub base_instance: u32,
}

impl CmdDrawArraysInstanced {
    pub fn mode(&self) -> PrimitiveTopology {
        expect_enum(PrimitiveTopology::from_raw(self.mode), "topology", self.mode)
    }
}

impl Payload for CmdDrawArraysInstanced {
    const OPCODE: Opcode = Opcode::DrawArraysInstanced;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdDrawElements {
    /// 索引缓冲区中的字节偏移
    pub offset: u64,
    pub mode: u32,
    pub count: u32,
    pub index_type: u32,
    pub base_vertex: i32,
    pub instance_count: u32,
    pub base_instance: u32,
}

impl CmdDrawElements {
    pub fn mode(&self) -> PrimitiveTopology {
        expect_enum(PrimitiveTopology::from_raw(self.mode), "topology", self.mode)
    }

    pub fn index_type(&self) -> IndexFormat {
        expect_enum(IndexFormat::from_raw(self.index_type), "index format", self.index_type)
    }
}

impl Payload for CmdDrawElements {
    const OPCODE: Opcode = Opcode::DrawElements;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdDrawArraysIndirect {
    pub offset: u64,
    pub buffer: u32,
    pub num_commands: u32,
    pub mode: u32,
    pub stride: u32,
}

impl CmdDrawArraysIndirect {
    pub fn mode(&self) -> PrimitiveTopology {
        expect_enum(PrimitiveTopology::from_raw(self.mode), "topology", self.mode)
    }
}

impl Payload for CmdDrawArraysIndirect {
    const OPCODE: Opcode = Opcode::DrawArraysIndirect;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdDrawElementsIndirect {
    pub offset: u64,
    pub buffer: u32,
    pub num_commands: u32,
    pub mode: u32,
    pub index_type: u32,
    pub stride: u32,
    pub _reserved: u32,
}

impl CmdDrawElementsIndirect {
    pub fn mode(&self) -> PrimitiveTopology {
        expect_enum(PrimitiveTopology::from_raw(self.mode), "topology", self.mode)
    }

    pub fn index_type(&self) -> IndexFormat {
        expect_enum(IndexFormat::from_raw(self.index_type), "index format", self.index_type)
    }
}

impl Payload for CmdDrawElementsIndirect {
    const OPCODE: Opcode = Opcode::DrawElementsIndirect;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdDispatchCompute {
    pub groups: [u32; 3],
}

impl Payload for CmdDispatchCompute {
    const OPCODE: Opcode = Opcode::DispatchCompute;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdDispatchComputeIndirect {
    pub offset: u64,
    pub buffer: u32,
    pub _reserved: u32,
}

impl Payload for CmdDispatchComputeIndirect {
    const OPCODE: Opcode = Opcode::DispatchComputeIndirect;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdPushDebugGroup {
    pub id: u32,
    pub length: u32,
}

impl Payload for CmdPushDebugGroup {
    const OPCODE: Opcode = Opcode::PushDebugGroup;

    fn tail_len(&self) -> usize {
        self.length as usize
    }
}

// ---------------------------------------------------------------------------
// 命令流
// ---------------------------------------------------------------------------

/// 操作码命令流
///
/// 独占一个可增长的字节缓冲区。追加时只在缓冲区增长时分配（摊还），
/// 每条命令本身不产生堆分配。
#[derive(Debug, Clone, Default)]
pub struct OpcodeStream {
    words: Vec<u64>,
    num_records: usize,
}

impl OpcodeStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预留 `bytes` 字节的容量
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            words: Vec::with_capacity(bytes.div_ceil(RECORD_ALIGNMENT)),
            num_records: 0,
        }
    }

    /// 清空命令流，保留已分配的存储
    ///
    /// 之前解码出的所有引用都随之失效（借用检查保证不会跨越 reset 持有）。
    pub fn reset(&mut self) {
        self.words.clear();
        self.num_records = 0;
    }

    /// 已写入的字节数
    pub fn len(&self) -> usize {
        self.words.len() * RECORD_ALIGNMENT
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// 已分配的字节容量
    pub fn capacity(&self) -> usize {
        self.words.capacity() * RECORD_ALIGNMENT
    }

    /// 记录数量
    pub fn num_records(&self) -> usize {
        self.num_records
    }

    /// 整个流的字节视图
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// 追加一条只有记录头的命令
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.alloc_record(opcode, 0, 0);
    }

    /// 追加一条无尾部的命令
    pub fn emit<P: Payload>(&mut self, payload: &P) {
        self.emit_with_tail::<P, u8>(payload, &[]);
    }

    /// 追加一条命令，尾部紧跟在定长载荷之后
    ///
    /// 尾部长度必须与载荷中编码的长度一致。
    pub fn emit_with_tail<P: Payload, T: Pod>(&mut self, payload: &P, tail: &[T]) {
        let tail_bytes: &[u8] = bytemuck::cast_slice(tail);
        assert_eq!(
            payload.tail_len(),
            tail_bytes.len(),
            "tail length does not match the length encoded in {:?}",
            P::OPCODE
        );
        debug_assert_eq!(
            (HEADER_SIZE + std::mem::size_of::<P>()) % std::mem::align_of::<T>(),
            0,
            "tail elements would be misaligned"
        );

        let fixed = std::mem::size_of::<P>();
        let record = self.alloc_record(P::OPCODE, fixed, tail_bytes.len());
        record[HEADER_SIZE..HEADER_SIZE + fixed].copy_from_slice(bytemuck::bytes_of(payload));
        record[HEADER_SIZE + fixed..HEADER_SIZE + fixed + tail_bytes.len()]
            .copy_from_slice(tail_bytes);
    }

    /// 在流末尾分配一条记录（填充为 0）并写入记录头，返回整条记录的字节切片
    fn alloc_record(&mut self, opcode: Opcode, payload_size: usize, tail_len: usize) -> &mut [u8] {
        let span = record_span(payload_size, tail_len);
        let start = self.len();
        self.words.resize(self.words.len() + span / RECORD_ALIGNMENT, 0);
        self.num_records += 1;

        trace!(opcode = opcode.name(), span, "Opcode emitted");

        let header = OpcodeHeader {
            opcode: opcode as u32,
            payload_size: payload_size as u32,
        };
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        let record = &mut bytes[start..start + span];
        record[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        record
    }

    /// 按写入顺序遍历所有记录
    pub fn records(&self) -> Records<'_> {
        Records {
            bytes: self.as_bytes(),
            cursor: 0,
        }
    }
}

/// 记录总长度：记录头 + 载荷 + 尾部，向上对齐到 `RECORD_ALIGNMENT`
fn record_span(payload_size: usize, tail_len: usize) -> usize {
    (HEADER_SIZE + payload_size + tail_len).div_ceil(RECORD_ALIGNMENT) * RECORD_ALIGNMENT
}

/// 解码出的一条记录（借用自命令流）
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub opcode: Opcode,
    payload: &'a [u8],
    tail: &'a [u8],
}

impl<'a> Record<'a> {
    /// 以具体类型借用定长载荷
    pub fn payload<P: Payload>(&self) -> &'a P {
        assert_eq!(self.opcode, P::OPCODE, "payload type does not match opcode");
        bytemuck::from_bytes(self.payload)
    }

    /// 以具体元素类型借用尾部数组
    pub fn tail<T: Pod>(&self) -> &'a [T] {
        bytemuck::cast_slice(self.tail)
    }

    /// 尾部原始字节
    pub fn tail_bytes(&self) -> &'a [u8] {
        self.tail
    }
}

/// 记录迭代器
///
/// 游标从流的起点开始，每次前进 `记录头 + 载荷 + 尾部 + 填充`，到达末尾时结束。
pub struct Records<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Record<'a>> {
        if self.cursor >= self.bytes.len() {
            return None;
        }

        let start = self.cursor;
        assert!(
            start + HEADER_SIZE <= self.bytes.len(),
            "corrupted opcode stream: truncated header at {}",
            start
        );
        let header: &OpcodeHeader = bytemuck::from_bytes(&self.bytes[start..start + HEADER_SIZE]);
        let opcode = expect_enum(Opcode::from_raw(header.opcode), "opcode", header.opcode);

        let payload_start = start + HEADER_SIZE;
        let payload_end = payload_start + header.payload_size as usize;
        assert!(
            payload_end <= self.bytes.len(),
            "corrupted opcode stream: truncated {:?} payload",
            opcode
        );
        let payload = &self.bytes[payload_start..payload_end];

        let tail_end = payload_end + opcode.tail_len(payload);
        assert!(
            tail_end <= self.bytes.len(),
            "corrupted opcode stream: truncated {:?} tail",
            opcode
        );
        let tail = &self.bytes[payload_end..tail_end];

        self.cursor = start + record_span(payload.len(), tail.len());

        Some(Record {
            opcode,
            payload,
            tail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER_SIZE, 8);
        assert_eq!(std::mem::size_of::<CmdDrawElements>(), 32);
        assert_eq!(std::mem::size_of::<CmdDrawElementsIndirect>(), 32);
        assert_eq!(std::mem::size_of::<AttachmentClear>(), 32);
    }

    #[test]
    fn test_records_are_aligned() {
        let mut stream = OpcodeStream::new();
        stream.emit(&CmdClearStencil { stencil: 7 });
        stream.emit_with_tail(
            &CmdPushDebugGroup { id: 1, length: 5 },
            "frame".as_bytes(),
        );
        stream.emit_opcode(Opcode::PopDebugGroup);

        assert_eq!(stream.num_records(), 3);
        assert_eq!(stream.len() % RECORD_ALIGNMENT, 0);
        // 8 + 4 -> 16；8 + 8 + 5 -> 24；8 -> 8
        assert_eq!(stream.len(), 16 + 24 + 8);
    }

    #[test]
    fn test_viewport_array_tail() {
        let viewports: Vec<Viewport> = (0..5)
            .map(|i| Viewport::new(i as f32 * 10.0, 0.0, 100.0, 50.0))
            .collect();

        let mut stream = OpcodeStream::new();
        stream.emit_with_tail(&CmdViewportArray { first: 2, count: 5 }, &viewports);
        stream.emit(&CmdClear { flags: ClearFlags::COLOR.bits() });

        let mut records = stream.records();
        let record = records.next().unwrap();
        assert_eq!(record.opcode, Opcode::ViewportArray);
        let cmd: &CmdViewportArray = record.payload();
        assert_eq!(cmd.first, 2);
        assert_eq!(record.tail::<Viewport>(), viewports.as_slice());

        let record = records.next().unwrap();
        assert_eq!(record.opcode, Opcode::Clear);
        assert_eq!(record.payload::<CmdClear>().clear_flags(), ClearFlags::COLOR);
        assert!(records.next().is_none());
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut stream = OpcodeStream::with_capacity(256);
        for i in 0..8 {
            stream.emit(&CmdBindTexture { slot: i, texture: 100 + i });
        }
        let capacity = stream.capacity();
        assert!(capacity >= stream.len());

        stream.reset();
        assert!(stream.is_empty());
        assert_eq!(stream.num_records(), 0);
        assert_eq!(stream.capacity(), capacity);
        assert!(stream.records().next().is_none());

        // 重复 reset 与一次等价
        stream.reset();
        assert!(stream.is_empty());
        assert_eq!(stream.capacity(), capacity);
    }

    #[test]
    #[should_panic(expected = "tail length")]
    fn test_mismatched_tail_is_rejected() {
        let mut stream = OpcodeStream::new();
        stream.emit_with_tail(&CmdBindBuffersBase { target: 0, first: 0, count: 3 }, &[1u32, 2]);
    }

    #[test]
    fn test_opcode_from_raw() {
        assert_eq!(Opcode::from_raw(30), Some(Opcode::DrawArrays));
        assert_eq!(Opcode::from_raw(0), None);
        assert_eq!(Opcode::from_raw(999), None);
        assert_eq!(Opcode::Execute.name(), "Execute");
    }

    #[test]
    fn test_clear_flags() {
        let flags = ClearFlags::COLOR | ClearFlags::STENCIL;
        assert!(flags.contains(ClearFlags::COLOR));
        assert!(!flags.contains(ClearFlags::DEPTH));
        assert!(ClearFlags::ALL.contains(flags));
    }
}
