//! 资源管理模块
//!
//! 提供缓冲区描述信息以及暂存缓冲区（`StagingBuffer`）的实现。
//! 借鉴 DistEngine 的 UploadBuffer 设计。
//!
//! # 暂存缓冲区
//!
//! 暂存缓冲区是一个 CPU 可见的 GPU 缓冲区，带一个写入游标：
//!
//! - 容量检查 `capacity` 是纯谓词，不修改任何状态
//! - 一次写入永远不会跨越两个暂存缓冲区，放不下就由调用方换一个
//! - 游标只在原生写入成功后才前进
//! - 始终满足 `offset <= size`

use tracing::debug;

use crate::gfx::backend::{Backend, CommandContext, Device, NativeBuffer};

/// 常量缓冲区对齐要求（DX12）
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 缓冲区使用类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsageType {
    /// 顶点缓冲区
    Vertex,
    /// 索引缓冲区
    Index,
    /// 常量缓冲区（Uniform Buffer）
    Constant,
    /// 存储缓冲区（Storage Buffer）
    Storage,
    /// 间接绘制参数缓冲区
    Indirect,
    /// 上传缓冲区（CPU -> GPU）
    Upload,
    /// 读回缓冲区（GPU -> CPU）
    ReadBack,
}

/// 缓冲区所在的堆
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// GPU 本地内存（最快，仅 GPU 可访问）
    DeviceLocal,
    /// 上传堆（CPU 写，GPU 读）
    Upload,
    /// 回读堆（GPU 写，CPU 读）
    Readback,
}

impl HeapType {
    /// CPU 是否可以映射
    pub fn is_cpu_visible(&self) -> bool {
        !matches!(self, HeapType::DeviceLocal)
    }
}

/// 缓冲区描述信息
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    /// 缓冲区大小（字节）
    pub size: u64,
    /// 使用类型
    pub usage: BufferUsageType,
    /// 所在堆
    pub heap_type: HeapType,
    /// 调试名称（可选）
    pub name: Option<String>,
}

impl BufferDescriptor {
    /// 创建新的缓冲区描述符
    pub fn new(size: u64, usage: BufferUsageType, heap_type: HeapType) -> Self {
        Self {
            size,
            usage,
            heap_type,
            name: None,
        }
    }

    /// 设备本地缓冲区
    pub fn device_local(size: u64, usage: BufferUsageType) -> Self {
        Self::new(size, usage, HeapType::DeviceLocal)
    }

    /// 上传堆中的暂存缓冲区
    pub fn upload(size: u64) -> Self {
        Self::new(size, BufferUsageType::Upload, HeapType::Upload)
    }

    /// 回读堆中的暂存缓冲区
    pub fn readback(size: u64) -> Self {
        Self::new(size, BufferUsageType::ReadBack, HeapType::Readback)
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 计算对齐后的大小（常量缓冲区要求 256 字节对齐）
    pub fn aligned_size(&self) -> u64 {
        if self.usage == BufferUsageType::Constant {
            align_up(self.size, CONSTANT_BUFFER_ALIGNMENT)
        } else {
            self.size
        }
    }
}

/// 把 `value` 向上取整到 `alignment` 的倍数
///
/// `alignment` 为 0 时按 1 处理；溢出时饱和到最大的对齐值。
pub fn align_up(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    match value.checked_add(alignment - 1) {
        Some(v) => v / alignment * alignment,
        None => u64::MAX / alignment * alignment,
    }
}

/// 暂存缓冲区
///
/// 既用作暂存池中的一个块，也用作全局上传/回读缓冲区（此时游标始终为 0）。
pub struct StagingBuffer<B: Backend> {
    native: B::Buffer,
    size: u64,
    offset: u64,
}

impl<B: Backend> StagingBuffer<B> {
    /// 分配新的暂存缓冲区
    ///
    /// 实际大小为 `size` 向上对齐到 `alignment`。
    pub fn new(
        device: &B::Device,
        size: u64,
        alignment: u64,
        heap_type: HeapType,
    ) -> Result<Self, B::Error> {
        let size = align_up(size, alignment);
        let desc = match heap_type {
            HeapType::Readback => BufferDescriptor::readback(size),
            _ => BufferDescriptor::upload(size),
        }
        .with_name("staging buffer");

        let native = device.create_buffer(&desc)?;
        debug!(size, ?heap_type, backend = B::NAME, "Staging buffer allocated");

        Ok(Self {
            native,
            size,
            offset: 0,
        })
    }

    /// 游标归零，复用已有分配
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// 剩余空间是否能容纳 `data_size` 字节
    pub fn capacity(&self, data_size: u64) -> bool {
        self.offset
            .checked_add(data_size)
            .map_or(false, |end| end <= self.size)
    }

    /// 总容量
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 当前写入游标
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 剩余字节数
    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }

    pub fn native(&self) -> &B::Buffer {
        &self.native
    }

    pub fn native_mut(&mut self) -> &mut B::Buffer {
        &mut self.native
    }

    /// 在当前游标处写入数据并记录一次到 `dst` 的复制，游标不变
    pub fn write(
        &mut self,
        context: &mut B::CommandContext,
        dst: &mut B::Buffer,
        dst_offset: u64,
        data: &[u8],
    ) -> Result<(), B::Error> {
        let len = data.len() as u64;
        assert!(self.capacity(len), "staging write exceeds remaining capacity");

        let start = self.offset as usize;
        let mapped = self.native.map(0..0)?;
        mapped[start..start + data.len()].copy_from_slice(data);
        self.native.unmap(self.offset..self.offset + len);

        context.copy_buffer_region(dst, dst_offset, &self.native, self.offset, len);
        Ok(())
    }

    /// 写入数据、记录复制，成功后游标前进
    pub fn write_and_increment_offset(
        &mut self,
        context: &mut B::CommandContext,
        dst: &mut B::Buffer,
        dst_offset: u64,
        data: &[u8],
    ) -> Result<(), B::Error> {
        self.write(context, dst, dst_offset, data)?;
        self.offset += data.len() as u64;
        Ok(())
    }
}

impl<B: Backend> std::fmt::Debug for StagingBuffer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("handle", &self.native.handle())
            .field("size", &self.size)
            .field("offset", &self.offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::soft::{Soft, SoftCommandContext, SoftDevice};
    use crate::renderer::state::ResourceState;

    #[test]
    fn test_buffer_descriptor_alignment() {
        let desc = BufferDescriptor::device_local(100, BufferUsageType::Constant);
        assert_eq!(desc.aligned_size(), 256);

        let desc2 = BufferDescriptor::device_local(300, BufferUsageType::Constant);
        assert_eq!(desc2.aligned_size(), 512);

        let desc3 = BufferDescriptor::device_local(100, BufferUsageType::Vertex);
        assert_eq!(desc3.aligned_size(), 100);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
        assert_eq!(align_up(7, 0), 7);
        assert_eq!(align_up(u64::MAX, 256), u64::MAX / 256 * 256);
    }

    #[test]
    fn test_capacity_is_pure_predicate() {
        let device = SoftDevice::new();
        let chunk = StagingBuffer::<Soft>::new(&device, 1024, 1, HeapType::Upload).unwrap();

        assert!(chunk.capacity(1024));
        assert!(!chunk.capacity(1025));
        assert!(!chunk.capacity(u64::MAX));
        assert_eq!(chunk.offset(), 0);
    }

    #[test]
    fn test_write_and_increment_offset() {
        let device = SoftDevice::new();
        let mut context = SoftCommandContext::new();
        let mut chunk = StagingBuffer::<Soft>::new(&device, 64, 1, HeapType::Upload).unwrap();
        let mut dst = device
            .create_resource(
                &BufferDescriptor::device_local(64, BufferUsageType::Storage),
                ResourceState::CopyDest,
            )
            .unwrap();

        chunk
            .write_and_increment_offset(&mut context, dst.native_mut(), 8, &[1, 2, 3, 4])
            .unwrap();
        assert_eq!(chunk.offset(), 4);
        assert_eq!(chunk.remaining(), 60);
        assert_eq!(&dst.native().contents()[8..12], &[1, 2, 3, 4]);

        chunk.reset();
        assert_eq!(chunk.offset(), 0);
    }

    #[test]
    fn test_failed_write_keeps_offset() {
        let device = SoftDevice::new();
        let mut context = SoftCommandContext::new();
        let mut chunk = StagingBuffer::<Soft>::new(&device, 64, 1, HeapType::Upload).unwrap();
        let mut dst = device
            .create_buffer(&BufferDescriptor::device_local(64, BufferUsageType::Storage))
            .unwrap();

        device.inject_map_failure();
        assert!(chunk
            .write_and_increment_offset(&mut context, &mut dst, 0, &[9; 16])
            .is_err());
        assert_eq!(chunk.offset(), 0);
        assert!(context.copies().is_empty());
    }
}
