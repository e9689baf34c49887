//! 暂存缓冲池模块
//!
//! 负责 CPU 与 GPU 之间的数据搬运：
//!
//! - `write_staged`：批量写入，数据先写进池中的暂存块，再复制到目标资源
//! - `write_immediate`：一次性写入，经由全局上传缓冲区
//! - `read_subresource_region`：同步回读，经由全局回读缓冲区
//! - `map_feedback_buffer` / `unmap_feedback_buffer`：同步回读后直接暴露回读缓冲区
//! - `map_upload_buffer` / `unmap_upload_buffer`：直接写上传缓冲区，取消映射时复制到目标
//!
//! # 块选择
//!
//! 扫描索引在一个录制周期内单调不减：被跳过的块在 `reset` 之前不会再被访问，
//! 一帧内所有写入的扫描总成本摊还为 O(块数)。没有合适的块时分配一个
//! `max(chunk_size, 请求大小)` 的新块。
//!
//! # 全局缓冲区增长
//!
//! 全局上传/回读缓冲区只在请求的对齐大小超过当前容量时重新分配，
//! 新容量就是请求大小向上对齐到 `min_global_alignment`（默认 4096），不做额外的超量分配。
//!
//! # 错误
//!
//! 所有操作原样返回后端的原生错误，不做包装也不重试。失败的写入不会推进任何游标。

use std::ops::Range;

use crate::{engine_debug, engine_warn};

use crate::core::config::StagingConfig;
use crate::gfx::backend::{Backend, CommandContext, CommandQueue, NativeBuffer};
use crate::renderer::resource::{align_up, HeapType, StagingBuffer};
use crate::renderer::state::{with_transition, GpuResource, ResourceState};

/// 默认暂存块大小
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024;

/// 全局缓冲区分配时的默认最小对齐
pub const DEFAULT_MIN_GLOBAL_ALIGNMENT: u64 = 4096;

/// 暂存池统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingStats {
    /// 分配的暂存块数量
    pub chunk_allocations: u64,
    /// 全局上传缓冲区的分配次数
    pub upload_allocations: u64,
    /// 全局回读缓冲区的分配次数
    pub readback_allocations: u64,
    /// 成功的暂存写入次数
    pub staged_writes: u64,
    /// 成功暂存的字节数
    pub staged_bytes: u64,
    /// 成功的立即写入次数
    pub immediate_writes: u64,
    /// 同步回读次数（含反馈映射）
    pub readbacks: u64,
    /// reset 次数
    pub resets: u64,
}

/// 暂存缓冲池
///
/// 每个录制上下文独占一个，池本身不做内部加锁。
pub struct StagingBufferPool<B: Backend> {
    device: B::Device,
    chunks: Vec<StagingBuffer<B>>,
    chunk_idx: usize,
    chunk_size: u64,
    min_global_alignment: u64,
    global_upload: Option<StagingBuffer<B>>,
    global_readback: Option<StagingBuffer<B>>,
    upload_mapped: bool,
    feedback_mapped: bool,
    stats: StagingStats,
}

impl<B: Backend> StagingBufferPool<B> {
    /// 创建暂存池，此时不分配任何缓冲区
    pub fn new(device: B::Device, chunk_size: u64) -> Self {
        Self {
            device,
            chunks: Vec::new(),
            chunk_idx: 0,
            chunk_size,
            min_global_alignment: DEFAULT_MIN_GLOBAL_ALIGNMENT,
            global_upload: None,
            global_readback: None,
            upload_mapped: false,
            feedback_mapped: false,
            stats: StagingStats::default(),
        }
    }

    /// 从配置创建
    pub fn from_config(device: B::Device, config: &StagingConfig) -> Self {
        let mut pool = Self::new(device, config.chunk_size);
        pool.min_global_alignment = config.min_global_alignment;
        pool
    }

    /// 开始新的录制周期：所有块的游标归零，扫描索引回到 0
    ///
    /// 已分配的块全部保留复用。连续调用两次与调用一次等价。
    pub fn reset(&mut self) {
        for chunk in &mut self.chunks {
            chunk.reset();
        }
        self.chunk_idx = 0;
        self.stats.resets += 1;
        engine_debug!(chunks = self.chunks.len(), "Staging pool reset");
    }

    /// 通过暂存块把数据写入 `dst[dst_offset..]`
    ///
    /// 复制期间目标处于 `CopyDest`，结束后恢复原状态。
    pub fn write_staged(
        &mut self,
        context: &mut B::CommandContext,
        dst: &mut GpuResource<B>,
        dst_offset: u64,
        data: &[u8],
    ) -> Result<(), B::Error> {
        if data.is_empty() {
            return Ok(());
        }
        let size = data.len() as u64;

        while self.chunk_idx < self.chunks.len() && !self.chunks[self.chunk_idx].capacity(size) {
            self.chunk_idx += 1;
        }
        if self.chunk_idx == self.chunks.len() {
            self.alloc_chunk(size)?;
        }

        let chunk = &mut self.chunks[self.chunk_idx];
        let result = with_transition::<B, _, _>(
            context,
            dst,
            ResourceState::CopyDest,
            |context, dst| chunk.write_and_increment_offset(context, dst.native_mut(), dst_offset, data),
        );

        match &result {
            Ok(()) => {
                self.stats.staged_writes += 1;
                self.stats.staged_bytes += size;
            }
            Err(err) => engine_warn!(error = %err, size, backend = B::NAME, "Staged write failed"),
        }
        result
    }

    /// 通过全局上传缓冲区把数据写入 `dst[dst_offset..]`
    ///
    /// 上传缓冲区在下一次立即写入时会被覆盖。映射期间不能调用。
    pub fn write_immediate(
        &mut self,
        context: &mut B::CommandContext,
        dst: &mut GpuResource<B>,
        dst_offset: u64,
        data: &[u8],
        alignment: u64,
    ) -> Result<(), B::Error> {
        debug_assert!(!self.upload_mapped, "upload buffer is mapped; unmap it before an immediate write");
        if data.is_empty() {
            return Ok(());
        }

        let upload = grow_buffer(
            &self.device,
            &mut self.global_upload,
            HeapType::Upload,
            data.len() as u64,
            alignment,
            self.min_global_alignment,
            &mut self.stats.upload_allocations,
        )?;

        let result = with_transition::<B, _, _>(
            context,
            dst,
            ResourceState::CopyDest,
            |context, dst| upload.write(context, dst.native_mut(), dst_offset, data),
        );

        match &result {
            Ok(()) => self.stats.immediate_writes += 1,
            Err(err) => engine_warn!(error = %err, backend = B::NAME, "Immediate write failed"),
        }
        result
    }

    /// 同步读取 `src[src_offset..src_offset + out.len()]` 到 `out`
    ///
    /// 会提交命令上下文并阻塞等待 GPU 完成，然后映射全局回读缓冲区。
    pub fn read_subresource_region(
        &mut self,
        context: &mut B::CommandContext,
        queue: &mut B::CommandQueue,
        src: &mut GpuResource<B>,
        src_offset: u64,
        out: &mut [u8],
        alignment: u64,
    ) -> Result<(), B::Error> {
        if out.is_empty() {
            return Ok(());
        }
        let size = out.len() as u64;

        let readback = grow_buffer(
            &self.device,
            &mut self.global_readback,
            HeapType::Readback,
            size,
            alignment,
            self.min_global_alignment,
            &mut self.stats.readback_allocations,
        )?;

        with_transition::<B, _, _>(context, src, ResourceState::CopySource, |context, src| {
            context.copy_buffer_region(readback.native_mut(), 0, src.native(), src_offset, size)
        });
        queue.finish_and_submit_command_context(context, true)?;

        let native = readback.native_mut();
        let mapped = native.map(0..size)?;
        out.copy_from_slice(&mapped[..out.len()]);
        native.unmap(0..0);

        self.stats.readbacks += 1;
        Ok(())
    }

    /// 同步复制 `src[range]` 到回读缓冲区并映射，返回的切片长度为 `range` 的长度
    ///
    /// 使用完后必须调用 `unmap_feedback_buffer`。
    pub fn map_feedback_buffer(
        &mut self,
        context: &mut B::CommandContext,
        queue: &mut B::CommandQueue,
        src: &mut GpuResource<B>,
        range: Range<u64>,
    ) -> Result<&[u8], B::Error> {
        assert!(range.start <= range.end, "invalid feedback range {:?}", range);
        debug_assert!(!self.feedback_mapped, "feedback buffer is already mapped");
        let num_bytes = range.end - range.start;

        let readback = grow_buffer(
            &self.device,
            &mut self.global_readback,
            HeapType::Readback,
            num_bytes,
            1,
            self.min_global_alignment,
            &mut self.stats.readback_allocations,
        )?;

        with_transition::<B, _, _>(context, src, ResourceState::CopySource, |context, src| {
            context.copy_buffer_region(readback.native_mut(), 0, src.native(), range.start, num_bytes)
        });
        queue.finish_and_submit_command_context(context, true)?;

        let mapped = readback.native_mut().map(0..num_bytes)?;
        self.feedback_mapped = true;
        self.stats.readbacks += 1;
        Ok(&mapped[..num_bytes as usize])
    }

    /// 取消反馈缓冲区的映射（不带写入范围）
    pub fn unmap_feedback_buffer(&mut self) {
        debug_assert!(self.feedback_mapped, "feedback buffer is not mapped");
        if let Some(readback) = self.global_readback.as_mut() {
            readback.native_mut().unmap(0..0);
        }
        self.feedback_mapped = false;
    }

    /// 映射全局上传缓冲区，返回 `size` 字节的可写切片
    ///
    /// 切片的第 0 字节对应 `unmap_upload_buffer` 中 `written_range.start` 处的目标字节。
    pub fn map_upload_buffer(&mut self, size: u64) -> Result<&mut [u8], B::Error> {
        debug_assert!(!self.upload_mapped, "upload buffer is already mapped");

        let upload = grow_buffer(
            &self.device,
            &mut self.global_upload,
            HeapType::Upload,
            size,
            1,
            self.min_global_alignment,
            &mut self.stats.upload_allocations,
        )?;

        let mapped = upload.native_mut().map(0..0)?;
        self.upload_mapped = true;
        Ok(&mut mapped[..size as usize])
    }

    /// 提交上传缓冲区中写入的内容，并复制到 `dst[written_range]`
    ///
    /// 状态转换只包围最后的复制命令。复制提交后不等待 GPU 完成。
    pub fn unmap_upload_buffer(
        &mut self,
        context: &mut B::CommandContext,
        queue: &mut B::CommandQueue,
        dst: &mut GpuResource<B>,
        written_range: Range<u64>,
    ) -> Result<(), B::Error> {
        assert!(
            written_range.start <= written_range.end,
            "invalid written range {:?}",
            written_range
        );
        let upload = match self.global_upload.as_mut() {
            Some(upload) if self.upload_mapped => upload,
            _ => panic!("unmap_upload_buffer called without a matching map_upload_buffer"),
        };
        self.upload_mapped = false;

        let num_bytes = written_range.end - written_range.start;
        upload.native_mut().unmap(0..num_bytes);

        if num_bytes > 0 {
            with_transition::<B, _, _>(context, dst, ResourceState::CopyDest, |context, dst| {
                context.copy_buffer_region(
                    dst.native_mut(),
                    written_range.start,
                    upload.native(),
                    0,
                    num_bytes,
                )
            });
        }
        queue.finish_and_submit_command_context(context, false)
    }

    /// 默认块大小
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// 已分配的块数量
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// 当前扫描索引
    pub fn chunk_index(&self) -> usize {
        self.chunk_idx
    }

    /// 所有块（用于查看每个块的容量和游标）
    pub fn chunks(&self) -> &[StagingBuffer<B>] {
        &self.chunks
    }

    /// 全局上传缓冲区的容量，尚未分配时为 0
    pub fn upload_capacity(&self) -> u64 {
        self.global_upload.as_ref().map_or(0, StagingBuffer::size)
    }

    /// 全局回读缓冲区的容量，尚未分配时为 0
    pub fn readback_capacity(&self) -> u64 {
        self.global_readback.as_ref().map_or(0, StagingBuffer::size)
    }

    pub fn stats(&self) -> StagingStats {
        self.stats
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    fn alloc_chunk(&mut self, min_size: u64) -> Result<(), B::Error> {
        let size = self.chunk_size.max(min_size);
        let chunk = StagingBuffer::new(&self.device, size, 1, HeapType::Upload)?;
        self.chunks.push(chunk);
        self.chunk_idx = self.chunks.len() - 1;
        self.stats.chunk_allocations += 1;
        engine_debug!(
            index = self.chunk_idx,
            size,
            backend = B::NAME,
            "Staging chunk allocated"
        );
        Ok(())
    }
}

impl<B: Backend> std::fmt::Debug for StagingBufferPool<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBufferPool")
            .field("chunks", &self.chunks)
            .field("chunk_idx", &self.chunk_idx)
            .field("chunk_size", &self.chunk_size)
            .field("upload_capacity", &self.upload_capacity())
            .field("readback_capacity", &self.readback_capacity())
            .finish()
    }
}

/// 返回全局缓冲区，必要时重新分配
///
/// 分配失败时保留原来的缓冲区。
fn grow_buffer<'a, B: Backend>(
    device: &B::Device,
    slot: &'a mut Option<StagingBuffer<B>>,
    heap_type: HeapType,
    size: u64,
    alignment: u64,
    min_alignment: u64,
    allocations: &mut u64,
) -> Result<&'a mut StagingBuffer<B>, B::Error> {
    let aligned_size = align_up(size, alignment);

    match slot.take() {
        Some(buffer) if buffer.capacity(aligned_size) => Ok(slot.insert(buffer)),
        old => match StagingBuffer::new(device, aligned_size, min_alignment, heap_type) {
            Ok(buffer) => {
                *allocations += 1;
                engine_debug!(
                    ?heap_type,
                    size = buffer.size(),
                    previous = old.as_ref().map_or(0, StagingBuffer::size),
                    "Global staging buffer resized"
                );
                Ok(slot.insert(buffer))
            }
            Err(err) => {
                engine_warn!(error = %err, ?heap_type, size = aligned_size, "Global staging buffer allocation failed");
                *slot = old;
                Err(err)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::Device;
    use crate::gfx::soft::{Soft, SoftCommandContext, SoftCommandQueue, SoftDevice};
    use crate::renderer::resource::{BufferDescriptor, BufferUsageType};

    fn setup(chunk_size: u64) -> (SoftDevice, SoftCommandContext, StagingBufferPool<Soft>) {
        let device = SoftDevice::new();
        let pool = StagingBufferPool::new(device.clone(), chunk_size);
        (device, SoftCommandContext::new(), pool)
    }

    fn storage(device: &SoftDevice, size: u64, state: ResourceState) -> GpuResource<Soft> {
        device
            .create_resource(
                &BufferDescriptor::device_local(size, BufferUsageType::Storage),
                state,
            )
            .unwrap()
    }

    fn cursors(pool: &StagingBufferPool<Soft>) -> Vec<u64> {
        pool.chunks().iter().map(StagingBuffer::offset).collect()
    }

    #[test]
    fn test_chunk_selection_scenario() {
        let (device, mut context, mut pool) = setup(1024);
        let mut dst = storage(&device, 4096, ResourceState::ShaderResource);

        pool.write_staged(&mut context, &mut dst, 0, &[1; 600]).unwrap();
        assert_eq!(pool.chunk_index(), 0);
        assert_eq!(cursors(&pool), vec![600]);

        pool.write_staged(&mut context, &mut dst, 600, &[2; 600]).unwrap();
        assert_eq!(pool.chunk_index(), 1);
        assert_eq!(cursors(&pool), vec![600, 600]);

        pool.write_staged(&mut context, &mut dst, 1200, &[3; 300]).unwrap();
        assert_eq!(pool.chunk_index(), 1);
        assert_eq!(cursors(&pool), vec![600, 900]);

        pool.reset();
        pool.write_staged(&mut context, &mut dst, 0, &[4; 1024]).unwrap();
        assert_eq!(pool.chunk_index(), 0);
        assert_eq!(cursors(&pool), vec![1024, 0]);
        assert_eq!(pool.stats().chunk_allocations, 2);

        let contents = dst.native().contents();
        assert!(contents[..1024].iter().all(|&b| b == 4));
        assert!(contents[1024..1200].iter().all(|&b| b == 2));
        assert!(contents[1200..1500].iter().all(|&b| b == 3));
    }

    #[test]
    fn test_chunk_index_is_monotonic() {
        let (device, mut context, mut pool) = setup(256);
        let mut dst = storage(&device, 8192, ResourceState::Common);

        let mut last = 0;
        for size in [200usize, 100, 60, 250, 10, 300, 5, 256] {
            pool.write_staged(&mut context, &mut dst, 0, &vec![0xAB; size]).unwrap();
            assert!(pool.chunk_index() >= last);
            last = pool.chunk_index();
            for chunk in pool.chunks() {
                assert!(chunk.offset() <= chunk.size());
            }
        }
        // 10 字节本可放进块 0，但被跳过的块在 reset 前不会再用
        assert_eq!(pool.chunks()[0].offset(), 200);
    }

    #[test]
    fn test_oversized_write_allocates_one_chunk() {
        let (device, mut context, mut pool) = setup(1024);
        let mut dst = storage(&device, 8192, ResourceState::Common);

        pool.write_staged(&mut context, &mut dst, 0, &[7; 100]).unwrap();
        pool.write_staged(&mut context, &mut dst, 0, &[8; 5000]).unwrap();

        assert_eq!(pool.chunk_count(), 2);
        assert!(pool.chunks()[1].size() >= 5000);
        assert_eq!(pool.chunks()[1].offset(), 5000);
        assert_eq!(device.allocation_count(), 3);
    }

    #[test]
    fn test_write_staged_restores_state() {
        let (device, mut context, mut pool) = setup(1024);
        let mut dst = storage(&device, 1024, ResourceState::VertexAndConstantBuffer);

        pool.write_staged(&mut context, &mut dst, 0, &[1; 16]).unwrap();
        assert_eq!(dst.current_state(), ResourceState::VertexAndConstantBuffer);

        pool.write_staged(&mut context, &mut dst, 16, &[2; 16]).unwrap();
        assert_eq!(dst.current_state(), ResourceState::VertexAndConstantBuffer);

        // 第二次写入的 CopyDest 转换与待提交的恢复转换抵消
        assert_eq!(context.barriers().len(), 1);
        assert_eq!(context.copies().len(), 2);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let (device, mut context, mut pool) = setup(512);
        let mut dst = storage(&device, 2048, ResourceState::Common);

        pool.write_staged(&mut context, &mut dst, 0, &[1; 400]).unwrap();
        pool.write_staged(&mut context, &mut dst, 0, &[1; 400]).unwrap();

        pool.reset();
        let once = (pool.chunk_index(), cursors(&pool));
        pool.reset();
        assert_eq!((pool.chunk_index(), cursors(&pool)), once);
        assert_eq!(pool.chunk_count(), 2);
    }

    #[test]
    fn test_failed_write_does_not_advance_cursor() {
        let (device, mut context, mut pool) = setup(1024);
        let mut dst = storage(&device, 1024, ResourceState::IndexBuffer);

        pool.write_staged(&mut context, &mut dst, 0, &[1; 100]).unwrap();

        device.inject_map_failure();
        assert!(pool.write_staged(&mut context, &mut dst, 100, &[2; 100]).is_err());
        assert_eq!(cursors(&pool), vec![100]);
        assert_eq!(dst.current_state(), ResourceState::IndexBuffer);

        pool.write_staged(&mut context, &mut dst, 100, &[3; 100]).unwrap();
        assert_eq!(cursors(&pool), vec![200]);
        assert_eq!(pool.stats().staged_writes, 2);
    }

    #[test]
    fn test_chunk_allocation_failure_propagates() {
        let (device, mut context, mut pool) = setup(1024);
        let mut dst = storage(&device, 1024, ResourceState::Common);

        device.inject_allocation_failure();
        assert!(pool.write_staged(&mut context, &mut dst, 0, &[1; 10]).is_err());
        assert_eq!(pool.chunk_count(), 0);

        pool.write_staged(&mut context, &mut dst, 0, &[1; 10]).unwrap();
        assert_eq!(pool.chunk_count(), 1);
    }

    #[test]
    fn test_singleton_growth() {
        let (device, mut context, mut pool) = setup(1024);
        let mut dst = storage(&device, 16384, ResourceState::Common);

        pool.write_immediate(&mut context, &mut dst, 0, &[5; 5000], 1).unwrap();
        assert_eq!(pool.upload_capacity(), 8192);
        pool.write_immediate(&mut context, &mut dst, 0, &[6; 3000], 256).unwrap();
        pool.write_immediate(&mut context, &mut dst, 100, &[7; 8192], 1).unwrap();
        assert_eq!(pool.upload_capacity(), 8192);
        assert_eq!(pool.stats().upload_allocations, 1);

        pool.write_immediate(&mut context, &mut dst, 0, &[8; 8193], 1).unwrap();
        assert_eq!(pool.upload_capacity(), 12288);
        assert_eq!(pool.stats().upload_allocations, 2);
        assert_eq!(dst.current_state(), ResourceState::Common);
    }

    #[test]
    fn test_singleton_growth_failure_keeps_old_buffer() {
        let (device, mut context, mut pool) = setup(1024);
        let mut dst = storage(&device, 16384, ResourceState::Common);

        pool.write_immediate(&mut context, &mut dst, 0, &[1; 100], 4).unwrap();
        device.inject_allocation_failure();
        assert!(pool
            .write_immediate(&mut context, &mut dst, 0, &[2; 5000], 4)
            .is_err());
        assert_eq!(pool.upload_capacity(), 4096);

        pool.write_immediate(&mut context, &mut dst, 0, &[3; 64], 4).unwrap();
        assert_eq!(&dst.native().contents()[..64], &[3; 64]);
    }

    #[test]
    fn test_read_subresource_region() {
        let (device, mut context, mut pool) = setup(1024);
        let mut queue = SoftCommandQueue::new(&device);
        let mut src = storage(&device, 256, ResourceState::UnorderedAccess);
        let pattern: Vec<u8> = (0..=255).collect();
        src.native_mut().contents_mut().copy_from_slice(&pattern);

        let mut out = [0u8; 32];
        pool.read_subresource_region(&mut context, &mut queue, &mut src, 64, &mut out, 4)
            .unwrap();

        assert_eq!(&out[..], &pattern[64..96]);
        assert_eq!(src.current_state(), ResourceState::UnorderedAccess);
        assert_eq!(queue.submissions(), 1);
        assert_eq!(queue.waits(), 1);
        assert_eq!(pool.readback_capacity(), 4096);
    }

    #[test]
    fn test_read_propagates_map_error() {
        let (device, mut context, mut pool) = setup(1024);
        let mut queue = SoftCommandQueue::new(&device);
        let mut src = storage(&device, 64, ResourceState::Common);

        let mut out = [0u8; 16];
        device.inject_map_failure();
        let result =
            pool.read_subresource_region(&mut context, &mut queue, &mut src, 0, &mut out, 1);
        assert!(result.is_err());
        assert_eq!(src.current_state(), ResourceState::Common);
    }

    #[test]
    fn test_feedback_buffer_round_trip() {
        let (device, mut context, mut pool) = setup(1024);
        let mut queue = SoftCommandQueue::new(&device);
        let mut src = storage(&device, 128, ResourceState::ShaderResource);
        src.native_mut().contents_mut()[16..24].copy_from_slice(&[9, 8, 7, 6, 5, 4, 3, 2]);

        let feedback = pool
            .map_feedback_buffer(&mut context, &mut queue, &mut src, 16..24)
            .unwrap();
        assert_eq!(feedback, &[9, 8, 7, 6, 5, 4, 3, 2]);
        pool.unmap_feedback_buffer();

        assert_eq!(src.current_state(), ResourceState::ShaderResource);
        assert_eq!(queue.waits(), 1);
    }

    #[test]
    fn test_upload_buffer_round_trip() {
        let (device, mut context, mut pool) = setup(1024);
        let mut queue = SoftCommandQueue::new(&device);
        let mut dst = storage(&device, 256, ResourceState::IndirectArgument);

        let mapped = pool.map_upload_buffer(8).unwrap();
        mapped.copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        pool.unmap_upload_buffer(&mut context, &mut queue, &mut dst, 32..40)
            .unwrap();

        assert_eq!(&dst.native().contents()[32..40], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(dst.current_state(), ResourceState::IndirectArgument);
        assert_eq!(queue.submissions(), 1);
        assert_eq!(queue.waits(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "upload buffer is mapped")]
    fn test_immediate_write_while_upload_mapped() {
        let (device, mut context, mut pool) = setup(1024);
        let mut dst = storage(&device, 256, ResourceState::Common);

        pool.map_upload_buffer(16).unwrap().fill(0x11);
        let _ = pool.write_immediate(&mut context, &mut dst, 0, &[0x22; 16], 4);
    }

    #[test]
    fn test_from_config() {
        let device = SoftDevice::new();
        let config = StagingConfig {
            chunk_size: 2048,
            min_global_alignment: 256,
        };
        let mut pool = StagingBufferPool::<Soft>::from_config(device.clone(), &config);
        let mut context = SoftCommandContext::new();
        let mut dst = storage(&device, 1024, ResourceState::Common);

        pool.write_immediate(&mut context, &mut dst, 0, &[1; 300], 1).unwrap();
        assert_eq!(pool.upload_capacity(), 512);
        assert_eq!(pool.chunk_size(), 2048);
    }
}
