//! soft 后端的设备和缓冲区
//!
//! 缓冲区内存直接分配在主机内存中。设备支持故障注入，
//! 用来验证原生错误在暂存路径上的传播。

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::context::{SoftCommandContext, SoftCommandQueue};
use crate::gfx::backend::{Backend, Device, NativeBuffer, NativeHandle};
use crate::renderer::resource::{BufferDescriptor, HeapType};

/// soft 后端标记类型
#[derive(Debug, Clone, Copy)]
pub enum Soft {}

impl Backend for Soft {
    const NAME: &'static str = "soft";

    type Error = SoftError;
    type Buffer = SoftBuffer;
    type Device = SoftDevice;
    type CommandContext = SoftCommandContext;
    type CommandQueue = SoftCommandQueue;
}

/// soft 后端的原生错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftError {
    /// 分配失败
    OutOfMemory { requested: u64 },
    /// 映射失败
    MapFailed(NativeHandle),
    /// 缓冲区不在 CPU 可见的堆中
    NotMappable(NativeHandle),
    /// 设备丢失
    DeviceLost,
}

impl fmt::Display for SoftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftError::OutOfMemory { requested } => {
                write!(f, "out of device memory ({} bytes requested)", requested)
            }
            SoftError::MapFailed(handle) => write!(f, "failed to map buffer {}", handle.0),
            SoftError::NotMappable(handle) => {
                write!(f, "buffer {} is not in a CPU-visible heap", handle.0)
            }
            SoftError::DeviceLost => write!(f, "device lost"),
        }
    }
}

impl std::error::Error for SoftError {}

#[derive(Debug, Default)]
struct DeviceShared {
    next_handle: AtomicU64,
    allocations: AtomicU64,
    allocated_bytes: AtomicU64,
    memory_budget: Option<u64>,
    fail_next_allocation: AtomicBool,
    fail_next_map: AtomicBool,
    device_lost: AtomicBool,
}

/// soft 设备
///
/// 克隆出的设备共享同一份状态（句柄计数、内存统计、故障注入）。
#[derive(Debug, Clone, Default)]
pub struct SoftDevice {
    shared: Arc<DeviceShared>,
}

impl SoftDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// 限制设备内存总量，超出时分配返回 `OutOfMemory`
    pub fn with_memory_budget(bytes: u64) -> Self {
        Self {
            shared: Arc::new(DeviceShared {
                memory_budget: Some(bytes),
                ..DeviceShared::default()
            }),
        }
    }

    /// 累计创建的缓冲区数量
    pub fn allocation_count(&self) -> u64 {
        self.shared.allocations.load(Ordering::Relaxed)
    }

    /// 当前存活缓冲区占用的字节数
    pub fn allocated_bytes(&self) -> u64 {
        self.shared.allocated_bytes.load(Ordering::Relaxed)
    }

    /// 让下一次缓冲区分配失败
    pub fn inject_allocation_failure(&self) {
        self.shared.fail_next_allocation.store(true, Ordering::Relaxed);
    }

    /// 让下一次映射失败
    pub fn inject_map_failure(&self) {
        self.shared.fail_next_map.store(true, Ordering::Relaxed);
    }

    /// 模拟设备丢失：之后的映射和提交都会失败
    pub fn lose_device(&self) {
        self.shared.device_lost.store(true, Ordering::Relaxed);
    }

    pub fn is_lost(&self) -> bool {
        self.shared.device_lost.load(Ordering::Relaxed)
    }
}

impl Device<Soft> for SoftDevice {
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<SoftBuffer, SoftError> {
        let size = desc.aligned_size();
        let shared = &self.shared;

        if self.is_lost() {
            return Err(SoftError::DeviceLost);
        }
        if shared.fail_next_allocation.swap(false, Ordering::Relaxed) {
            return Err(SoftError::OutOfMemory { requested: size });
        }
        if let Some(budget) = shared.memory_budget {
            if shared.allocated_bytes.load(Ordering::Relaxed) + size > budget {
                return Err(SoftError::OutOfMemory { requested: size });
            }
        }

        let handle = NativeHandle(shared.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        shared.allocations.fetch_add(1, Ordering::Relaxed);
        shared.allocated_bytes.fetch_add(size, Ordering::Relaxed);
        trace!(handle = handle.0, size, heap = ?desc.heap_type, name = ?desc.name, "Soft buffer created");

        Ok(SoftBuffer {
            handle,
            heap_type: desc.heap_type,
            memory: vec![0; size as usize],
            mapped: false,
            shared: Arc::clone(shared),
        })
    }
}

/// soft 缓冲区
pub struct SoftBuffer {
    handle: NativeHandle,
    heap_type: HeapType,
    memory: Vec<u8>,
    mapped: bool,
    shared: Arc<DeviceShared>,
}

impl SoftBuffer {
    /// 缓冲区内容（相当于 GPU 视角的内存）
    pub fn contents(&self) -> &[u8] {
        &self.memory
    }

    pub fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}

impl NativeBuffer for SoftBuffer {
    type Error = SoftError;

    fn handle(&self) -> NativeHandle {
        self.handle
    }

    fn size(&self) -> u64 {
        self.memory.len() as u64
    }

    fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    fn map(&mut self, read_range: Range<u64>) -> Result<&mut [u8], SoftError> {
        if !self.heap_type.is_cpu_visible() {
            return Err(SoftError::NotMappable(self.handle));
        }
        if self.shared.device_lost.load(Ordering::Relaxed) {
            return Err(SoftError::DeviceLost);
        }
        if self.shared.fail_next_map.swap(false, Ordering::Relaxed) {
            return Err(SoftError::MapFailed(self.handle));
        }
        assert!(read_range.end <= self.size(), "read range exceeds buffer size");

        self.mapped = true;
        Ok(&mut self.memory)
    }

    fn unmap(&mut self, written_range: Range<u64>) {
        assert!(written_range.end <= self.size(), "written range exceeds buffer size");
        self.mapped = false;
    }
}

impl Drop for SoftBuffer {
    fn drop(&mut self) {
        self.shared
            .allocated_bytes
            .fetch_sub(self.memory.len() as u64, Ordering::Relaxed);
    }
}

impl fmt::Debug for SoftBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftBuffer")
            .field("handle", &self.handle)
            .field("size", &self.memory.len())
            .field("heap_type", &self.heap_type)
            .field("mapped", &self.mapped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resource::BufferUsageType;

    #[test]
    fn test_unique_handles() {
        let device = SoftDevice::new();
        let a = device.create_buffer(&BufferDescriptor::upload(16)).unwrap();
        let b = device.clone().create_buffer(&BufferDescriptor::upload(16)).unwrap();
        assert_ne!(a.handle(), b.handle());
        assert_eq!(device.allocation_count(), 2);
    }

    #[test]
    fn test_device_local_is_not_mappable() {
        let device = SoftDevice::new();
        let mut buffer = device
            .create_buffer(&BufferDescriptor::device_local(64, BufferUsageType::Vertex))
            .unwrap();
        let err = buffer.map(0..0).unwrap_err();
        assert_eq!(err, SoftError::NotMappable(buffer.handle()));
    }

    #[test]
    fn test_memory_budget() {
        let device = SoftDevice::with_memory_budget(1024);
        let first = device.create_buffer(&BufferDescriptor::upload(1000)).unwrap();
        assert!(matches!(
            device.create_buffer(&BufferDescriptor::upload(100)),
            Err(SoftError::OutOfMemory { requested: 100 })
        ));

        drop(first);
        assert_eq!(device.allocated_bytes(), 0);
        device.create_buffer(&BufferDescriptor::upload(100)).unwrap();
    }

    #[test]
    fn test_injected_map_failure_is_one_shot() {
        let device = SoftDevice::new();
        let mut buffer = device.create_buffer(&BufferDescriptor::readback(32)).unwrap();

        device.inject_map_failure();
        assert!(buffer.map(0..32).is_err());
        assert!(!buffer.is_mapped());

        assert_eq!(buffer.map(0..32).unwrap().len(), 32);
        assert!(buffer.is_mapped());
        buffer.unmap(0..0);
        assert!(!buffer.is_mapped());
    }

    #[test]
    fn test_constant_buffer_is_padded() {
        let device = SoftDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor::device_local(100, BufferUsageType::Constant))
            .unwrap();
        assert_eq!(buffer.size(), 256);
    }
}
