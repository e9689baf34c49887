//! wgpu 后端设备管理
//!
//! 负责 wgpu 设备的初始化（无窗口表面）和缓冲区分配：
//! - 创建 wgpu 实例
//! - 选择图形适配器
//! - 创建逻辑设备和命令队列
//! - 按堆类型分配缓冲区
//!
//! wgpu 没有持久映射，CPU 可见的缓冲区各带一份影子内存：
//! 上传缓冲区在 `unmap` 时用 `queue.write_buffer` 提交写入的范围，
//! 回读缓冲区在 `map` 时通过 `map_async` 把读取范围拷贝到影子内存。

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::{backend_debug, backend_warn};

use super::context::{WgpuCommandContext, WgpuCommandQueue};
use crate::core::config::GraphicsConfig;
use crate::gfx::backend::{Backend, Device, NativeBuffer, NativeHandle};
use crate::renderer::resource::{align_up, BufferDescriptor, BufferUsageType, HeapType};

/// wgpu 后端标记类型
#[derive(Debug, Clone, Copy)]
pub enum Wgpu {}

impl Backend for Wgpu {
    const NAME: &'static str = "wgpu";

    type Error = WgpuError;
    type Buffer = WgpuBuffer;
    type Device = WgpuDevice;
    type CommandContext = WgpuCommandContext;
    type CommandQueue = WgpuCommandQueue;
}

/// wgpu 后端的原生错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WgpuError {
    /// 没有可用的适配器
    AdapterNotFound,
    /// 设备创建失败
    RequestDevice(String),
    /// 缓冲区分配失败
    OutOfMemory(String),
    /// wgpu 校验错误
    Validation(String),
    /// 映射失败
    Map(String),
    /// 缓冲区不在 CPU 可见的堆中
    NotMappable(NativeHandle),
}

impl fmt::Display for WgpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WgpuError::AdapterNotFound => write!(f, "no suitable wgpu adapter found"),
            WgpuError::RequestDevice(msg) => write!(f, "failed to create wgpu device: {}", msg),
            WgpuError::OutOfMemory(msg) => write!(f, "wgpu allocation failed: {}", msg),
            WgpuError::Validation(msg) => write!(f, "wgpu validation error: {}", msg),
            WgpuError::Map(msg) => write!(f, "wgpu buffer map failed: {}", msg),
            WgpuError::NotMappable(handle) => {
                write!(f, "buffer {} is not in a CPU-visible heap", handle.0)
            }
        }
    }
}

impl std::error::Error for WgpuError {}

pub(super) struct WgpuShared {
    pub(super) device: wgpu::Device,
    pub(super) queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    next_handle: AtomicU64,
}

/// wgpu 设备
///
/// 封装逻辑设备和命令队列，克隆出的设备共享同一个 wgpu 设备。
#[derive(Clone)]
pub struct WgpuDevice {
    shared: Arc<WgpuShared>,
}

impl WgpuDevice {
    /// 创建无表面的 wgpu 设备
    pub fn new(high_performance: bool) -> Result<Self, WgpuError> {
        info!("Initializing wgpu backend");

        debug!("Creating wgpu instance");
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            dx12_shader_compiler: Default::default(),
            flags: wgpu::InstanceFlags::default(),
            gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
        });

        debug!("Requesting adapter");
        let power_preference = if high_performance {
            wgpu::PowerPreference::HighPerformance
        } else {
            wgpu::PowerPreference::LowPower
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(WgpuError::AdapterNotFound)?;

        let adapter_info = adapter.get_info();
        info!("Selected adapter: {:?}", adapter_info);

        debug!("Requesting device and queue");
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("dist_gfx device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|e| WgpuError::RequestDevice(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|err| {
            backend_warn!("Uncaptured wgpu error: {}", err);
        }));

        info!("wgpu backend initialized successfully");

        Ok(Self {
            shared: Arc::new(WgpuShared {
                device,
                queue,
                adapter_info,
                next_handle: AtomicU64::new(0),
            }),
        })
    }

    /// 按图形配置创建
    pub fn from_config(config: &GraphicsConfig) -> Result<Self, WgpuError> {
        Self::new(config.high_performance)
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.shared.adapter_info
    }

    /// 创建绑定到本设备的命令上下文
    pub fn create_context(&self) -> WgpuCommandContext {
        WgpuCommandContext::new(Arc::clone(&self.shared))
    }

    /// 创建绑定到本设备的命令队列
    pub fn create_queue(&self) -> WgpuCommandQueue {
        WgpuCommandQueue::new(Arc::clone(&self.shared))
    }

    /// 阻塞直到设备上所有已提交的工作完成
    pub fn wait_idle(&self) {
        let _ = self.shared.device.poll(wgpu::Maintain::Wait);
    }
}

impl fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("adapter", &self.shared.adapter_info.name)
            .field("backend", &self.shared.adapter_info.backend)
            .finish()
    }
}

fn buffer_usages(desc: &BufferDescriptor) -> wgpu::BufferUsages {
    match desc.heap_type {
        HeapType::Upload => wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        HeapType::Readback => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        HeapType::DeviceLocal => {
            let usage = match desc.usage {
                BufferUsageType::Vertex => wgpu::BufferUsages::VERTEX,
                BufferUsageType::Index => wgpu::BufferUsages::INDEX,
                BufferUsageType::Constant => wgpu::BufferUsages::UNIFORM,
                BufferUsageType::Storage => wgpu::BufferUsages::STORAGE,
                BufferUsageType::Indirect => wgpu::BufferUsages::INDIRECT,
                BufferUsageType::Upload | BufferUsageType::ReadBack => wgpu::BufferUsages::empty(),
            };
            usage | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
        }
    }
}

impl Device<Wgpu> for WgpuDevice {
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<WgpuBuffer, WgpuError> {
        let size = align_up(desc.aligned_size(), wgpu::COPY_BUFFER_ALIGNMENT);
        let device = &self.shared.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let raw = device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.name.as_deref(),
            size,
            usage: buffer_usages(desc),
            mapped_at_creation: false,
        });
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        let validation = pollster::block_on(device.pop_error_scope());
        if let Some(err) = out_of_memory {
            return Err(WgpuError::OutOfMemory(err.to_string()));
        }
        if let Some(err) = validation {
            return Err(WgpuError::Validation(err.to_string()));
        }

        let handle = NativeHandle(self.shared.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        backend_debug!(handle = handle.0, size, heap = ?desc.heap_type, "wgpu buffer created");
        let shadow = if desc.heap_type.is_cpu_visible() {
            vec![0; size as usize]
        } else {
            Vec::new()
        };

        Ok(WgpuBuffer {
            raw,
            handle,
            heap_type: desc.heap_type,
            size,
            shadow,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// wgpu 缓冲区
pub struct WgpuBuffer {
    raw: wgpu::Buffer,
    handle: NativeHandle,
    heap_type: HeapType,
    size: u64,
    shadow: Vec<u8>,
    shared: Arc<WgpuShared>,
}

impl WgpuBuffer {
    /// 原生 wgpu 缓冲区
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.raw
    }

    /// 把 `range` 扩展到 `COPY_BUFFER_ALIGNMENT` 的边界
    fn aligned_range(&self, range: Range<u64>) -> Range<u64> {
        let align = wgpu::COPY_BUFFER_ALIGNMENT;
        let start = range.start / align * align;
        let end = align_up(range.end, align).min(self.size);
        start..end
    }

    fn read_back(&mut self, range: Range<u64>) -> Result<(), WgpuError> {
        let slice = self.raw.slice(range.clone());
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });

        let _ = self.shared.device.poll(wgpu::Maintain::Wait);

        match receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(WgpuError::Map(err.to_string())),
            Err(_) => return Err(WgpuError::Map("map_async callback dropped".to_string())),
        }

        {
            let mapped = slice.get_mapped_range();
            self.shadow[range.start as usize..range.end as usize].copy_from_slice(&mapped);
        }
        self.raw.unmap();
        Ok(())
    }
}

impl NativeBuffer for WgpuBuffer {
    type Error = WgpuError;

    fn handle(&self) -> NativeHandle {
        self.handle
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    fn map(&mut self, read_range: Range<u64>) -> Result<&mut [u8], WgpuError> {
        if !self.heap_type.is_cpu_visible() {
            return Err(WgpuError::NotMappable(self.handle));
        }
        assert!(read_range.end <= self.size, "read range exceeds buffer size");

        if self.heap_type == HeapType::Readback && read_range.start < read_range.end {
            let range = self.aligned_range(read_range);
            self.read_back(range)?;
        }
        Ok(&mut self.shadow)
    }

    fn unmap(&mut self, written_range: Range<u64>) {
        assert!(written_range.end <= self.size, "written range exceeds buffer size");

        if self.heap_type == HeapType::Upload && written_range.start < written_range.end {
            let range = self.aligned_range(written_range);
            self.shared.queue.write_buffer(
                &self.raw,
                range.start,
                &self.shadow[range.start as usize..range.end as usize],
            );
        }
    }
}

impl fmt::Debug for WgpuBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuBuffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("heap_type", &self.heap_type)
            .finish()
    }
}
