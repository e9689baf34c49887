//! 错误处理模块
//!
//! 定义了图形抽象层中使用的统一错误类型。
//!
//! # 设计原则
//!
//! - 为每种错误类型提供清晰的上下文信息
//! - 支持错误链（error source）
//! - 易于模式匹配和错误处理
//!
//! # 与后端错误的关系
//!
//! 暂存缓冲池（`renderer::staging`）的操作不使用这里的错误类型，
//! 而是原样返回后端的原生错误（`Backend::Error`），调用方需要理解后端特定的错误码。
//! 本模块的错误用于配置、日志、设备创建以及命令缓冲区的录制状态检查。

use std::fmt;

/// 统一的 Result 类型
///
/// 所有可能返回错误的非暂存函数都应该使用这个类型。
pub type Result<T> = std::result::Result<T, DistGfxError>;

/// DistGfx 的错误类型
#[derive(Debug)]
pub enum DistGfxError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// IO 错误
    Io(std::io::Error),

    /// 日志系统错误
    Log(String),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置项缺失
    MissingField(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 命令录制状态错误（未开始录制、非法嵌套等）
    CommandRecording(String),

    /// 渲染命令执行失败
    CommandExecution(String),
}

impl fmt::Display for DistGfxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistGfxError::Config(e) => write!(f, "Configuration error: {}", e),
            DistGfxError::Graphics(e) => write!(f, "Graphics error: {}", e),
            DistGfxError::Io(e) => write!(f, "IO error: {}", e),
            DistGfxError::Log(msg) => write!(f, "Log error: {}", msg),
            DistGfxError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            DistGfxError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {}", field),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandRecording(msg) => write!(f, "Command recording failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
        }
    }
}

impl std::error::Error for DistGfxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DistGfxError::Io(e) => Some(e),
            DistGfxError::Config(e) => Some(e),
            DistGfxError::Graphics(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for DistGfxError {
    fn from(err: std::io::Error) -> Self {
        DistGfxError::Io(err)
    }
}

impl From<ConfigError> for DistGfxError {
    fn from(err: ConfigError) -> Self {
        DistGfxError::Config(err)
    }
}

impl From<GraphicsError> for DistGfxError {
    fn from(err: GraphicsError) -> Self {
        DistGfxError::Graphics(err)
    }
}
