//! 配置管理模块
//!
//! 提供配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (distgfx.toml)
//!
//! ```toml
//! [graphics]
//! backend = "soft"    # 或 "wgpu"
//!
//! [staging]
//! chunk_size = 65536
//! min_global_alignment = 4096
//!
//! [command]
//! initial_stream_capacity = 4096
//! max_nesting_depth = 1
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};

/// 全局配置
///
/// 所选后端作为显式配置值传递，不使用进程级全局状态。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 暂存缓冲池配置
    #[serde(default)]
    pub staging: StagingConfig,

    /// 命令缓冲区配置
    #[serde(default)]
    pub command: CommandConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// wgpu 后端是否优先选择高性能适配器
    #[serde(default = "default_high_performance")]
    pub high_performance: bool,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// CPU 参考后端
    Soft,
    /// wgpu 后端（Vulkan、Metal、DX12、OpenGL）
    Wgpu,
}

/// 暂存缓冲池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// 每个暂存块的默认容量（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// 全局上传/回读缓冲区分配时的最小对齐
    #[serde(default = "default_min_global_alignment")]
    pub min_global_alignment: u64,
}

/// 命令缓冲区配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// 新建操作码流预留的字节数
    #[serde(default = "default_initial_stream_capacity")]
    pub initial_stream_capacity: usize,

    /// Execute 的最大嵌套深度
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: u32,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_backend() -> GraphicsBackend { GraphicsBackend::Soft }
fn default_high_performance() -> bool { true }
fn default_chunk_size() -> u64 { 64 * 1024 }
fn default_min_global_alignment() -> u64 { 4096 }
fn default_initial_stream_capacity() -> usize { 4096 }
fn default_max_nesting_depth() -> u32 { 1 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "distgfx.log".to_string() }

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            high_performance: default_high_performance(),
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            min_global_alignment: default_min_global_alignment(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            initial_stream_capacity: default_initial_stream_capacity(),
            max_nesting_depth: default_max_nesting_depth(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--soft`: 使用 CPU 参考后端
    /// - `--wgpu`: 使用 wgpu 后端
    /// - `--chunk-size <value>`: 设置暂存块容量
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--soft") {
            self.graphics.backend = GraphicsBackend::Soft;
        }

        if args.iter().any(|a| a == "--wgpu") {
            self.graphics.backend = GraphicsBackend::Wgpu;
        }

        if let Some(idx) = args.iter().position(|a| a == "--chunk-size") {
            if let Some(size_str) = args.get(idx + 1) {
                if let Ok(size) = size_str.parse() {
                    self.staging.chunk_size = size;
                }
            }
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.staging.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "staging.chunk_size".to_string(),
                reason: "Chunk size must be greater than 0".to_string(),
            }
            .into());
        }

        if !self.staging.min_global_alignment.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                field: "staging.min_global_alignment".to_string(),
                reason: "Alignment must be a power of two".to_string(),
            }
            .into());
        }

        if self.command.max_nesting_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "command.max_nesting_depth".to_string(),
                reason: "Nesting depth must be at least 1".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Soft => "soft",
            GraphicsBackend::Wgpu => "wgpu",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.graphics.backend, GraphicsBackend::Soft);
        assert_eq!(config.staging.chunk_size, 65536);
        assert_eq!(config.staging.min_global_alignment, 4096);
        assert_eq!(config.command.max_nesting_depth, 1);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.staging.chunk_size = 0;
        assert!(config.validate().is_err());

        config.staging.chunk_size = 1024;
        config.staging.min_global_alignment = 3000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            backend = "wgpu"

            [staging]
            chunk_size = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.backend, GraphicsBackend::Wgpu);
        assert_eq!(config.staging.chunk_size, 1024);
        assert_eq!(config.staging.min_global_alignment, 4096);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["dist_gfx", "--wgpu", "--chunk-size", "2048"]);
        assert_eq!(config.graphics.backend, GraphicsBackend::Wgpu);
        assert_eq!(config.staging.chunk_size, 2048);

        // 无法解析的值保持不变
        config.apply_args(["dist_gfx", "--chunk-size", "lots"]);
        assert_eq!(config.staging.chunk_size, 2048);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = Config::from_toml_str("[staging]\nchunk_size = \"big\"").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
