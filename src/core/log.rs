//! 日志系统模块
//!
//! 基于 `tracing` 提供结构化的日志记录功能。
//!
//! # 日志目标
//!
//! - `distgfx::engine`：命令流、暂存缓冲池等核心组件
//! - `distgfx::backend`：具体图形后端（soft、wgpu）
//! - `distgfx::app`：演示程序和上层调用方
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_gfx::core::log;
//! use dist_gfx::core::config::LogLevel;
//!
//! log::init_logger(LogLevel::Info, false, None).expect("logger");
//! tracing::info!(chunk_size = 65536, "Staging pool created");
//! ```

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use super::config::LogLevel;
use super::error::{DistGfxError, Result};

/// 默认日志文件名
const DEFAULT_LOG_FILE: &str = "distgfx.log";

/// 初始化日志系统
///
/// 必须在程序开始时调用一次。重复初始化会返回 `DistGfxError::Log`。
///
/// # 参数
///
/// * `level` - 日志级别
/// * `file_output` - 是否输出到文件
/// * `log_file_path` - 日志文件路径（可选，默认为 "distgfx.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) -> Result<()> {
    let filter = EnvFilter::new(level.as_filter());

    let result = if file_output {
        // 解析日志文件路径
        let log_path = log_file_path.unwrap_or(DEFAULT_LOG_FILE);
        let path = Path::new(log_path);
        let directory = path.parent().unwrap_or(Path::new("."));
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(DEFAULT_LOG_FILE);

        // 每天滚动
        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, filename);

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_ansi(true);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_ansi(false) // 文件不需要 ANSI 颜色
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
    };

    result.map_err(|e| DistGfxError::Log(e.to_string()))
}

/// 初始化简单的日志系统（仅控制台输出，Info 级别）
pub fn init_simple() -> Result<()> {
    init_logger(LogLevel::Info, false, None)
}

/// 引擎核心日志 - Debug 级别
#[macro_export]
macro_rules! engine_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "distgfx::engine", $($arg)*)
    };
}

/// 引擎核心日志 - Info 级别
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "distgfx::engine", $($arg)*)
    };
}

/// 引擎核心日志 - Warn 级别
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "distgfx::engine", $($arg)*)
    };
}

/// 后端日志 - Debug 级别
#[macro_export]
macro_rules! backend_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "distgfx::backend", $($arg)*)
    };
}

/// 后端日志 - Warn 级别
#[macro_export]
macro_rules! backend_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "distgfx::backend", $($arg)*)
    };
}

/// 应用层日志 - Info 级别
#[macro_export]
macro_rules! app_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "distgfx::app", $($arg)*)
    };
}

/// 应用层日志 - Error 级别
#[macro_export]
macro_rules! app_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "distgfx::app", $($arg)*)
    };
}

/// 性能追踪宏
///
/// 返回一个 TRACE 级别的 span，进入后在离开作用域时结束。
#[macro_export]
macro_rules! span_trace {
    ($name:expr) => {
        tracing::span!(tracing::Level::TRACE, $name)
    };
}

impl LogLevel {
    /// 对应的 `EnvFilter` 指令
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
