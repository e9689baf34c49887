//! GPU 同步机制模块
//!
//! 命令队列通过 Fence 值跟踪提交进度：每次提交 signal 一个新的值，
//! `wait = true` 的提交阻塞到该值完成。同步回读路径（回读、反馈映射）依赖这里的等待。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

/// Fence 值
///
/// 单调递增。CPU 可以等待 GPU 完成特定 Fence 值对应的工作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个Fence值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// Fence 管理器
///
/// 类似于 DistEngine 的 FlushCommandQueue 机制。计数器放在 `Arc` 里，
/// 克隆出的管理器共享同一条时间线（例如交给完成回调更新已完成值）。
#[derive(Debug, Clone, Default)]
pub struct FenceManager {
    /// 已 signal 的最大值（CPU 侧）
    current_value: Arc<AtomicU64>,
    /// 已完成的最大值（GPU 侧）
    completed_value: Arc<AtomicU64>,
}

impl FenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_value(&self) -> FenceValue {
        FenceValue::new(self.current_value.load(Ordering::Acquire))
    }

    pub fn completed_value(&self) -> FenceValue {
        FenceValue::new(self.completed_value.load(Ordering::Acquire))
    }

    /// 分配下一个 Fence 值
    pub fn signal(&self) -> FenceValue {
        let value = FenceValue::new(self.current_value.fetch_add(1, Ordering::AcqRel) + 1);
        trace!(fence = value.value(), "Fence signaled");
        value
    }

    /// 标记 `value` 及之前的所有值已完成
    ///
    /// 已完成值只会增大，乱序的完成通知不会让它回退。
    pub fn update_completed_value(&self, value: FenceValue) {
        self.completed_value
            .fetch_max(value.value(), Ordering::AcqRel);
    }

    pub fn is_completed(&self, value: FenceValue) -> bool {
        self.completed_value() >= value
    }

    /// 阻塞直到 `value` 完成
    ///
    /// `poll` 负责推进设备（例如 wgpu 的 `device.poll`），返回本次轮询后已完成的值。
    /// 不设超时：设备挂起时调用线程也会挂起。
    pub fn wait_for_value<F>(&self, value: FenceValue, mut poll: F)
    where
        F: FnMut() -> Option<FenceValue>,
    {
        while !self.is_completed(value) {
            match poll() {
                Some(completed) => self.update_completed_value(completed),
                None => std::thread::yield_now(),
            }
        }
    }

    /// 还有多少个已 signal 的值没有完成
    pub fn in_flight(&self) -> u64 {
        self.current_value()
            .value()
            .saturating_sub(self.completed_value().value())
    }
}

/// 一个录制周期（通常是一帧）内的提交区间
#[derive(Debug, Clone, Copy)]
pub struct Timeline {
    frame_start: FenceValue,
    frame_end: FenceValue,
    frame_number: u64,
}

impl Timeline {
    pub fn new(frame_number: u64, start: FenceValue) -> Self {
        Self {
            frame_start: start,
            frame_end: start,
            frame_number,
        }
    }

    /// 标记帧结束
    pub fn end_frame(&mut self, end: FenceValue) {
        self.frame_end = end;
    }

    /// 本帧的提交次数（Fence 值差）
    pub fn submissions(&self) -> u64 {
        self.frame_end.value().saturating_sub(self.frame_start.value())
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_value() {
        let fence = FenceValue::new(1);
        assert_eq!(fence.next().value(), 2);
        assert_eq!(fence.value(), 1); // 原值不变
        assert!(FenceValue::new(1) < FenceValue::new(2));
    }

    #[test]
    fn test_fence_manager() {
        let manager = FenceManager::new();
        assert_eq!(manager.current_value().value(), 0);

        let v1 = manager.signal();
        let v2 = manager.signal();
        assert_eq!(v2.value(), 2);
        assert_eq!(manager.in_flight(), 2);

        manager.update_completed_value(v1);
        assert!(manager.is_completed(v1));
        assert!(!manager.is_completed(v2));

        manager.update_completed_value(v2);
        manager.update_completed_value(v1);
        assert_eq!(manager.completed_value(), v2);
        assert_eq!(manager.in_flight(), 0);
    }

    #[test]
    fn test_wait_polls_until_completed() {
        let manager = FenceManager::new();
        let target = manager.signal();

        let mut polls = 0;
        manager.wait_for_value(target, || {
            polls += 1;
            (polls == 3).then_some(target)
        });
        assert_eq!(polls, 3);
        assert!(manager.is_completed(target));
    }

    #[test]
    fn test_shared_timeline() {
        let manager = FenceManager::new();
        let observer = manager.clone();
        let value = manager.signal();
        observer.update_completed_value(value);
        assert!(manager.is_completed(value));
    }

    #[test]
    fn test_timeline() {
        let mut timeline = Timeline::new(42, FenceValue::new(100));
        assert_eq!(timeline.frame_number(), 42);

        timeline.end_frame(FenceValue::new(150));
        assert_eq!(timeline.submissions(), 50);
    }
}
