use crate::core::config::DemuxerConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 当前阻塞调用的类型（决定超时阈值）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requester {
    Open,
    Read,
    Seek,
    Close,
}

/// 上下文级中断标志，级联到所有解封装器的 Interrupter
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 协作式中断令牌
///
/// 阻塞的读取/seek/open 在 I/O 回调中轮询 `should_interrupt()`。
/// 需要放弃阻塞读取时先置 `force_interrupt(true)`，操作完成后再清除。
#[derive(Debug)]
pub struct Interrupter {
    force: AtomicBool,
    parent: InterruptFlag,
    request: Mutex<(Requester, Instant)>,
    open_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    seek_timeout: Option<Duration>,
}

fn timeout(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Interrupter {
    pub fn new(parent: InterruptFlag, config: &DemuxerConfig) -> Self {
        Self {
            force: AtomicBool::new(false),
            parent,
            request: Mutex::new((Requester::Close, Instant::now())),
            open_timeout: timeout(config.open_timeout_ms),
            read_timeout: timeout(config.read_timeout_ms),
            seek_timeout: timeout(config.seek_timeout_ms),
        }
    }

    pub fn force_interrupt(&self, on: bool) {
        self.force.store(on, Ordering::SeqCst);
    }

    pub fn is_forced(&self) -> bool {
        self.force.load(Ordering::SeqCst)
    }

    /// 标记一次新的阻塞请求（重置计时）
    pub fn request(&self, requester: Requester) {
        *self.request.lock() = (requester, Instant::now());
    }

    pub fn timed_out(&self) -> bool {
        let (requester, started) = *self.request.lock();
        let limit = match requester {
            Requester::Open => self.open_timeout,
            Requester::Read => self.read_timeout,
            Requester::Seek => self.seek_timeout,
            Requester::Close => None,
        };
        limit.map_or(false, |limit| started.elapsed() > limit)
    }

    /// I/O 回调使用：是否应放弃当前阻塞调用
    pub fn should_interrupt(&self) -> bool {
        self.is_forced() || self.parent.is_set() || self.timed_out()
    }

    /// 失败是否由中断造成（与真实错误区分）
    pub fn was_interrupted(&self) -> bool {
        self.is_forced() || self.parent.is_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_flag_cascades() {
        let parent = InterruptFlag::new();
        let interrupter = Interrupter::new(parent.clone(), &DemuxerConfig::default());
        assert!(!interrupter.should_interrupt());
        parent.set(true);
        assert!(interrupter.should_interrupt());
        parent.set(false);
        interrupter.force_interrupt(true);
        assert!(interrupter.should_interrupt());
        assert!(interrupter.was_interrupted());
    }

    #[test]
    fn test_read_timeout() {
        let config = DemuxerConfig {
            read_timeout_ms: 1,
            ..DemuxerConfig::default()
        };
        let interrupter = Interrupter::new(InterruptFlag::new(), &config);
        interrupter.request(Requester::Read);
        std::thread::sleep(Duration::from_millis(5));
        assert!(interrupter.should_interrupt());
        assert!(!interrupter.was_interrupted());
        interrupter.request(Requester::Close);
        assert!(!interrupter.should_interrupt());
    }
}
