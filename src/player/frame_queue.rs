use crate::core::Frame;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 解码帧队列（解码线程生产，渲染/消费端取用）
///
/// 容量在运行中可调（录制时音频队列扩到与视频一致）。
pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: AtomicUsize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            capacity: AtomicUsize::new(capacity.max(1)),
        }
    }

    pub fn push(&self, frame: Frame) {
        self.frames.lock().push_back(frame);
    }

    pub fn pop(&self) -> Option<Frame> {
        self.frames.lock().pop_front()
    }

    pub fn peek_timestamp(&self) -> Option<i64> {
        self.frames.lock().front().map(|f| f.timestamp)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// 设置新容量，返回旧容量
    pub fn set_capacity(&self, capacity: usize) -> usize {
        self.capacity.swap(capacity.max(1), Ordering::Relaxed)
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// 清空并返回丢弃的帧数
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock();
        let count = frames.len();
        frames.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FramePayload;

    fn frame(ts: i64) -> Frame {
        Frame {
            timestamp: ts,
            duration: 0,
            payload: FramePayload::Data(Vec::new()),
        }
    }

    #[test]
    fn test_capacity_adjust() {
        let queue = FrameQueue::new(2);
        queue.push(frame(1));
        queue.push(frame(2));
        assert!(queue.is_full());
        assert_eq!(queue.set_capacity(4), 2);
        assert!(!queue.is_full());
        assert_eq!(queue.peek_timestamp(), Some(1));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
