//! 全局锁顺序
//!
//! 多把锁同时持有时必须按以下顺序获取：
//! 解码器动作锁 → 解码器 codec 锁（Video → Audio → Subtitles(i) → Data）
//! → 解封装器动作锁 → 解封装器格式上下文锁。
//!
//! `RankedMutex` 在 debug 构建下检查当前线程已持有的锁，违反顺序直接 panic。

use parking_lot::{Mutex, MutexGuard};
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockRank {
    DecoderActions(u16),
    Codec(u16),
    DemuxerActions(u16),
    Format(u16),
}

thread_local! {
    static HELD: RefCell<Vec<LockRank>> = RefCell::new(Vec::new());
}

fn check_order(rank: LockRank) {
    if cfg!(debug_assertions) {
        HELD.with(|held| {
            if let Some(top) = held.borrow().iter().max() {
                assert!(
                    *top < rank,
                    "锁顺序违例: 已持有 {:?}，又请求 {:?}",
                    top,
                    rank
                );
            }
        });
    }
}

/// 带等级的互斥锁
pub struct RankedMutex<T> {
    rank: LockRank,
    inner: Mutex<T>,
}

impl<T> RankedMutex<T> {
    pub fn new(rank: LockRank, value: T) -> Self {
        Self {
            rank,
            inner: Mutex::new(value),
        }
    }

    pub fn rank(&self) -> LockRank {
        self.rank
    }

    pub fn lock(&self) -> RankedGuard<'_, T> {
        check_order(self.rank);
        let guard = self.inner.lock();
        HELD.with(|held| held.borrow_mut().push(self.rank));
        RankedGuard {
            rank: self.rank,
            guard,
        }
    }
}

pub struct RankedGuard<'a, T> {
    rank: LockRank,
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for RankedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for RankedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for RankedGuard<'_, T> {
    fn drop(&mut self) {
        let rank = self.rank;
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|r| *r == rank) {
                held.remove(pos);
            }
        });
    }
}

/// 按等级排序后一次性获取的一组锁
pub struct LockSet<'a, K, T> {
    guards: Vec<(K, RankedGuard<'a, T>)>,
}

impl<'a, K: Copy + PartialEq, T> LockSet<'a, K, T> {
    pub fn acquire(items: impl IntoIterator<Item = (K, &'a RankedMutex<T>)>) -> Self {
        let mut items: Vec<_> = items.into_iter().collect();
        items.sort_by_key(|(_, lock)| lock.rank());
        items.dedup_by_key(|(_, lock)| lock.rank());
        let guards = items
            .into_iter()
            .map(|(key, lock)| (key, lock.lock()))
            .collect();
        Self { guards }
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.guards
            .iter_mut()
            .find(|(k, _)| *k == key)
            .map(|(_, guard)| &mut **guard)
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}
