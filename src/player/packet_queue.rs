use crate::core::{Packet, TrackKind};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 单个基本流的有界数据包队列
///
/// 入队本身不阻塞：队列满时由解封装线程进入 QueueFull（暂停读取）。
/// 出队 FIFO；`dispose_packets` 直接释放所有未处理的包。
pub struct PacketQueue {
    kind: TrackKind,
    packets: Mutex<VecDeque<Packet>>,
    not_empty: Condvar,
    capacity: AtomicUsize,
}

impl PacketQueue {
    pub fn new(kind: TrackKind, capacity: usize) -> Self {
        Self {
            kind,
            packets: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            not_empty: Condvar::new(),
            capacity: AtomicUsize::new(capacity.max(1)),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn push(&self, packet: Packet) {
        self.packets.lock().push_back(packet);
        self.not_empty.notify_one();
    }

    pub fn pop(&self) -> Option<Packet> {
        self.packets.lock().pop_front()
    }

    /// 等待最多 `timeout` 取出一个包
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Packet> {
        let mut packets = self.packets.lock();
        if packets.is_empty() {
            self.not_empty.wait_for(&mut packets, timeout);
        }
        packets.pop_front()
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// 释放所有缓存的包（不处理），返回释放数量
    pub fn dispose_packets(&self) -> usize {
        let mut packets = self.packets.lock();
        let count = packets.len();
        packets.clear();
        self.not_empty.notify_all();
        count
    }

    pub fn front_timestamp(&self) -> Option<i64> {
        self.packets.lock().iter().find_map(Packet::timestamp)
    }

    pub fn back_timestamp(&self) -> Option<i64> {
        self.packets.lock().iter().rev().find_map(Packet::timestamp)
    }

    /// 队列中缓存的时长（ticks）
    pub fn buffered_duration(&self) -> i64 {
        match (self.front_timestamp(), self.back_timestamp()) {
            (Some(front), Some(back)) if back > front => back - front,
            _ => 0,
        }
    }

    /// 在已缓存的包中查找目标附近的关键帧
    ///
    /// 找到时丢弃关键帧之前的所有包并返回关键帧时间戳；目标不在缓存范围内返回 None。
    pub fn seek_keyframe(&self, ticks: i64, forward: bool) -> Option<i64> {
        let mut packets = self.packets.lock();
        let first = packets.iter().find_map(Packet::timestamp)?;
        let last = packets.iter().rev().find_map(Packet::timestamp)?;
        if ticks < first || ticks > last {
            return None;
        }

        let is_candidate = |p: &Packet| p.is_key && p.timestamp().is_some();
        let index = if forward {
            packets
                .iter()
                .position(|p| is_candidate(p) && p.timestamp() >= Some(ticks))
        } else {
            packets
                .iter()
                .rposition(|p| is_candidate(p) && p.timestamp() <= Some(ticks))
        }?;

        let key_ts = packets[index].timestamp()?;
        packets.drain(..index);
        Some(key_ts)
    }

    /// 丢弃时间戳早于 `ticks` 的队首包，返回丢弃数量
    pub fn drop_before(&self, ticks: i64) -> usize {
        let mut packets = self.packets.lock();
        let mut dropped = 0;
        while packets
            .front()
            .map_or(false, |p| p.timestamp().map_or(true, |ts| ts < ticks))
        {
            packets.pop_front();
            dropped += 1;
        }
        dropped
    }
}
