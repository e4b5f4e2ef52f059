use crate::core::{
    Config, InputType, InterruptFlag, Interrupter, MediaType, Packet, PlayerError, Requester,
    Result, StreamInfo, TrackKind,
};
use crate::player::backend::MediaBackend;
use crate::player::demuxer_source::DemuxerSource;
use crate::player::demuxer_thread;
use crate::player::lock_order::{LockRank, RankedGuard, RankedMutex};
use crate::player::log_ctx;
use crate::player::packet_queue::PacketQueue;
use crate::player::worker::{Status, Worker};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// 格式上下文槽位（受格式锁保护）
pub struct FormatSlot {
    source: Option<Box<dyn DemuxerSource>>,
}

impl FormatSlot {
    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }
}

/// 一次读取的结果
pub(crate) enum ReadOutcome {
    Packet(Packet),
    Eof,
    Interrupted,
    Failed(PlayerError),
    Closed,
}

/// 每种基本流各自的包队列
pub struct DemuxerQueues {
    pub video: Arc<PacketQueue>,
    pub audio: Arc<PacketQueue>,
    pub subtitles: Vec<Arc<PacketQueue>>,
    pub data: Arc<PacketQueue>,
}

impl DemuxerQueues {
    fn new(config: &Config) -> Self {
        let queue = |kind| Arc::new(PacketQueue::new(kind, config.max_packets(kind)));
        Self {
            video: queue(TrackKind::Video),
            audio: queue(TrackKind::Audio),
            subtitles: (0..config.subtitle_tracks())
                .map(|i| queue(TrackKind::Subtitles(i)))
                .collect(),
            data: queue(TrackKind::Data),
        }
    }

    /// 字幕轨索引越界属于调用方错误，直接 panic
    pub fn get(&self, kind: TrackKind) -> &Arc<PacketQueue> {
        match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
            TrackKind::Subtitles(i) => &self.subtitles[i],
            TrackKind::Data => &self.data,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PacketQueue>> {
        [&self.video, &self.audio]
            .into_iter()
            .chain(self.subtitles.iter())
            .chain(std::iter::once(&self.data))
    }

    fn dispose_all(&self) -> usize {
        self.iter().map(|q| q.dispose_packets()).sum()
    }
}

struct DemuxerState {
    url: String,
    input_type: InputType,
    streams: Vec<StreamInfo>,
    /// 流索引 → 接收该流的轨道（同一字幕流可同时送往多个字幕轨）
    routes: HashMap<usize, Vec<TrackKind>>,
}

/// 解封装器
///
/// 主解封装器（kind = Video）承载内嵌的全部流；外部解封装器只承载单一类型。
/// 生命周期：空闲 → open → start/pause → dispose（可再次 open）。
pub struct Demuxer {
    kind: TrackKind,
    config: Arc<Config>,
    actions: RankedMutex<()>,
    format: RankedMutex<FormatSlot>,
    state: RwLock<DemuxerState>,
    start_time: AtomicI64,
    duration: AtomicI64,
    cur_time: AtomicI64,
    disposed: AtomicBool,
    pause_on_queue_full: bool,
    resync_pending: AtomicBool,
    queues: DemuxerQueues,
    pub(crate) worker: Worker,
    interrupter: Arc<Interrupter>,
}

impl Demuxer {
    pub fn new(kind: TrackKind, config: Arc<Config>, interrupt: InterruptFlag) -> Self {
        let order = kind.order();
        let interrupter = Arc::new(Interrupter::new(interrupt, &config.demuxer));
        Self {
            kind,
            actions: RankedMutex::new(LockRank::DemuxerActions(order), ()),
            format: RankedMutex::new(LockRank::Format(order), FormatSlot { source: None }),
            state: RwLock::new(DemuxerState {
                url: String::new(),
                input_type: InputType::File,
                streams: Vec::new(),
                routes: HashMap::new(),
            }),
            start_time: AtomicI64::new(0),
            duration: AtomicI64::new(0),
            cur_time: AtomicI64::new(0),
            disposed: AtomicBool::new(true),
            // 外部音频/数据流在队列满时停下，等待按视频时钟重同步
            pause_on_queue_full: matches!(kind, TrackKind::Audio | TrackKind::Data),
            resync_pending: AtomicBool::new(false),
            queues: DemuxerQueues::new(&config),
            worker: Worker::new(format!("demuxer-{}", kind)),
            interrupter,
            config,
        }
    }

    /// 打开输入（已打开时先释放）
    pub fn open(&self, url: &str, backend: &dyn MediaBackend) -> Result<()> {
        self.dispose();
        info!("{} 📂 [{}] 正在打开: {}", log_ctx(), self.kind, url);

        let _actions = self.actions.lock();
        let mut slot = self.format.lock();

        self.interrupter.request(Requester::Open);
        let opened = backend.open_input(url, Arc::clone(&self.interrupter), &self.config.demuxer);
        self.interrupter.request(Requester::Close);

        let source = match opened {
            Ok(source) => source,
            Err(e) if self.interrupter.was_interrupted() => {
                warn!("{} ⚠ [{}] 打开被中断: {}", log_ctx(), self.kind, e);
                return Err(PlayerError::Interrupted);
            }
            Err(e) => {
                error!("{} ❌ [{}] 打开失败: {}", log_ctx(), self.kind, e);
                return Err(e);
            }
        };

        let start_time = source.start_time();
        self.start_time.store(start_time, Ordering::SeqCst);
        self.duration.store(source.duration(), Ordering::SeqCst);
        self.cur_time.store(start_time, Ordering::SeqCst);
        {
            let mut state = self.state.write();
            state.url = url.to_string();
            state.input_type = InputType::from_url(url);
            state.streams = source.streams().to_vec();
            state.routes.clear();
        }
        debug!("{} [{}] {} 个流, 起始 {} 时长 {}", log_ctx(), self.kind, source.streams().len(), start_time, source.duration());
        slot.source = Some(source);
        self.resync_pending.store(false, Ordering::SeqCst);
        self.disposed.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// 停止线程、释放格式上下文与全部缓存包
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.interrupter.force_interrupt(true);
        self.worker.stop();

        let _actions = self.actions.lock();
        let mut slot = self.format.lock();
        self.disposed.store(true, Ordering::SeqCst);
        slot.source = None;
        let dropped = self.queues.dispose_all();
        self.state.write().routes.clear();
        self.interrupter.force_interrupt(false);
        info!("{} 🗑 [{}] 已释放（丢弃 {} 个包）", log_ctx(), self.kind, dropped);
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Status {
        self.worker.status()
    }

    pub fn interrupter(&self) -> &Arc<Interrupter> {
        &self.interrupter
    }

    pub fn queues(&self) -> &DemuxerQueues {
        &self.queues
    }

    pub fn url(&self) -> String {
        self.state.read().url.clone()
    }

    pub fn input_type(&self) -> InputType {
        self.state.read().input_type
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        self.state.read().streams.clone()
    }

    pub fn stream(&self, index: usize) -> Option<StreamInfo> {
        self.state.read().streams.iter().find(|s| s.index == index).cloned()
    }

    /// 某类型的首个流（默认选择）
    pub fn default_stream(&self, media_type: MediaType) -> Option<usize> {
        self.state
            .read()
            .streams
            .iter()
            .find(|s| s.media_type == media_type)
            .map(|s| s.index)
    }

    /// 将流送往指定轨道
    pub fn enable_stream(&self, index: usize, kind: TrackKind) -> Result<()> {
        let mut state = self.state.write();
        let stream = state
            .streams
            .iter()
            .find(|s| s.index == index)
            .ok_or_else(|| PlayerError::InvalidStream(format!("流 #{} 不存在", index)))?;
        if stream.media_type != kind.media_type() {
            return Err(PlayerError::InvalidStream(format!(
                "流 #{} 类型为 {:?}，不能用于 {}",
                index, stream.media_type, kind
            )));
        }
        for targets in state.routes.values_mut() {
            targets.retain(|k| *k != kind);
        }
        state.routes.retain(|_, targets| !targets.is_empty());
        state.routes.entry(index).or_default().push(kind);
        debug!("{} [{}] 启用流 #{} → {}", log_ctx(), self.kind, index, kind);
        Ok(())
    }

    /// 关闭送往某轨道的流并丢弃其缓存包
    pub fn disable_track(&self, kind: TrackKind) {
        {
            let mut state = self.state.write();
            for targets in state.routes.values_mut() {
                targets.retain(|k| *k != kind);
            }
            state.routes.retain(|_, targets| !targets.is_empty());
        }
        self.queues.get(kind).dispose_packets();
    }

    /// 送往该轨道的流索引
    pub fn enabled_stream(&self, kind: TrackKind) -> Option<usize> {
        self.state
            .read()
            .routes
            .iter()
            .find(|(_, targets)| targets.contains(&kind))
            .map(|(index, _)| *index)
    }

    pub fn has_enabled_streams(&self) -> bool {
        !self.state.read().routes.is_empty()
    }

    /// 流索引对应的目标轨道（未启用为空）
    pub fn targets(&self, index: usize) -> Vec<TrackKind> {
        self.state.read().routes.get(&index).cloned().unwrap_or_default()
    }

    /// 容器起始时间（ticks）
    pub fn start_time(&self) -> i64 {
        self.start_time.load(Ordering::SeqCst)
    }

    pub fn duration(&self) -> i64 {
        self.duration.load(Ordering::SeqCst)
    }

    /// 最近读取位置（绝对 ticks）
    pub fn cur_time(&self) -> i64 {
        self.cur_time.load(Ordering::SeqCst)
    }

    /// 外部音频/数据解封装器：队列满时停下而不是等待
    pub fn pause_on_queue_full(&self) -> bool {
        self.pause_on_queue_full
    }

    /// 是否因队列满而停下、等待重同步
    pub fn resync_pending(&self) -> bool {
        self.resync_pending.load(Ordering::SeqCst)
    }

    pub(crate) fn set_resync_pending(&self, on: bool) {
        self.resync_pending.store(on, Ordering::SeqCst);
    }

    /// 已启用的队列中是否有任意一个已满
    pub fn is_queue_full(&self) -> bool {
        let state = self.state.read();
        state
            .routes
            .values()
            .flatten()
            .any(|kind| self.queues.get(*kind).is_full())
    }

    /// 已启用队列中最长的缓存时长（ticks）
    pub fn buffered_duration(&self) -> i64 {
        let state = self.state.read();
        state
            .routes
            .values()
            .flatten()
            .map(|kind| self.queues.get(*kind).buffered_duration())
            .max()
            .unwrap_or(0)
    }

    pub fn description(&self) -> String {
        format!("{} {}", self.kind, self.url())
    }

    pub fn start(self: &Arc<Self>) -> bool {
        if self.is_disposed() {
            return false;
        }
        let demuxer = Arc::clone(self);
        self.worker.start(move || demuxer_thread::run(&demuxer))
    }

    /// 暂停读取线程（阻塞读取会被强制中断）
    pub fn pause(&self) {
        let _actions = self.actions.lock();
        self.interrupter.force_interrupt(true);
        self.worker.pause();
        self.interrupter.force_interrupt(false);
    }

    pub(crate) fn lock_actions(&self) -> RankedGuard<'_, ()> {
        self.actions.lock()
    }

    pub(crate) fn lock_format(&self) -> RankedGuard<'_, FormatSlot> {
        self.format.lock()
    }

    /// 在格式锁下读取一个包：换算时间戳并更新当前位置
    pub(crate) fn read_locked(&self, slot: &mut FormatSlot) -> ReadOutcome {
        let Some(source) = slot.source.as_mut() else {
            return ReadOutcome::Closed;
        };

        self.interrupter.request(Requester::Read);
        let read = source.read_packet();
        self.interrupter.request(Requester::Close);

        match read {
            Ok(Some(mut packet)) => {
                let timebase = self
                    .state
                    .read()
                    .streams
                    .iter()
                    .find(|s| s.index == packet.stream_index)
                    .map(|s| s.timebase);
                if let Some(timebase) = timebase {
                    packet.stamp(timebase);
                }
                if let Some(ts) = packet.timestamp() {
                    self.cur_time.store(ts, Ordering::SeqCst);
                }
                ReadOutcome::Packet(packet)
            }
            Ok(None) => ReadOutcome::Eof,
            Err(_) if self.interrupter.was_interrupted() => ReadOutcome::Interrupted,
            Err(e) => ReadOutcome::Failed(e),
        }
    }

    /// 按路由表入队（多个目标时复制）
    pub(crate) fn enqueue(&self, packet: Packet) {
        let targets = self.targets(packet.stream_index);
        match targets.as_slice() {
            [] => {}
            [kind] => self.queues.get(*kind).push(packet),
            [rest @ .., last] => {
                for kind in rest {
                    self.queues.get(*kind).push(packet.clone());
                }
                self.queues.get(*last).push(packet);
            }
        }
    }

    /// 主队列：有视频路由时为视频队列，否则为本解封装器自身类型的队列
    fn primary_queue(&self) -> Option<&Arc<PacketQueue>> {
        let state = self.state.read();
        let routed = |kind: TrackKind| state.routes.values().flatten().any(|k| *k == kind);
        if routed(TrackKind::Video) {
            Some(&self.queues.video)
        } else if routed(self.kind) {
            Some(self.queues.get(self.kind))
        } else {
            None
        }
    }

    /// 在已缓存的包中完成 seek（调用方持有动作锁）
    pub(crate) fn seek_in_queue_locked(&self, ticks: i64, forward: bool) -> bool {
        let Some(primary) = self.primary_queue() else {
            return false;
        };
        let Some(key_ts) = primary.seek_keyframe(ticks, forward) else {
            return false;
        };
        for queue in self.queues.iter() {
            if !Arc::ptr_eq(queue, primary) {
                queue.drop_before(key_ts);
            }
        }
        debug!("{} ⚡ [{}] 队列内 seek 命中关键帧 {}", log_ctx(), self.kind, key_ts);
        true
    }

    /// 容器级 seek（调用方持有动作锁与格式锁，且已置 ForceInterrupt）
    ///
    /// 返回 0 成功，-1 失败；失败时先反方向重试一次。
    pub(crate) fn seek_format_locked(&self, slot: &mut FormatSlot, ticks: i64, forward: bool) -> i32 {
        self.interrupter.force_interrupt(false);
        if self.worker.status() == Status::Ended {
            self.worker.set_status(Status::Stopped);
        }
        self.queues.dispose_all();

        let Some(source) = slot.source.as_mut() else {
            return -1;
        };
        if !source.is_seekable() {
            warn!("{} ⚠ [{}] 输入不支持 seek", log_ctx(), self.kind);
            return -1;
        }

        self.interrupter.request(Requester::Seek);
        let mut result = source.seek(ticks, forward);
        if let Err(e) = &result {
            warn!("{} ⚠ [{}] seek 到 {} 失败: {}，反方向重试", log_ctx(), self.kind, ticks, e);
            result = source.seek(ticks, !forward);
        }
        self.interrupter.request(Requester::Close);

        match result {
            Ok(()) => {
                self.cur_time.store(ticks, Ordering::SeqCst);
                info!("{} ⏩ [{}] seek 完成: {} (forward={})", log_ctx(), self.kind, ticks, forward);
                0
            }
            Err(e) => {
                error!("{} ❌ [{}] seek 失败: {}", log_ctx(), self.kind, e);
                -1
            }
        }
    }

    /// 独立 seek（先尝试队列内，失败则容器 seek）
    pub fn seek(&self, ticks: i64, forward: bool) -> i32 {
        let _actions = self.actions.lock();
        self.seek_locked(ticks, forward, true)
    }

    /// 调用方已持有动作锁
    pub(crate) fn seek_locked(&self, ticks: i64, forward: bool, allow_in_queue: bool) -> i32 {
        if self.is_disposed() {
            return -1;
        }
        if allow_in_queue
            && self.input_type() != InputType::Torrent
            && self.seek_in_queue_locked(ticks, forward)
        {
            return 0;
        }
        self.interrupter.force_interrupt(true);
        let mut slot = self.format.lock();
        if self.is_disposed() || !slot.is_open() {
            self.interrupter.force_interrupt(false);
            return -1;
        }
        self.seek_format_locked(&mut slot, ticks, forward)
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.interrupter.force_interrupt(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TICKS_PER_MS;
    use crate::player::testing::{SyntheticBackend, SyntheticMedia};
    use std::time::Duration;

    fn open_main(media: SyntheticMedia) -> (Arc<Demuxer>, SyntheticBackend) {
        let backend = SyntheticBackend::new(media);
        let demuxer = Arc::new(Demuxer::new(
            TrackKind::Video,
            Arc::new(Config::default()),
            InterruptFlag::new(),
        ));
        demuxer.open("synthetic://main", &backend).unwrap();
        (demuxer, backend)
    }

    #[test]
    fn test_open_and_routes() {
        let (demuxer, _backend) = open_main(SyntheticMedia::default());
        assert!(!demuxer.is_disposed());
        let video = demuxer.default_stream(MediaType::Video).unwrap();
        demuxer.enable_stream(video, TrackKind::Video).unwrap();
        assert_eq!(demuxer.enabled_stream(TrackKind::Video), Some(video));
        assert!(demuxer
            .enable_stream(video, TrackKind::Audio)
            .is_err());

        demuxer.disable_track(TrackKind::Video);
        assert!(!demuxer.has_enabled_streams());
    }

    #[test]
    fn test_read_thread_fills_until_queue_full() {
        let mut media = SyntheticMedia::default();
        media.frames = 2000;
        let (demuxer, _backend) = open_main(media);
        demuxer.enable_stream(0, TrackKind::Video).unwrap();
        assert!(demuxer.start());

        let capacity = demuxer.queues().video.capacity();
        for _ in 0..200 {
            if demuxer.status() == Status::QueueFull {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(demuxer.status(), Status::QueueFull);
        assert_eq!(demuxer.queues().video.len(), capacity);
        demuxer.pause();
        assert_eq!(demuxer.status(), Status::Paused);
        demuxer.dispose();
        assert!(demuxer.queues().video.is_empty());
    }

    #[test]
    fn test_seek_in_queue_then_hard_seek() {
        let (demuxer, _backend) = open_main(SyntheticMedia::default());
        demuxer.enable_stream(0, TrackKind::Video).unwrap();
        {
            let mut slot = demuxer.lock_format();
            for _ in 0..30 {
                match demuxer.read_locked(&mut slot) {
                    ReadOutcome::Packet(p) => demuxer.enqueue(p),
                    _ => panic!("unexpected read outcome"),
                }
            }
        }

        // 25fps、GOP 10：关键帧位于 0 / 400 / 800ms
        assert_eq!(demuxer.seek(500 * TICKS_PER_MS, false), 0);
        assert_eq!(demuxer.queues().video.front_timestamp(), Some(400 * TICKS_PER_MS));

        // 超出缓存范围 → 容器 seek，清空队列
        assert_eq!(demuxer.seek(3_000 * TICKS_PER_MS, false), 0);
        assert!(demuxer.queues().video.is_empty());
        assert_eq!(demuxer.cur_time(), 3_000 * TICKS_PER_MS);
    }

    #[test]
    fn test_hard_seek_while_reading_drops_old_packets() {
        let mut media = SyntheticMedia::default();
        media.frames = 10_000;
        media.audio = true;
        let (demuxer, _backend) = open_main(media);
        demuxer.enable_stream(0, TrackKind::Video).unwrap();
        demuxer.enable_stream(1, TrackKind::Audio).unwrap();

        for round in 0..40 {
            assert!(demuxer.start());
            std::thread::sleep(Duration::from_micros(200));

            // 4000ms 与 8000ms 都是关键帧
            let target = (if round % 2 == 0 { 4_000 } else { 8_000 }) * TICKS_PER_MS;
            {
                let _actions = demuxer.lock_actions();
                assert_eq!(demuxer.seek_locked(target, false, false), 0);
            }
            for _ in 0..200 {
                if !demuxer.queues().video.is_empty() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            demuxer.pause();

            assert_eq!(demuxer.queues().video.front_timestamp(), Some(target));
            if let Some(front) = demuxer.queues().audio.front_timestamp() {
                assert!(front >= target, "round {}: audio front {} < {}", round, front, target);
            }
        }
    }

    #[test]
    fn test_external_data_pauses_when_queue_full() {
        let mut config = Config::default();
        config.demuxer.max_data_packets = 8;
        let backend = SyntheticBackend::new(SyntheticMedia::data_only(500));
        let demuxer = Arc::new(Demuxer::new(TrackKind::Data, Arc::new(config), InterruptFlag::new()));
        demuxer.open("synthetic://data", &backend).unwrap();
        assert!(demuxer.pause_on_queue_full());
        let index = demuxer.default_stream(MediaType::Data).unwrap();
        demuxer.enable_stream(index, TrackKind::Data).unwrap();

        demuxer.start();
        for _ in 0..200 {
            if demuxer.resync_pending() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(demuxer.resync_pending());
        demuxer.pause();
        assert_eq!(demuxer.status(), Status::Paused);
        assert_eq!(demuxer.queues().data.len(), 8);
        // 每 5 帧一个数据包
        assert_eq!(demuxer.queues().data.back_timestamp(), Some(7 * 200 * TICKS_PER_MS));
    }

    #[test]
    fn test_pause_interrupts_stalled_read() {
        let mut media = SyntheticMedia::default();
        media.stall_after = Some(3);
        let (demuxer, _backend) = open_main(media);
        demuxer.enable_stream(0, TrackKind::Video).unwrap();
        demuxer.start();
        std::thread::sleep(Duration::from_millis(30));
        demuxer.pause();
        assert_eq!(demuxer.status(), Status::Paused);
        assert_eq!(demuxer.queues().video.len(), 3);
    }
}
