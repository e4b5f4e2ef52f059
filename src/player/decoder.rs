use crate::core::{Config, Frame, FramePayload, PlayerError, Result, StreamInfo, TrackKind};
use crate::player::backend::MediaBackend;
use crate::player::codec::{CodecContext, CodecError, DecodedFrame, PassthroughCodec};
use crate::player::decoder_context::PipelineEvent;
use crate::player::demuxer::Demuxer;
use crate::player::frame_queue::FrameQueue;
use crate::player::lock_order::{LockRank, RankedGuard, RankedMutex};
use crate::player::log_ctx;
use crate::player::remuxer::RecordingSession;
use crate::player::worker::{Status, Worker};
use crossbeam::atomic::AtomicCell;
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PACKET_WAIT: Duration = Duration::from_millis(10);
const FRAMES_FULL_SLEEP: Duration = Duration::from_millis(5);

/// 渲染端的平面填充接口（每个视频帧调用一次）
pub trait PlaneFiller: Send + Sync {
    fn fill_planes(&self, frame: &mut Frame);
}

/// codec 上下文及其时间戳修正状态（受 codec 锁保护）
pub struct CodecSlot {
    pub(crate) codec: Option<Box<dyn CodecContext>>,
    pub(crate) stream: Option<StreamInfo>,
    /// 解封装器起始时间（ticks），帧时间戳相对于它
    pub(crate) start_offset: i64,
    pub(crate) key_packet_required: bool,
    pub(crate) last_timestamp: Option<i64>,
    pub(crate) errors: u32,
    pub(crate) recording: Option<Arc<RecordingSession>>,
}

impl CodecSlot {
    fn empty() -> Self {
        Self {
            codec: None,
            stream: None,
            start_offset: 0,
            key_packet_required: false,
            last_timestamp: None,
            errors: 0,
            recording: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.codec.is_some()
    }

    /// 标称帧时长（ticks）
    pub fn frame_duration(&self) -> i64 {
        self.stream.as_ref().map_or(0, |s| s.frame_duration)
    }

    /// 原始帧 → 统一时间基的帧；无法确定时间戳时返回 None
    pub(crate) fn make_frame(&mut self, decoded: DecodedFrame) -> Option<Frame> {
        let stream = self.stream.as_ref()?;
        let timestamp = match decoded.best_effort_timestamp.or(decoded.pts) {
            Some(ts) => stream.timebase.to_ticks(ts) - self.start_offset,
            None if stream.fix_timestamps => self
                .last_timestamp
                .map_or(0, |last| last + stream.frame_duration),
            None => return None,
        };
        self.last_timestamp = Some(timestamp);

        let duration = match stream.timebase.to_ticks(decoded.duration) {
            0 => stream.frame_duration,
            d => d,
        };
        Some(Frame {
            timestamp,
            duration,
            payload: decoded.payload,
        })
    }
}

/// 单个基本流的解码器
///
/// 从所属解封装器的包队列取包，送入 codec，输出帧到有界帧队列。
pub struct Decoder {
    kind: TrackKind,
    config: Arc<Config>,
    actions: RankedMutex<()>,
    codec: RankedMutex<CodecSlot>,
    demuxer: RwLock<Option<Arc<Demuxer>>>,
    stream: RwLock<Option<StreamInfo>>,
    frames: Arc<FrameQueue>,
    /// 每次 flush 递增，丢弃 flush 前已出队的包
    flush_generation: AtomicU64,
    start_time: AtomicCell<Option<i64>>,
    plane_filler: RwLock<Option<Arc<dyn PlaneFiller>>>,
    events: Sender<PipelineEvent>,
    pub(crate) worker: Worker,
}

impl Decoder {
    pub fn new(kind: TrackKind, config: Arc<Config>, events: Sender<PipelineEvent>) -> Self {
        let order = kind.order();
        Self {
            kind,
            actions: RankedMutex::new(LockRank::DecoderActions(order), ()),
            codec: RankedMutex::new(LockRank::Codec(order), CodecSlot::empty()),
            demuxer: RwLock::new(None),
            stream: RwLock::new(None),
            frames: Arc::new(FrameQueue::new(config.max_frames(kind))),
            flush_generation: AtomicU64::new(0),
            start_time: AtomicCell::new(None),
            plane_filler: RwLock::new(None),
            events,
            worker: Worker::new(format!("decoder-{}", kind)),
            config,
        }
    }

    /// 为流创建 codec 并绑定到解封装器的对应队列
    pub fn open(&self, demuxer: Arc<Demuxer>, stream: StreamInfo, backend: &dyn MediaBackend) -> Result<()> {
        if stream.media_type != self.kind.media_type() {
            return Err(PlayerError::InvalidStream(format!(
                "{} 解码器不能打开 {:?} 流",
                self.kind, stream.media_type
            )));
        }
        self.dispose();

        let codec: Box<dyn CodecContext> = match self.kind {
            TrackKind::Data => Box::new(PassthroughCodec::new()),
            _ => backend.open_codec(&stream)?,
        };
        info!("{} 🎞 [{}] 打开解码器: {} (stream #{})", log_ctx(), self.kind, codec.name(), stream.index);

        let _actions = self.actions.lock();
        let mut slot = self.codec.lock();
        slot.codec = Some(codec);
        slot.stream = Some(stream.clone());
        slot.start_offset = demuxer.start_time();
        slot.key_packet_required = self.kind == TrackKind::Video;
        slot.last_timestamp = None;
        slot.errors = 0;
        self.start_time.store(None);
        *self.stream.write() = Some(stream);
        *self.demuxer.write() = Some(demuxer);
        Ok(())
    }

    /// 停止线程并释放 codec（解封装器由 DecoderContext 管理）
    pub fn dispose(&self) {
        self.worker.stop();
        let _actions = self.actions.lock();
        let mut slot = self.codec.lock();
        if !slot.is_open() && self.demuxer.read().is_none() {
            return;
        }
        slot.codec = None;
        slot.stream = None;
        slot.recording = None;
        self.frames.clear();
        self.start_time.store(None);
        *self.stream.write() = None;
        *self.demuxer.write() = None;
        debug!("{} 🗑 [{}] 解码器已释放", log_ctx(), self.kind);
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_open(&self) -> bool {
        self.stream.read().is_some()
    }

    pub fn status(&self) -> Status {
        self.worker.status()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_active()
    }

    pub fn demuxer(&self) -> Option<Arc<Demuxer>> {
        self.demuxer.read().clone()
    }

    /// 是否与给定解封装器共用（内嵌流）
    pub fn is_on(&self, demuxer: &Arc<Demuxer>) -> bool {
        self.demuxer
            .read()
            .as_ref()
            .map_or(false, |d| Arc::ptr_eq(d, demuxer))
    }

    pub fn stream(&self) -> Option<StreamInfo> {
        self.stream.read().clone()
    }

    pub fn frames(&self) -> &Arc<FrameQueue> {
        &self.frames
    }

    /// 最近一次 seek 后第一帧的时间戳
    pub fn start_time(&self) -> Option<i64> {
        self.start_time.load()
    }

    pub(crate) fn set_start_time(&self, ticks: Option<i64>) {
        self.start_time.store(ticks);
    }

    pub fn set_plane_filler(&self, filler: Option<Arc<dyn PlaneFiller>>) {
        *self.plane_filler.write() = filler;
    }

    pub(crate) fn fill_planes(&self, frame: &mut Frame) {
        if let FramePayload::Video(_) = frame.payload {
            if let Some(filler) = self.plane_filler.read().as_ref() {
                filler.fill_planes(frame);
            }
        }
    }

    pub(crate) fn lock_actions(&self) -> RankedGuard<'_, ()> {
        self.actions.lock()
    }

    pub(crate) fn lock_codec(&self) -> RankedGuard<'_, CodecSlot> {
        self.codec.lock()
    }

    pub(crate) fn codec_mutex(&self) -> &RankedMutex<CodecSlot> {
        &self.codec
    }

    pub(crate) fn set_recording(&self, session: Option<Arc<RecordingSession>>) {
        self.codec.lock().recording = session;
    }

    pub fn start(self: &Arc<Self>) -> bool {
        if !self.is_open() {
            return false;
        }
        let decoder = Arc::clone(self);
        self.worker.start(move || decoder.run())
    }

    pub fn pause(&self) {
        self.worker.pause();
    }

    pub fn flush(&self) {
        let _actions = self.actions.lock();
        let mut slot = self.codec.lock();
        self.flush_locked(&mut slot);
    }

    /// 丢弃帧队列与 codec 缓存，重置时间戳修正状态（调用方持有 codec 锁）
    pub(crate) fn flush_locked(&self, slot: &mut CodecSlot) {
        let dropped = self.frames.clear();
        if let Some(codec) = slot.codec.as_mut() {
            codec.flush();
        }
        slot.key_packet_required = self.kind == TrackKind::Video;
        slot.last_timestamp = None;
        slot.errors = 0;
        self.start_time.store(None);
        self.flush_generation.fetch_add(1, Ordering::SeqCst);
        if self.worker.status() == Status::Ended {
            self.worker.set_status(Status::Stopped);
        }
        debug!("{} 🧹 [{}] flush（丢弃 {} 帧）", log_ctx(), self.kind, dropped);
    }

    /// 解码线程主循环
    fn run(&self) -> Status {
        info!("{} 🎬 [{}] 解码线程启动", log_ctx(), self.kind);
        let Some(demuxer) = self.demuxer() else {
            return Status::Stopped;
        };
        let queue = Arc::clone(demuxer.queues().get(self.kind));

        let exit = loop {
            if !self.worker.is_active() {
                break Status::Paused;
            }
            if self.frames.is_full() {
                self.worker.update_active(Status::QueueFull);
                thread::sleep(FRAMES_FULL_SLEEP);
                continue;
            }

            let generation = self.flush_generation.load(Ordering::SeqCst);
            let Some(packet) = queue.pop_timeout(PACKET_WAIT) else {
                if demuxer.status() == Status::Ended && queue.is_empty() {
                    self.drain();
                    break Status::Ended;
                }
                self.worker.update_active(Status::QueueEmpty);
                continue;
            };
            self.worker.update_active(Status::Running);

            let mut slot = self.codec.lock();
            if generation != self.flush_generation.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(e) = self.decode_locked(&mut slot, packet) {
                error!("{} ❌ [{}] {}", log_ctx(), self.kind, e);
                break Status::Stopped;
            }
        };

        if exit == Status::Ended {
            info!("{} 🏁 [{}] 解码结束", log_ctx(), self.kind);
            let _ = self.events.send(PipelineEvent::DecoderEnded(self.kind));
            let recording = self.codec.lock().recording.clone();
            if let Some(session) = recording {
                session.decoder_ended(self.kind);
            }
        }
        exit
    }

    /// 送入一个包并取出所有可用帧
    fn decode_locked(&self, slot: &mut CodecSlot, packet: crate::core::Packet) -> Result<()> {
        if slot.key_packet_required {
            if !packet.is_key {
                return Ok(());
            }
            slot.key_packet_required = false;
        }
        if let Some(session) = slot.recording.as_ref() {
            session.write(&packet, self.kind);
        }

        let Some(codec) = slot.codec.as_mut() else {
            return Err(PlayerError::Disposed);
        };
        match codec.send_packet(&packet) {
            Ok(()) | Err(CodecError::Again) => {}
            Err(CodecError::Eof) => return Ok(()),
            Err(CodecError::Invalid(msg)) => {
                slot.errors += 1;
                warn!("{} ⚠ [{}] 解码错误 ({}/{}): {}", log_ctx(), self.kind, slot.errors, self.config.decoder.max_errors, msg);
                if slot.errors >= self.config.decoder.max_errors {
                    return Err(PlayerError::DecodeError("解码错误过多".to_string()));
                }
                return Ok(());
            }
        }
        slot.errors = 0;
        self.receive_all_locked(slot);
        Ok(())
    }

    /// 取出 codec 中所有已解码的帧并入队
    pub(crate) fn receive_all_locked(&self, slot: &mut CodecSlot) {
        loop {
            let Some(codec) = slot.codec.as_mut() else {
                return;
            };
            match codec.receive_frame() {
                Ok(decoded) => {
                    if let Some(mut frame) = slot.make_frame(decoded) {
                        if self.start_time.load().is_none() {
                            self.start_time.store(Some(frame.timestamp));
                        }
                        self.fill_planes(&mut frame);
                        self.frames.push(frame);
                    }
                }
                Err(CodecError::Again) | Err(CodecError::Eof) => return,
                Err(CodecError::Invalid(msg)) => {
                    warn!("{} ⚠ [{}] 取帧失败: {}", log_ctx(), self.kind, msg);
                    return;
                }
            }
        }
    }

    /// 输入结束：吐出 codec 内部缓存的帧
    fn drain(&self) {
        let mut slot = self.codec.lock();
        if let Some(codec) = slot.codec.as_mut() {
            if codec.send_eof().is_ok() {
                self.receive_all_locked(&mut slot);
            }
        }
    }
}
