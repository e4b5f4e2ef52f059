use crate::core::{
    Config, InputType, InterruptFlag, MediaType, PlayerError, Result, StreamInfo, TrackKind, TICKS_PER_MS,
};
use crate::player::backend::MediaBackend;
use crate::player::codec::CodecError;
use crate::player::decoder::{Decoder, PlaneFiller};
use crate::player::demuxer::{Demuxer, ReadOutcome};
use crate::player::lock_order::LockSet;
use crate::player::log_ctx;
use crate::player::remuxer::{RecordingSession, Remuxer};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// seek 目标不超过 结尾 - 500ms
const SEEK_END_MARGIN: i64 = 500 * TICKS_PER_MS;

/// 流水线事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// 开始容器级 seek（需要重新缓冲）
    Buffering,
    DecoderEnded(TrackKind),
    RecordingCompleted(PathBuf),
}

/// 计算 seek 目标（绝对 ticks）与最终方向
///
/// 目标被限制在 `[start, start + duration - 500ms]`；低于起点时强制向前，超过上限时强制向后。
pub fn calc_seek_timestamp(start_time: i64, duration: i64, delay: i64, ms: i64, forward: bool) -> (i64, bool) {
    // 调用方传入的毫秒数不受限制，换算时饱和避免溢出
    let ticks = ms
        .saturating_mul(TICKS_PER_MS)
        .saturating_add(start_time)
        .saturating_sub(delay);
    if ticks < start_time {
        return (start_time, true);
    }
    let max = start_time.saturating_add(duration).saturating_sub(SEEK_END_MARGIN);
    if ticks > max {
        return (max.max(start_time), false);
    }
    (ticks, forward)
}

struct Recording {
    session: Arc<RecordingSession>,
    audio_capacity: usize,
}

/// 解封装/解码编排器
///
/// 持有主解封装器（承载内嵌流）、外部音频/字幕/数据解封装器以及每种流的解码器，
/// 对外提供统一的 start / pause / stop / seek / resync / flush。
///
/// 同时持有多把锁时的顺序：解码器动作锁 → codec 锁（Video → Audio → Subtitles → Data）
/// → 解封装器动作锁 → 格式锁。
pub struct DecoderContext {
    config: Arc<Config>,
    backend: Arc<dyn MediaBackend>,
    interrupt: InterruptFlag,
    events_tx: Sender<PipelineEvent>,
    events_rx: Receiver<PipelineEvent>,

    main_demuxer: Arc<Demuxer>,
    audio_demuxer: Arc<Demuxer>,
    subtitles_demuxers: Vec<Arc<Demuxer>>,
    data_demuxer: Arc<Demuxer>,

    video_decoder: Arc<Decoder>,
    audio_decoder: Arc<Decoder>,
    subtitles_decoders: Vec<Arc<Decoder>>,
    data_decoder: Arc<Decoder>,

    running: AtomicBool,
    requires_resync: AtomicBool,
    recording: Mutex<Option<Recording>>,
}

impl DecoderContext {
    pub fn new(config: Arc<Config>, backend: Arc<dyn MediaBackend>) -> Self {
        let interrupt = InterruptFlag::new();
        let (events_tx, events_rx) = unbounded();

        let demuxer = |kind| Arc::new(Demuxer::new(kind, Arc::clone(&config), interrupt.clone()));
        let decoder = |kind| Arc::new(Decoder::new(kind, Arc::clone(&config), events_tx.clone()));
        let subtitle_kinds: Vec<_> = (0..config.subtitle_tracks()).map(TrackKind::Subtitles).collect();

        info!("{} 🎮 创建 DecoderContext（后端: {}，字幕轨: {}）", log_ctx(), backend.name(), subtitle_kinds.len());
        Self {
            main_demuxer: demuxer(TrackKind::Video),
            audio_demuxer: demuxer(TrackKind::Audio),
            subtitles_demuxers: subtitle_kinds.iter().map(|k| demuxer(*k)).collect(),
            data_demuxer: demuxer(TrackKind::Data),
            video_decoder: decoder(TrackKind::Video),
            audio_decoder: decoder(TrackKind::Audio),
            subtitles_decoders: subtitle_kinds.iter().map(|k| decoder(*k)).collect(),
            data_decoder: decoder(TrackKind::Data),
            running: AtomicBool::new(false),
            requires_resync: AtomicBool::new(false),
            recording: Mutex::new(None),
            interrupt,
            events_tx,
            events_rx,
            backend,
            config,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events_rx.clone()
    }

    /// 上下文级中断：级联到所有解封装器，重新启动前必须清除
    pub fn interrupt(&self) -> &InterruptFlag {
        &self.interrupt
    }

    pub fn main_demuxer(&self) -> &Arc<Demuxer> {
        &self.main_demuxer
    }

    /// 某轨道的外部解封装器（视频总是主解封装器）
    pub fn external_demuxer(&self, kind: TrackKind) -> &Arc<Demuxer> {
        match kind {
            TrackKind::Video => &self.main_demuxer,
            TrackKind::Audio => &self.audio_demuxer,
            TrackKind::Subtitles(i) => {
                assert!(i < self.subtitles_demuxers.len(), "字幕轨索引越界: {}", i);
                &self.subtitles_demuxers[i]
            }
            TrackKind::Data => &self.data_demuxer,
        }
    }

    /// 按类型取解码器；字幕轨索引越界直接 panic
    pub fn decoder(&self, kind: TrackKind) -> &Arc<Decoder> {
        match kind {
            TrackKind::Video => &self.video_decoder,
            TrackKind::Audio => &self.audio_decoder,
            TrackKind::Subtitles(i) => {
                assert!(i < self.subtitles_decoders.len(), "字幕轨索引越界: {}", i);
                &self.subtitles_decoders[i]
            }
            TrackKind::Data => &self.data_decoder,
        }
    }

    /// 全部解码器（按锁顺序）
    fn decoders(&self) -> impl Iterator<Item = &Arc<Decoder>> {
        [&self.video_decoder, &self.audio_decoder]
            .into_iter()
            .chain(self.subtitles_decoders.iter())
            .chain(std::iter::once(&self.data_decoder))
    }

    /// 全部解封装器（按锁顺序）
    fn demuxers(&self) -> impl Iterator<Item = &Arc<Demuxer>> {
        [&self.main_demuxer, &self.audio_demuxer]
            .into_iter()
            .chain(self.subtitles_demuxers.iter())
            .chain(std::iter::once(&self.data_demuxer))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ========== 打开 / 选流 ==========

    /// 打开主输入并选择默认的视频/音频流
    pub fn open(&self, url: &str) -> Result<()> {
        self.stop();
        self.initialize();
        self.main_demuxer.open(url, self.backend.as_ref())?;

        for kind in [TrackKind::Video, TrackKind::Audio] {
            if !self.config.is_enabled(kind.media_type()) {
                continue;
            }
            if let Some(index) = self.main_demuxer.default_stream(kind.media_type()) {
                self.open_stream(kind, index)?;
            }
        }

        if !self.video_decoder.is_open() && !self.audio_decoder.is_open() {
            let has_video = self.main_demuxer.default_stream(MediaType::Video).is_some();
            self.main_demuxer.dispose();
            if !has_video {
                return Err(PlayerError::NoVideoStream);
            }
            return Err(PlayerError::OpenError(format!("没有可播放的音视频流: {}", url)));
        }
        info!("{} ✅ 打开完成: {} (video={}, audio={})", log_ctx(), url, self.video_decoder.is_open(), self.audio_decoder.is_open());
        Ok(())
    }

    /// 打开后的初始化：清除中断与重同步标记
    pub fn initialize(&self) {
        self.interrupt.set(false);
        self.requires_resync.store(false, Ordering::SeqCst);
        for decoder in self.decoders() {
            decoder.set_start_time(None);
        }
    }

    /// 切换流之前调用：停下线程并清空所有缓存，保留已打开的结构
    pub fn initialize_switch(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_threads();
        self.flush();
        self.requires_resync.store(false, Ordering::SeqCst);
    }

    /// 从主输入启用一条内嵌流
    pub fn open_stream(&self, kind: TrackKind, index: usize) -> Result<()> {
        if !self.config.is_enabled(kind.media_type()) {
            return Err(PlayerError::InvalidStream(format!("{} 已在配置中禁用", kind)));
        }
        let main = &self.main_demuxer;
        if main.is_disposed() {
            return Err(PlayerError::Disposed);
        }
        let stream = main
            .stream(index)
            .ok_or_else(|| PlayerError::InvalidStream(format!("流 #{} 不存在", index)))?;

        self.close_stream(kind);
        main.enable_stream(index, kind)?;
        let decoder = self.decoder(kind);
        if let Err(e) = decoder.open(Arc::clone(main), stream, self.backend.as_ref()) {
            main.disable_track(kind);
            return Err(e);
        }

        if self.is_running() {
            decoder.start();
            main.start();
        }
        Ok(())
    }

    /// 从独立输入打开外部音频/字幕/数据流
    pub fn open_external(&self, kind: TrackKind, url: &str) -> Result<()> {
        if kind == TrackKind::Video {
            return Err(PlayerError::InvalidStream("视频只能来自主输入".to_string()));
        }
        if !self.config.is_enabled(kind.media_type()) {
            return Err(PlayerError::InvalidStream(format!("{} 已在配置中禁用", kind)));
        }

        self.close_stream(kind);
        let demuxer = self.external_demuxer(kind);
        demuxer.open(url, self.backend.as_ref())?;

        let opened = demuxer
            .default_stream(kind.media_type())
            .and_then(|index| demuxer.stream(index))
            .ok_or_else(|| PlayerError::InvalidStream(format!("{} 中没有 {:?} 流", url, kind.media_type())))
            .and_then(|stream: StreamInfo| {
                demuxer.enable_stream(stream.index, kind)?;
                self.decoder(kind).open(Arc::clone(demuxer), stream, self.backend.as_ref())
            });
        if let Err(e) = opened {
            demuxer.dispose();
            return Err(e);
        }
        info!("{} 📎 外部 {} 已打开: {}", log_ctx(), kind, url);

        if self.is_running() {
            let ms = self.main_time_ms();
            self.seek_external(kind, ms, false);
        }
        Ok(())
    }

    /// 关闭某轨道（内嵌流取消路由，外部流释放其解封装器）
    pub fn close_stream(&self, kind: TrackKind) {
        let decoder = self.decoder(kind);
        let on_main = decoder.is_on(&self.main_demuxer);
        decoder.dispose();
        if on_main {
            self.main_demuxer.disable_track(kind);
        } else if kind != TrackKind::Video {
            self.external_demuxer(kind).dispose();
        }
    }

    // ========== 运行控制 ==========

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        for demuxer in self.demuxers() {
            if !demuxer.is_disposed() && demuxer.has_enabled_streams() {
                demuxer.start();
            }
        }
        for decoder in self.decoders() {
            if decoder.is_open() {
                decoder.start();
            }
        }
        debug!("{} ▶ 流水线启动", log_ctx());
    }

    pub fn pause(&self) {
        self.running.store(false, Ordering::SeqCst);
        for decoder in self.decoders() {
            decoder.pause();
        }
        for demuxer in self.demuxers() {
            demuxer.pause();
        }
        debug!("{} ⏸ 流水线暂停", log_ctx());
    }

    /// 停止所有工作线程，结构保持可用
    pub fn stop_threads(&self) {
        for decoder in self.decoders() {
            decoder.worker.stop();
        }
        for demuxer in self.demuxers() {
            demuxer.interrupter().force_interrupt(true);
            demuxer.worker.stop();
            demuxer.interrupter().force_interrupt(false);
        }
    }

    /// 释放全部解封装器与解码器（之后需重新 open）
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_recording();
        for decoder in self.decoders() {
            decoder.dispose();
        }
        for demuxer in self.demuxers() {
            demuxer.dispose();
        }
        self.requires_resync.store(false, Ordering::SeqCst);
        info!("{} ⏹ DecoderContext 已停止", log_ctx());
    }

    /// 清空所有包队列、帧队列与 codec 缓存
    pub fn flush(&self) {
        let mut codecs = LockSet::acquire(self.decoders().map(|d| (d.kind(), d.codec_mutex())));
        for demuxer in self.demuxers() {
            let _actions = demuxer.lock_actions();
            for queue in demuxer.queues().iter() {
                queue.dispose_packets();
            }
        }
        for decoder in self.decoders() {
            if let Some(slot) = codecs.get_mut(decoder.kind()) {
                decoder.flush_locked(slot);
            }
        }
    }

    pub fn set_renderer(&self, filler: Option<Arc<dyn PlaneFiller>>) {
        self.video_decoder.set_plane_filler(filler);
    }

    /// 主解封装器的缓存时长（ticks）
    pub fn buffered_duration(&self) -> i64 {
        self.main_demuxer.buffered_duration()
    }

    /// 主解封装器当前位置（相对起点的毫秒）
    fn main_time_ms(&self) -> i64 {
        (self.main_demuxer.cur_time() - self.main_demuxer.start_time()) / TICKS_PER_MS
    }

    // ========== Seek ==========

    /// 主 seek
    ///
    /// `ms` 为相对起点的毫秒（-1 表示当前位置）。返回 0 成功，-1 失败。
    /// 外部音频/数据流只做暂停与清空，并标记需要 `resync`。
    pub fn seek(&self, ms: i64, forward: bool, seek_in_queue: bool) -> i32 {
        let demuxer = if !self.main_demuxer.is_disposed() {
            &self.main_demuxer
        } else if !self.audio_demuxer.is_disposed() {
            &self.audio_demuxer
        } else {
            return -1;
        };
        let ms = if ms == -1 {
            (demuxer.cur_time() - demuxer.start_time()) / TICKS_PER_MS
        } else {
            ms
        };

        let ret = {
            let mut codecs = LockSet::acquire(self.decoders().map(|d| (d.kind(), d.codec_mutex())));

            let delay = if Arc::ptr_eq(demuxer, &self.audio_demuxer) {
                self.config.audio.delay
            } else {
                0
            };
            let (ticks, forward) = calc_seek_timestamp(demuxer.start_time(), demuxer.duration(), delay, ms, forward);

            let _actions = demuxer.lock_actions();
            let hard = demuxer.input_type() == InputType::Torrent
                || ms == 0
                || !seek_in_queue
                || !demuxer.seek_in_queue_locked(ticks, forward);

            let ret = if hard {
                demuxer.interrupter().force_interrupt(true);
                // 接收端由自身持有，发送不会失败
                let _ = self.events_tx.send(PipelineEvent::Buffering);
                let mut format = demuxer.lock_format();
                if demuxer.is_disposed() || !format.is_open() {
                    demuxer.interrupter().force_interrupt(false);
                    warn!("{} ⚠ seek 时解封装器已释放", log_ctx());
                    return -1;
                }
                demuxer.seek_format_locked(&mut format, ticks, forward)
            } else {
                0
            };

            for decoder in self.decoders() {
                if decoder.kind() != TrackKind::Video && !decoder.is_on(demuxer) {
                    continue;
                }
                if let Some(slot) = codecs.get_mut(decoder.kind()) {
                    decoder.flush_locked(slot);
                    if ms == 0 && decoder.kind() == TrackKind::Video {
                        slot.key_packet_required = false;
                    }
                }
            }
            info!("{} ⏩ seek {}ms → {} (forward={}, hard={}) = {}", log_ctx(), ms, ticks, forward, hard, ret);
            ret
        };

        if Arc::ptr_eq(demuxer, &self.main_demuxer) {
            for kind in [TrackKind::Audio, TrackKind::Data] {
                let decoder = self.decoder(kind);
                let external = self.external_demuxer(kind);
                if decoder.is_open() && !decoder.is_on(&self.main_demuxer) && !external.is_disposed() {
                    decoder.pause();
                    external.pause();
                    decoder.flush();
                    self.requires_resync.store(true, Ordering::SeqCst);
                }
            }
            for i in 0..self.subtitles_decoders.len() {
                let decoder = &self.subtitles_decoders[i];
                if decoder.is_open() && !decoder.is_on(&self.main_demuxer) {
                    self.seek_subtitles(i, ms);
                }
            }
        }

        if ret >= 0 && self.is_running() {
            demuxer.start();
            for decoder in self.decoders() {
                if decoder.is_on(demuxer) {
                    decoder.start();
                }
            }
        }
        ret
    }

    pub fn seek_audio(&self, ms: i64, forward: bool) -> i32 {
        self.seek_external(TrackKind::Audio, ms, forward)
    }

    pub fn seek_data(&self, ms: i64, forward: bool) -> i32 {
        self.seek_external(TrackKind::Data, ms, forward)
    }

    pub fn seek_subtitles(&self, index: usize, ms: i64) -> i32 {
        self.seek_external(TrackKind::Subtitles(index), ms, false)
    }

    /// 独立时钟流的 seek：内嵌于主输入或已禁用时不做任何事
    fn seek_external(&self, kind: TrackKind, ms: i64, forward: bool) -> i32 {
        let demuxer = self.external_demuxer(kind);
        let decoder = self.decoder(kind);
        if kind == TrackKind::Video
            || demuxer.is_disposed()
            || !decoder.is_on(demuxer)
            || !self.config.is_enabled(kind.media_type())
        {
            return -1;
        }
        let ms = if ms == -1 { self.main_time_ms() } else { ms };

        decoder.pause();
        demuxer.pause();

        let ret = {
            let _decoder_actions = decoder.lock_actions();
            let mut slot = decoder.lock_codec();
            let delay = if kind == TrackKind::Audio {
                self.config.audio.delay
            } else {
                0
            };
            let (ticks, forward) = calc_seek_timestamp(demuxer.start_time(), demuxer.duration(), delay, ms, forward);
            let _actions = demuxer.lock_actions();
            let ret = demuxer.seek_locked(ticks, forward, true);
            decoder.flush_locked(&mut slot);
            ret
        };
        demuxer.set_resync_pending(false);
        debug!("{} ⏩ [{}] 外部 seek {}ms = {}", log_ctx(), kind, ms, ret);

        if self.is_running() {
            demuxer.start();
            decoder.start();
        }
        ret
    }

    /// 是否有外部音频/数据流需要按视频时钟重新对齐
    pub fn requires_resync(&self) -> bool {
        self.requires_resync.load(Ordering::SeqCst)
            || [TrackKind::Audio, TrackKind::Data].into_iter().any(|kind| {
                let demuxer = self.external_demuxer(kind);
                !demuxer.is_disposed() && demuxer.resync_pending()
            })
    }

    /// 把外部音频/数据流 seek 到主解封装器当前位置（或 `timestamp`，相对 ticks，-1 表示当前）
    pub fn resync(&self, timestamp: i64) {
        let ms = if timestamp == -1 {
            self.main_time_ms()
        } else {
            timestamp / TICKS_PER_MS
        };
        for kind in [TrackKind::Audio, TrackKind::Data] {
            let demuxer = self.external_demuxer(kind);
            if !demuxer.is_disposed() && self.decoder(kind).is_on(demuxer) {
                self.seek_external(kind, ms, false);
            }
        }
        self.requires_resync.store(false, Ordering::SeqCst);
        info!("{} 🔄 重同步到 {}ms", log_ctx(), ms);
    }

    // ========== 精确 seek ==========

    /// 从当前位置解码到 `timestamp`（相对 ticks，-1 表示取第一帧），返回得到的帧时间戳，失败返回 -1
    ///
    /// 直接从视频队列或容器读包，绕过解码线程；调用前视频解码线程应处于暂停状态。
    pub fn get_video_frame(&self, timestamp: i64) -> i64 {
        let decoder = &self.video_decoder;
        let demuxer = &self.main_demuxer;
        if !decoder.is_open() || demuxer.is_disposed() {
            return -1;
        }

        let mut slot = decoder.lock_codec();
        let mut format = demuxer.lock_format();
        let half = slot.frame_duration() / 2;
        let start_time = demuxer.start_time();
        let mut allowed = self.config.decoder.max_errors;
        let video_queue = Arc::clone(&demuxer.queues().video);

        let mut count_error = |msg: &str| -> bool {
            allowed = allowed.saturating_sub(1);
            warn!("{} ⚠ 精确 seek 解码错误 (剩余 {}): {}", log_ctx(), allowed, msg);
            if allowed == 0 {
                error!("{} ❌ 精确 seek 错误过多，放弃", log_ctx());
                return false;
            }
            true
        };

        loop {
            if demuxer.interrupter().is_forced() || self.interrupt.is_set() || !slot.is_open() {
                return -1;
            }

            let packet = match video_queue.pop() {
                Some(packet) => packet,
                None => match demuxer.read_locked(&mut format) {
                    ReadOutcome::Packet(packet) => packet,
                    ReadOutcome::Eof | ReadOutcome::Closed | ReadOutcome::Interrupted => return -1,
                    ReadOutcome::Failed(e) => {
                        warn!("{} ⚠ 精确 seek 读取失败: {}", log_ctx(), e);
                        return -1;
                    }
                },
            };

            let targets = demuxer.targets(packet.stream_index);
            let Some(kind) = targets.first().copied() else {
                continue;
            };

            if kind != TrackKind::Video {
                let late_enough = timestamp == -1
                    || packet
                        .timestamp()
                        .map_or(false, |ts| ts - start_time + half >= timestamp);
                if late_enough {
                    demuxer.enqueue(packet);
                }
                continue;
            }

            if slot.key_packet_required {
                if !packet.is_key {
                    continue;
                }
                slot.key_packet_required = false;
            }

            let Some(codec) = slot.codec.as_mut() else {
                return -1;
            };
            match codec.send_packet(&packet) {
                Ok(()) | Err(CodecError::Again) => {}
                Err(CodecError::Eof) => return -1,
                Err(CodecError::Invalid(msg)) => {
                    if !count_error(&msg) {
                        return -1;
                    }
                    continue;
                }
            }

            loop {
                let Some(codec) = slot.codec.as_mut() else {
                    return -1;
                };
                match codec.receive_frame() {
                    Ok(decoded) => {
                        let Some(mut frame) = slot.make_frame(decoded) else {
                            continue;
                        };
                        if timestamp != -1 && frame.timestamp + half < timestamp {
                            continue;
                        }
                        let ts = frame.timestamp;
                        decoder.set_start_time(Some(ts));
                        decoder.fill_planes(&mut frame);
                        decoder.frames().push(frame);
                        decoder.receive_all_locked(&mut slot);
                        debug!("{} 🎯 精确 seek 命中 {} (目标 {})", log_ctx(), ts, timestamp);
                        return ts;
                    }
                    Err(CodecError::Again) => break,
                    Err(CodecError::Eof) => return -1,
                    Err(CodecError::Invalid(msg)) => {
                        if !count_error(&msg) {
                            return -1;
                        }
                        break;
                    }
                }
            }
        }
    }

    // ========== 录制 ==========

    /// 开始录制当前的视频/音频流，返回实际输出路径；无法开始时返回 None 并记录日志
    pub fn start_recording(&self, filename: &Path, use_recommended_extension: bool) -> Option<PathBuf> {
        if self.is_recording() {
            warn!("{} ⚠ 已在录制中", log_ctx());
            return None;
        }
        let video = self.video_decoder.stream();
        let audio = self.audio_decoder.stream();

        let mut path = filename.to_path_buf();
        if use_recommended_extension {
            path.set_extension(Remuxer::recommended_extension(
                video.as_ref().map(|s| s.codec.as_str()),
                audio.as_ref().map(|s| s.codec.as_str()),
            ));
        }

        let mut remuxer = Remuxer::new();
        let prepared = remuxer.open(self.backend.as_ref(), &path).and_then(|()| {
            if let Some(stream) = &video {
                remuxer.add_stream(TrackKind::Video, stream, false)?;
            }
            if let Some(stream) = &audio {
                let external = !self.audio_decoder.is_on(&self.main_demuxer);
                remuxer.add_stream(TrackKind::Audio, stream, external)?;
            }
            remuxer.write_header()
        });
        if let Err(e) = prepared {
            warn!("{} ⚠ 无法开始录制 {}: {}", log_ctx(), path.display(), e);
            return None;
        }

        let session = Arc::new(RecordingSession::new(remuxer, video.is_some(), self.events_tx.clone()));
        let target = self.config.decoder.max_video_frames.max(self.config.decoder.max_audio_frames);
        let audio_capacity = self.audio_decoder.frames().set_capacity(target);
        self.video_decoder.set_recording(Some(Arc::clone(&session)));
        self.audio_decoder.set_recording(Some(Arc::clone(&session)));
        *self.recording.lock() = Some(Recording {
            session,
            audio_capacity,
        });
        info!("{} 🔴 开始录制: {}", log_ctx(), path.display());
        Some(path)
    }

    pub fn stop_recording(&self) {
        let Some(recording) = self.recording.lock().take() else {
            return;
        };
        self.video_decoder.set_recording(None);
        self.audio_decoder.set_recording(None);
        recording.session.finish();
        self.audio_decoder.frames().set_capacity(recording.audio_capacity);
    }

    pub fn is_recording(&self) -> bool {
        self.recording
            .lock()
            .as_ref()
            .map_or(false, |r| r.session.is_active())
    }
}

impl Drop for DecoderContext {
    fn drop(&mut self) {
        self.stop();
    }
}
