use crate::core::{Packet, PlayerError, Rational, Result, StreamInfo, TrackKind};
use crate::player::backend::MediaBackend;
use crate::player::decoder_context::PipelineEvent;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// 录制输出（容器写入端）
pub trait MuxSink: Send {
    /// 按输入流参数添加输出流，返回输出流索引
    fn add_stream(&mut self, stream: &StreamInfo) -> Result<usize>;

    fn write_header(&mut self) -> Result<()>;

    /// 写入一个包（PTS/DTS 已换算到 `timebase`）
    fn write_packet(&mut self, out_index: usize, packet: &Packet, timebase: Rational) -> Result<()>;

    fn write_trailer(&mut self) -> Result<()>;
}

struct OutputStream {
    index: usize,
    timebase: Rational,
    external: bool,
}

/// 重封装器：把解码前的压缩包原样写入新容器
///
/// 内嵌流共用一个时间零点；外部时间基的流各自独立对齐。
pub struct Remuxer {
    filename: PathBuf,
    sink: Option<Box<dyn MuxSink>>,
    streams: HashMap<TrackKind, OutputStream>,
    /// 内嵌流的时间零点（ticks）
    shared_base: Option<i64>,
    external_bases: HashMap<TrackKind, i64>,
    header_written: bool,
}

impl Default for Remuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Remuxer {
    pub fn new() -> Self {
        Self {
            filename: PathBuf::new(),
            sink: None,
            streams: HashMap::new(),
            shared_base: None,
            external_bases: HashMap::new(),
            header_written: false,
        }
    }

    /// 根据音视频编码推荐容器扩展名
    pub fn recommended_extension(video_codec: Option<&str>, audio_codec: Option<&str>) -> &'static str {
        let mp4_video = video_codec.map_or(true, |c| matches!(c, "h264" | "hevc" | "av1"));
        let mp4_audio = audio_codec.map_or(true, |c| matches!(c, "aac" | "mp3"));
        if mp4_video && mp4_audio {
            "mp4"
        } else {
            "mkv"
        }
    }

    pub fn open(&mut self, backend: &dyn MediaBackend, filename: &Path) -> Result<()> {
        self.dispose();
        self.sink = Some(backend.open_muxer(filename)?);
        self.filename = filename.to_path_buf();
        info!("🔴 录制输出: {}", filename.display());
        Ok(())
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// 添加输出流；`external` 表示该流来自独立时钟的外部解封装器
    pub fn add_stream(&mut self, kind: TrackKind, stream: &StreamInfo, external: bool) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(PlayerError::Disposed)?;
        let index = sink.add_stream(stream)?;
        debug!("录制添加流 {} → #{} ({})", kind, index, stream.codec);
        self.streams.insert(
            kind,
            OutputStream {
                index,
                timebase: stream.timebase,
                external,
            },
        );
        Ok(())
    }

    pub fn has_streams(&self) -> bool {
        !self.streams.is_empty()
    }

    pub fn write_header(&mut self) -> Result<()> {
        if !self.has_streams() {
            return Err(PlayerError::RemuxError("没有可录制的流".to_string()));
        }
        let sink = self.sink.as_mut().ok_or(PlayerError::Disposed)?;
        sink.write_header()?;
        self.header_written = true;
        Ok(())
    }

    /// 写入一个包，时间戳对齐到录制起点
    pub fn write(&mut self, packet: &Packet, kind: TrackKind) -> Result<()> {
        if !self.header_written {
            return Err(PlayerError::RemuxError("尚未写入文件头".to_string()));
        }
        let Some(out) = self.streams.get(&kind) else {
            return Ok(());
        };
        let Some(ticks) = packet.timestamp() else {
            return Ok(());
        };

        let base = if out.external {
            *self.external_bases.entry(kind).or_insert(ticks)
        } else {
            *self.shared_base.get_or_insert(ticks)
        };
        let offset = out.timebase.from_ticks(base);

        let mut rebased = packet.clone();
        rebased.pts = packet.pts.map(|ts| ts - offset);
        rebased.dts = packet.dts.map(|ts| ts - offset);
        if rebased.dts.map_or(false, |dts| dts < 0) {
            return Ok(());
        }

        let (index, timebase) = (out.index, out.timebase);
        let sink = self.sink.as_mut().ok_or(PlayerError::Disposed)?;
        sink.write_packet(index, &rebased, timebase)
    }

    /// 写入文件尾并关闭输出
    pub fn dispose(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if self.header_written {
                if let Err(e) = sink.write_trailer() {
                    warn!("⚠ 写入文件尾失败: {}", e);
                }
            }
        }
        self.streams.clear();
        self.external_bases.clear();
        self.shared_base = None;
        self.header_written = false;
    }
}

impl Drop for Remuxer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// 一次录制会话（挂在视频/音频解码器上）
pub struct RecordingSession {
    remuxer: Mutex<Remuxer>,
    filename: PathBuf,
    has_video: bool,
    /// 有视频时从第一个视频关键帧开始写入
    started: AtomicBool,
    active: AtomicBool,
    events: Sender<PipelineEvent>,
}

impl RecordingSession {
    pub fn new(remuxer: Remuxer, has_video: bool, events: Sender<PipelineEvent>) -> Self {
        Self {
            filename: remuxer.filename().to_path_buf(),
            remuxer: Mutex::new(remuxer),
            has_video,
            started: AtomicBool::new(!has_video),
            active: AtomicBool::new(true),
            events,
        }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn write(&self, packet: &Packet, kind: TrackKind) {
        if !self.is_active() {
            return;
        }
        if !self.started.load(Ordering::SeqCst) {
            if kind != TrackKind::Video || !packet.is_key {
                return;
            }
            self.started.store(true, Ordering::SeqCst);
        }
        if let Err(e) = self.remuxer.lock().write(packet, kind) {
            warn!("⚠ 录制写入失败 ({}): {}", kind, e);
        }
    }

    /// 解码器到达结尾；有视频时只等待视频解码器
    pub fn decoder_ended(&self, kind: TrackKind) {
        if kind == TrackKind::Video || !self.has_video {
            self.finish();
        }
    }

    /// 结束录制并通知
    pub fn finish(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.remuxer.lock().dispose();
        info!("⏹ 录制完成: {}", self.filename.display());
        let _ = self.events.send(PipelineEvent::RecordingCompleted(self.filename.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MediaType;
    use crate::player::testing::{MemorySink, SyntheticBackend, SyntheticMedia};
    use crossbeam_channel::unbounded;

    fn packet(index: usize, pts: i64, key: bool) -> Packet {
        let mut p = Packet::from_bytes(index, vec![0]).with_pts(pts).with_key(key);
        p.stamp(Rational::new(1, 1000));
        p
    }

    #[test]
    fn test_recommended_extension() {
        assert_eq!(Remuxer::recommended_extension(Some("h264"), Some("aac")), "mp4");
        assert_eq!(Remuxer::recommended_extension(Some("hevc"), None), "mp4");
        assert_eq!(Remuxer::recommended_extension(Some("vp9"), Some("opus")), "mkv");
        assert_eq!(Remuxer::recommended_extension(Some("h264"), Some("flac")), "mkv");
    }

    #[test]
    fn test_write_requires_streams_and_header() {
        let backend = SyntheticBackend::new(SyntheticMedia::default());
        let mut remuxer = Remuxer::new();
        remuxer.open(&backend, Path::new("/tmp/out.mkv")).unwrap();
        assert!(remuxer.write_header().is_err());
        let stream = StreamInfo::new(0, MediaType::Video, "h264", Rational::new(1, 1000));
        remuxer.add_stream(TrackKind::Video, &stream, false).unwrap();
        assert!(remuxer.write(&packet(0, 10, true), TrackKind::Video).is_err());
        remuxer.write_header().unwrap();
        remuxer.write(&packet(0, 10, true), TrackKind::Video).unwrap();
    }

    #[test]
    fn test_session_starts_at_keyframe_and_rebases() {
        let sink = MemorySink::default();
        let written = sink.written();
        let backend = SyntheticBackend::new(SyntheticMedia::default()).with_sink(sink);
        let mut remuxer = Remuxer::new();
        remuxer.open(&backend, Path::new("/tmp/rec.mp4")).unwrap();
        let video = StreamInfo::new(0, MediaType::Video, "h264", Rational::new(1, 1000));
        let audio = StreamInfo::new(0, MediaType::Audio, "aac", Rational::new(1, 1000));
        remuxer.add_stream(TrackKind::Video, &video, false).unwrap();
        remuxer.add_stream(TrackKind::Audio, &audio, true).unwrap();
        remuxer.write_header().unwrap();

        let (tx, rx) = unbounded();
        let session = RecordingSession::new(remuxer, true, tx);
        session.write(&packet(0, 960, false), TrackKind::Video);
        session.write(&packet(0, 5000, false), TrackKind::Audio);
        session.write(&packet(0, 1000, true), TrackKind::Video);
        session.write(&packet(0, 1040, false), TrackKind::Video);
        session.write(&packet(0, 7000, true), TrackKind::Audio);

        session.decoder_ended(TrackKind::Audio);
        assert!(session.is_active());
        session.decoder_ended(TrackKind::Video);
        assert!(!session.is_active());
        assert_eq!(
            rx.try_recv().unwrap(),
            PipelineEvent::RecordingCompleted(PathBuf::from("/tmp/rec.mp4"))
        );

        let written = written.lock();
        let pts: Vec<_> = written.packets.iter().map(|(i, pts)| (*i, *pts)).collect();
        assert_eq!(pts, vec![(0, Some(0)), (0, Some(40)), (1, Some(0))]);
        assert!(written.trailer);
    }
}
