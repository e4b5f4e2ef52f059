//! 测试用的合成后端：确定性的内存容器、直通 codec 与内存录制输出

use crate::core::config::DemuxerConfig;
use crate::core::{
    AudioSamples, FramePayload, Interrupter, MediaType, Packet, PixelFormat, PlayerError, Rational,
    Result, SampleFormat, StreamInfo, SubtitleText, VideoPicture, TICKS_PER_MS,
};
use crate::player::backend::MediaBackend;
use crate::player::codec::{CodecContext, CodecError, DecodedFrame};
use crate::player::demuxer_source::DemuxerSource;
use crate::player::remuxer::MuxSink;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const CORRUPT: &[u8] = b"corrupt";

/// 合成容器描述
#[derive(Debug, Clone)]
pub struct SyntheticMedia {
    pub fps: i64,
    pub gop: usize,
    pub frames: usize,
    /// 起始时间（毫秒）
    pub start_ms: i64,
    pub video: bool,
    pub audio: bool,
    pub subtitles: bool,
    /// 每 5 帧一个数据包
    pub data: bool,
    /// 数据损坏的视频帧序号
    pub corrupt: HashSet<usize>,
    /// 读取若干个包后阻塞，直到被中断
    pub stall_after: Option<usize>,
    pub codec_latency: usize,
}

impl Default for SyntheticMedia {
    fn default() -> Self {
        Self {
            fps: 25,
            gop: 10,
            frames: 250,
            start_ms: 0,
            video: true,
            audio: false,
            subtitles: false,
            data: false,
            corrupt: HashSet::new(),
            stall_after: None,
            codec_latency: 1,
        }
    }
}

impl SyntheticMedia {
    pub fn audio_only(frames: usize) -> Self {
        Self {
            video: false,
            audio: true,
            frames,
            ..Self::default()
        }
    }

    pub fn data_only(frames: usize) -> Self {
        Self {
            video: false,
            data: true,
            frames,
            ..Self::default()
        }
    }

    pub fn frame_ms(&self) -> i64 {
        1000 / self.fps
    }

    pub fn duration_ms(&self) -> i64 {
        self.frames as i64 * self.frame_ms()
    }

    fn streams(&self) -> Vec<StreamInfo> {
        let timebase = Rational::new(1, 1000);
        let mut streams = Vec::new();
        let mut push = |media_type, codec: &str| {
            let mut stream = StreamInfo::new(streams.len(), media_type, codec, timebase);
            stream.start_time = self.start_ms * TICKS_PER_MS;
            stream.duration = self.duration_ms() * TICKS_PER_MS;
            stream.frame_duration = self.frame_ms() * TICKS_PER_MS;
            streams.push(stream);
        };
        if self.video {
            push(MediaType::Video, "h264");
        }
        if self.audio {
            push(MediaType::Audio, "aac");
        }
        if self.subtitles {
            push(MediaType::Subtitle, "subrip");
        }
        if self.data {
            push(MediaType::Data, "bin_data");
        }
        streams
    }
}

/// 后端调用统计
#[derive(Debug, Default)]
pub struct SyntheticStats {
    pub reads: AtomicUsize,
    pub opens: AtomicUsize,
    pub seeks: Mutex<Vec<(String, i64)>>,
}

pub struct SyntheticSource {
    url: String,
    media: SyntheticMedia,
    streams: Vec<StreamInfo>,
    next_frame: usize,
    pending: VecDeque<Packet>,
    reads: usize,
    interrupter: Arc<Interrupter>,
    stats: Arc<SyntheticStats>,
}

impl SyntheticSource {
    fn stream_index(&self, media_type: MediaType) -> Option<usize> {
        self.streams.iter().find(|s| s.media_type == media_type).map(|s| s.index)
    }

    /// 生成第 i 帧对应的交织包：视频、音频、每秒一个字幕包、每 5 帧一个数据包
    fn generate(&mut self, i: usize) {
        let pts = self.media.start_ms + i as i64 * self.media.frame_ms();
        if let Some(index) = self.stream_index(MediaType::Video) {
            let data = if self.media.corrupt.contains(&i) {
                CORRUPT.to_vec()
            } else {
                (i as u32).to_le_bytes().to_vec()
            };
            let mut p = Packet::from_bytes(index, data)
                .with_pts(pts)
                .with_key(i % self.media.gop == 0);
            p.duration = self.media.frame_ms();
            self.pending.push_back(p);
        }
        if let Some(index) = self.stream_index(MediaType::Audio) {
            let mut p = Packet::from_bytes(index, vec![1]).with_pts(pts).with_key(true);
            p.duration = self.media.frame_ms();
            self.pending.push_back(p);
        }
        if let Some(index) = self.stream_index(MediaType::Subtitle) {
            if i as i64 % self.media.fps == 0 {
                let p = Packet::from_bytes(index, format!("sub{}", i).into_bytes())
                    .with_pts(pts)
                    .with_key(true);
                self.pending.push_back(p);
            }
        }
        if let Some(index) = self.stream_index(MediaType::Data) {
            if i % 5 == 0 {
                let p = Packet::from_bytes(index, format!("data{}", i).into_bytes())
                    .with_pts(pts)
                    .with_key(true);
                self.pending.push_back(p);
            }
        }
    }

    fn is_key(&self, frame: usize) -> bool {
        !self.media.video || frame % self.media.gop == 0
    }
}

impl DemuxerSource for SyntheticSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn start_time(&self) -> i64 {
        self.media.start_ms * TICKS_PER_MS
    }

    fn duration(&self) -> i64 {
        self.media.duration_ms() * TICKS_PER_MS
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.media.stall_after.map_or(false, |n| self.reads >= n) {
            while !self.interrupter.should_interrupt() {
                thread::sleep(Duration::from_millis(1));
            }
            return Err(PlayerError::Interrupted);
        }

        // 稀疏流（只有字幕或数据）的某些帧不产生任何包
        while self.pending.is_empty() {
            if self.next_frame >= self.media.frames {
                return Ok(None);
            }
            let frame = self.next_frame;
            self.next_frame += 1;
            self.generate(frame);
        }
        self.reads += 1;
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.pending.pop_front())
    }

    fn seek(&mut self, ticks: i64, forward: bool) -> Result<()> {
        self.stats.seeks.lock().push((self.url.clone(), ticks));
        let offset_ms = ticks / TICKS_PER_MS - self.media.start_ms;
        if offset_ms < 0 || offset_ms > self.media.duration_ms() {
            return Err(PlayerError::Other(format!("seek 超出范围: {}", ticks)));
        }
        let target = (offset_ms / self.media.frame_ms()) as usize;
        let frame = if forward {
            (target..self.media.frames).find(|f| self.is_key(*f))
        } else {
            (0..=target.min(self.media.frames.saturating_sub(1))).rev().find(|f| self.is_key(*f))
        };
        let frame = frame.ok_or_else(|| PlayerError::Other("附近没有关键帧".to_string()))?;
        self.next_frame = frame;
        self.pending.clear();
        Ok(())
    }

    fn description(&self) -> String {
        format!("synthetic {}", self.url)
    }
}

/// 带固定延迟的直通 codec
pub struct SyntheticCodec {
    media_type: MediaType,
    latency: usize,
    pending: VecDeque<DecodedFrame>,
    eof: bool,
}

impl CodecContext for SyntheticCodec {
    fn send_packet(&mut self, packet: &Packet) -> std::result::Result<(), CodecError> {
        if packet.bytes() == CORRUPT {
            return Err(CodecError::Invalid("损坏的数据包".to_string()));
        }
        let payload = match self.media_type {
            MediaType::Video => FramePayload::Video(VideoPicture {
                width: 2,
                height: 2,
                format: PixelFormat::RGBA,
                data: vec![0; 16],
            }),
            MediaType::Audio => FramePayload::Audio(AudioSamples {
                sample_rate: 48_000,
                channels: 2,
                format: SampleFormat::F32,
                data: vec![0.0; 4],
            }),
            MediaType::Subtitle => FramePayload::Subtitle(SubtitleText {
                text: String::from_utf8_lossy(packet.bytes()).into_owned(),
                display_duration: 1000 * TICKS_PER_MS,
            }),
            MediaType::Data => FramePayload::Data(packet.bytes().to_vec()),
        };
        self.pending.push_back(DecodedFrame {
            pts: packet.pts,
            best_effort_timestamp: packet.pts,
            duration: packet.duration,
            payload,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> std::result::Result<DecodedFrame, CodecError> {
        if self.pending.len() > self.latency || (self.eof && !self.pending.is_empty()) {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }
        }
        if self.eof {
            Err(CodecError::Eof)
        } else {
            Err(CodecError::Again)
        }
    }

    fn send_eof(&mut self) -> std::result::Result<(), CodecError> {
        self.eof = true;
        Ok(())
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.eof = false;
    }

    fn name(&self) -> String {
        format!("synthetic-{:?}", self.media_type)
    }
}

#[derive(Debug, Default)]
pub struct MemoryOutput {
    pub streams: Vec<String>,
    pub header: bool,
    /// (输出流索引, PTS)
    pub packets: Vec<(usize, Option<i64>)>,
    pub trailer: bool,
}

/// 写入内存的录制输出
#[derive(Clone, Default)]
pub struct MemorySink {
    output: Arc<Mutex<MemoryOutput>>,
}

impl MemorySink {
    pub fn written(&self) -> Arc<Mutex<MemoryOutput>> {
        Arc::clone(&self.output)
    }
}

impl MuxSink for MemorySink {
    fn add_stream(&mut self, stream: &StreamInfo) -> Result<usize> {
        let mut output = self.output.lock();
        output.streams.push(stream.codec.clone());
        Ok(output.streams.len() - 1)
    }

    fn write_header(&mut self) -> Result<()> {
        self.output.lock().header = true;
        Ok(())
    }

    fn write_packet(&mut self, out_index: usize, packet: &Packet, _timebase: Rational) -> Result<()> {
        self.output.lock().packets.push((out_index, packet.pts));
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.output.lock().trailer = true;
        Ok(())
    }
}

/// 合成后端：按 URL 选择容器描述，未登记的 URL 使用默认描述
pub struct SyntheticBackend {
    default_media: SyntheticMedia,
    inputs: HashMap<String, SyntheticMedia>,
    sink: MemorySink,
    pub stats: Arc<SyntheticStats>,
}

impl SyntheticBackend {
    pub fn new(media: SyntheticMedia) -> Self {
        Self {
            default_media: media,
            inputs: HashMap::new(),
            sink: MemorySink::default(),
            stats: Arc::new(SyntheticStats::default()),
        }
    }

    pub fn with_input(mut self, url: &str, media: SyntheticMedia) -> Self {
        self.inputs.insert(url.to_string(), media);
        self
    }

    pub fn with_sink(mut self, sink: MemorySink) -> Self {
        self.sink = sink;
        self
    }

    pub fn sink(&self) -> &MemorySink {
        &self.sink
    }

    /// 指定 URL 上发生过的 seek（ticks）
    pub fn seeks_on(&self, url: &str) -> Vec<i64> {
        self.stats
            .seeks
            .lock()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, ticks)| *ticks)
            .collect()
    }

    fn media_for(&self, url: &str) -> SyntheticMedia {
        self.inputs.get(url).cloned().unwrap_or_else(|| self.default_media.clone())
    }
}

impl MediaBackend for SyntheticBackend {
    fn open_input(
        &self,
        url: &str,
        interrupter: Arc<Interrupter>,
        _config: &DemuxerConfig,
    ) -> Result<Box<dyn DemuxerSource>> {
        if url.contains("missing") {
            return Err(PlayerError::OpenError(format!("找不到输入: {}", url)));
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        let media = self.media_for(url);
        Ok(Box::new(SyntheticSource {
            url: url.to_string(),
            streams: media.streams(),
            media,
            next_frame: 0,
            pending: VecDeque::new(),
            reads: 0,
            interrupter,
            stats: Arc::clone(&self.stats),
        }))
    }

    fn open_codec(&self, stream: &StreamInfo) -> Result<Box<dyn CodecContext>> {
        Ok(Box::new(SyntheticCodec {
            media_type: stream.media_type,
            latency: self.default_media.codec_latency,
            pending: VecDeque::new(),
            eof: false,
        }))
    }

    fn open_muxer(&self, _path: &Path) -> Result<Box<dyn MuxSink>> {
        Ok(Box::new(self.sink.clone()))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
