use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 每毫秒的 tick 数（1 tick = 100ns）
pub const TICKS_PER_MS: i64 = 10_000;
/// 每秒的 tick 数
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// 基本流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Data,
}

/// 流水线中的轨道位置（决定使用哪个解封装器/解码器/队列）
///
/// 同时也是锁排序的依据：Video → Audio → Subtitles(0..N) → Data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackKind {
    Video,
    Audio,
    Subtitles(usize),
    Data,
}

impl TrackKind {
    pub fn media_type(&self) -> MediaType {
        match self {
            TrackKind::Video => MediaType::Video,
            TrackKind::Audio => MediaType::Audio,
            TrackKind::Subtitles(_) => MediaType::Subtitle,
            TrackKind::Data => MediaType::Data,
        }
    }

    /// 全局锁顺序中的位置
    pub fn order(&self) -> u16 {
        match self {
            TrackKind::Video => 0,
            TrackKind::Audio => 1,
            TrackKind::Subtitles(i) => 2 + *i as u16,
            TrackKind::Data => u16::MAX,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Subtitles(i) => write!(f, "subs#{}", i),
            TrackKind::Data => write!(f, "data"),
        }
    }
}

/// 时间基（有理数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 流时间戳 → ticks
    pub fn to_ticks(&self, ts: i64) -> i64 {
        if self.den == 0 {
            return 0;
        }
        (ts as i128 * self.num as i128 * TICKS_PER_SECOND as i128 / self.den as i128) as i64
    }

    /// ticks → 流时间戳
    pub fn from_ticks(&self, ticks: i64) -> i64 {
        if self.num == 0 {
            return 0;
        }
        (ticks as i128 * self.den as i128 / (self.num as i128 * TICKS_PER_SECOND as i128)) as i64
    }
}

impl Default for Rational {
    fn default() -> Self {
        // 微秒时间基
        Self::new(1, 1_000_000)
    }
}

/// 输入源分类（影响 seek 策略）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputType {
    File,
    Network,
    Torrent,
}

impl InputType {
    /// 从 URL 字符串判断输入类型
    pub fn from_url(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("magnet:") || lower.ends_with(".torrent") {
            InputType::Torrent
        } else if lower.starts_with("rtsp://")
            || lower.starts_with("rtmp://")
            || lower.starts_with("http://")
            || lower.starts_with("https://")
            || lower.contains(".m3u8")
        {
            InputType::Network
        } else {
            InputType::File
        }
    }
}

/// 后端私有的编解码参数（对核心不透明）
#[derive(Clone)]
pub struct NativeParameters(pub Arc<dyn Any + Send + Sync>);

impl fmt::Debug for NativeParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeParameters(..)")
    }
}

/// 基本流描述（打开后不可变）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub media_type: MediaType,
    pub codec: String,
    pub timebase: Rational,
    /// 起始时间（ticks）
    pub start_time: i64,
    /// 时长（ticks）
    pub duration: i64,
    pub bitrate: i64,
    /// 标称帧时长（ticks，仅视频）
    pub frame_duration: i64,
    /// 时间戳缺失时是否按帧时长自行补齐
    pub fix_timestamps: bool,
    pub language: Option<String>,
    #[serde(skip)]
    pub native: Option<NativeParameters>,
}

impl StreamInfo {
    pub fn new(index: usize, media_type: MediaType, codec: &str, timebase: Rational) -> Self {
        Self {
            index,
            media_type,
            codec: codec.to_string(),
            timebase,
            start_time: 0,
            duration: 0,
            bitrate: 0,
            frame_duration: 0,
            fix_timestamps: false,
            language: None,
            native: None,
        }
    }
}

/// 数据包负载
pub enum PacketData {
    Bytes(Vec<u8>),
    #[cfg(feature = "ffmpeg")]
    Native(ffmpeg_next::Packet),
}

impl Clone for PacketData {
    fn clone(&self) -> Self {
        match self {
            PacketData::Bytes(b) => PacketData::Bytes(b.clone()),
            #[cfg(feature = "ffmpeg")]
            PacketData::Native(p) => PacketData::Native(p.clone()),
        }
    }
}

/// 压缩数据包（所有权句柄）
///
/// 所有权沿 解封装器 → 包队列 → 解码器 单向移动，drop 即释放。
#[derive(Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub is_key: bool,
    /// 绝对时间戳（ticks），由解封装器按流时间基换算后写入
    ticks: Option<i64>,
    data: PacketData,
}

// ffmpeg 的 AVPacket 只被单个所有者访问
unsafe impl Send for Packet {}

impl Packet {
    pub fn new(stream_index: usize, data: PacketData) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            duration: 0,
            is_key: false,
            ticks: None,
            data,
        }
    }

    pub fn from_bytes(stream_index: usize, bytes: Vec<u8>) -> Self {
        Self::new(stream_index, PacketData::Bytes(bytes))
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self.dts = Some(pts);
        self
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn data(&self) -> &PacketData {
        &self.data
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            PacketData::Bytes(b) => b,
            #[cfg(feature = "ffmpeg")]
            PacketData::Native(p) => p.data().unwrap_or(&[]),
        }
    }

    /// 按时间基计算绝对 ticks（优先 PTS，退化为 DTS）
    pub(crate) fn stamp(&mut self, timebase: Rational) {
        self.ticks = self.pts.or(self.dts).map(|ts| timebase.to_ticks(ts));
    }

    /// 绝对时间戳（ticks）
    pub fn timestamp(&self) -> Option<i64> {
        self.ticks
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("stream_index", &self.stream_index)
            .field("pts", &self.pts)
            .field("key", &self.is_key)
            .field("ticks", &self.ticks)
            .finish()
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
}

/// 视频画面
#[derive(Debug, Clone)]
pub struct VideoPicture {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// 音频采样
#[derive(Debug, Clone)]
pub struct AudioSamples {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<f32>,
}

/// 字幕文本
#[derive(Debug, Clone)]
pub struct SubtitleText {
    pub text: String,
    /// 显示时长（ticks）
    pub display_duration: i64,
}

/// 解码后的负载
#[derive(Debug, Clone)]
pub enum FramePayload {
    Video(VideoPicture),
    Audio(AudioSamples),
    Subtitle(SubtitleText),
    Data(Vec<u8>),
}

/// 解码帧（时间戳已换算到统一 ticks，相对解封装器起始时间）
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp: i64,
    pub duration: i64,
    pub payload: FramePayload,
}

impl Frame {
    pub fn media_type(&self) -> MediaType {
        match self.payload {
            FramePayload::Video(_) => MediaType::Video,
            FramePayload::Audio(_) => MediaType::Audio,
            FramePayload::Subtitle(_) => MediaType::Subtitle,
            FramePayload::Data(_) => MediaType::Data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_ticks() {
        let tb = Rational::new(1, 1000);
        assert_eq!(tb.to_ticks(40), 40 * TICKS_PER_MS);
        assert_eq!(tb.from_ticks(40 * TICKS_PER_MS), 40);

        let tb = Rational::new(1, 90_000);
        assert_eq!(tb.to_ticks(90_000), TICKS_PER_SECOND);
    }

    #[test]
    fn test_input_type_from_url() {
        assert_eq!(InputType::from_url("/tmp/a.mkv"), InputType::File);
        assert_eq!(InputType::from_url("https://x/live.m3u8"), InputType::Network);
        assert_eq!(InputType::from_url("magnet:?xt=urn:btih:abc"), InputType::Torrent);
    }

    #[test]
    fn test_packet_stamp_prefers_pts() {
        let mut p = Packet::from_bytes(0, vec![1]);
        p.dts = Some(5);
        p.stamp(Rational::new(1, 1000));
        assert_eq!(p.timestamp(), Some(5 * TICKS_PER_MS));
        let mut p = p.with_pts(7);
        p.stamp(Rational::new(1, 1000));
        assert_eq!(p.timestamp(), Some(7 * TICKS_PER_MS));
    }
}
