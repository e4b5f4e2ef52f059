use crate::core::{MediaType, Result, TrackKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// 流水线配置（构造时注入，核心内部只读）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub demuxer: DemuxerConfig,
    pub decoder: DecoderConfig,
    pub video: StreamConfig,
    pub audio: AudioConfig,
    pub subtitles: SubtitlesConfig,
    pub data: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxerConfig {
    pub max_video_packets: usize,
    pub max_audio_packets: usize,
    pub max_subtitle_packets: usize,
    pub max_data_packets: usize,
    /// 阻塞调用超时（毫秒，0 表示不限）
    pub open_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub seek_timeout_ms: u64,
    /// 连续读取错误上限
    pub max_read_errors: u32,
    /// 透传给原生后端的格式选项
    pub format_options: BTreeMap<String, String>,
}

impl Default for DemuxerConfig {
    fn default() -> Self {
        Self {
            max_video_packets: 600,
            max_audio_packets: 300,
            max_subtitle_packets: 64,
            max_data_packets: 64,
            open_timeout_ms: 15_000,
            read_timeout_ms: 8_000,
            seek_timeout_ms: 8_000,
            max_read_errors: 30,
            format_options: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// 允许的解码错误次数
    pub max_errors: u32,
    pub max_video_frames: usize,
    pub max_audio_frames: usize,
    pub max_subtitle_frames: usize,
    pub max_data_frames: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_errors: 30,
            max_video_frames: 4,
            max_audio_frames: 10,
            max_subtitle_frames: 2,
            max_data_frames: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    /// 音频延迟（ticks）
    pub delay: i64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitlesConfig {
    pub enabled: bool,
    /// 同时显示的字幕轨数量
    pub max_tracks: usize,
}

impl Default for SubtitlesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tracks: 2,
        }
    }
}

impl Config {
    /// 从 JSON 字符串解析
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_enabled(&self, media_type: MediaType) -> bool {
        match media_type {
            MediaType::Video => self.video.enabled,
            MediaType::Audio => self.audio.enabled,
            MediaType::Subtitle => self.subtitles.enabled,
            MediaType::Data => self.data.enabled,
        }
    }

    pub fn max_packets(&self, kind: TrackKind) -> usize {
        match kind {
            TrackKind::Video => self.demuxer.max_video_packets,
            TrackKind::Audio => self.demuxer.max_audio_packets,
            TrackKind::Subtitles(_) => self.demuxer.max_subtitle_packets,
            TrackKind::Data => self.demuxer.max_data_packets,
        }
    }

    pub fn max_frames(&self, kind: TrackKind) -> usize {
        match kind {
            TrackKind::Video => self.decoder.max_video_frames,
            TrackKind::Audio => self.decoder.max_audio_frames,
            TrackKind::Subtitles(_) => self.decoder.max_subtitle_frames,
            TrackKind::Data => self.decoder.max_data_frames,
        }
    }

    pub fn subtitle_tracks(&self) -> usize {
        self.subtitles.max_tracks.max(1)
    }
}
