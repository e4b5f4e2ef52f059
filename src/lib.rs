//! 播放器解封装/解码编排核心
//!
//! `DecoderContext` 把一个主输入和若干外部输入（音频、字幕、数据）组织成
//! 解封装线程 → 包队列 → 解码线程 → 帧队列 的流水线，提供 seek、重同步、
//! 精确定位与录制。原生多媒体库通过 `MediaBackend` 接入（`ffmpeg` feature）。

pub mod core;
pub mod player;

pub use crate::core::{Config, PlayerError, Result, TrackKind};
pub use crate::player::{DecoderContext, PipelineEvent};
