// 解封装 / 解码编排

pub mod backend;
pub mod codec;
pub mod decoder;
pub mod decoder_context;
pub mod demuxer;
pub mod demuxer_source;
pub mod demuxer_thread;
pub mod external_subtitle;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_backend;
pub mod frame_queue;
pub mod lock_order;
pub mod packet_queue;
pub mod remuxer;
pub mod subtitles_manager;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::MediaBackend;
pub use codec::{CodecContext, CodecError, DecodedFrame, PassthroughCodec};
pub use decoder::{Decoder, PlaneFiller};
pub use decoder_context::{calc_seek_timestamp, DecoderContext, PipelineEvent};
pub use demuxer::Demuxer;
pub use demuxer_source::DemuxerSource;
pub use external_subtitle::ExternalSubtitleParser;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_backend::FfmpegBackend;
pub use remuxer::{MuxSink, RecordingSession, Remuxer};
pub use subtitles_manager::{PositionState, SubtitleData, SubtitlesManager};
pub use worker::Status;

use std::process;
use std::thread;

/// 日志前缀：进程与线程标识
pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
