use crate::core::config::DemuxerConfig;
use crate::core::{Interrupter, Result, StreamInfo};
use crate::player::codec::CodecContext;
use crate::player::demuxer_source::DemuxerSource;
use crate::player::remuxer::MuxSink;
use std::path::Path;
use std::sync::Arc;

/// 原生多媒体库的入口
///
/// 核心只通过这个接口打开容器、创建 codec 和录制输出，
/// 不直接接触原生结构体。
pub trait MediaBackend: Send + Sync {
    /// 打开输入（阻塞，需轮询 `interrupter`）
    fn open_input(
        &self,
        url: &str,
        interrupter: Arc<Interrupter>,
        config: &DemuxerConfig,
    ) -> Result<Box<dyn DemuxerSource>>;

    /// 为指定流创建解码上下文
    fn open_codec(&self, stream: &StreamInfo) -> Result<Box<dyn CodecContext>>;

    /// 创建录制输出
    fn open_muxer(&self, path: &Path) -> Result<Box<dyn MuxSink>>;

    fn name(&self) -> &str;
}
