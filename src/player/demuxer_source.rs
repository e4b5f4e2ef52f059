use crate::core::{Result, StreamInfo};

/// 格式读取上下文的抽象接口（容器层）
///
/// 不同的后端（FFmpeg、测试用的合成源等）实现这个接口。
/// 阻塞调用（读取/seek）必须轮询打开时传入的 `Interrupter`，被中断时返回
/// `PlayerError::Interrupted`。
pub trait DemuxerSource: Send {
    /// 容器中的所有流
    fn streams(&self) -> &[StreamInfo];

    /// 容器起始时间（ticks）
    fn start_time(&self) -> i64;

    /// 容器时长（ticks）
    fn duration(&self) -> i64;

    /// 读取下一个数据包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包（PTS/DTS 为流时间基）
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误或被中断
    fn read_packet(&mut self) -> Result<Option<crate::core::Packet>>;

    /// Seek 到指定绝对时间（ticks）
    ///
    /// `forward` 为 true 时取目标之后最近的关键帧，否则取之前的。
    fn seek(&mut self, ticks: i64, forward: bool) -> Result<()>;

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        true
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
