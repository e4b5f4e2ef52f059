use crate::core::{FramePayload, Packet};
use std::collections::VecDeque;
use thiserror::Error;

/// 编解码调用结果
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// 需要更多输入 / 输出缓冲已满（EAGAIN）
    #[error("codec 暂无输出")]
    Again,
    #[error("codec 已到达结尾")]
    Eof,
    #[error("无效数据: {0}")]
    Invalid(String),
}

/// codec 输出的原始帧（时间戳仍为流时间基）
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub pts: Option<i64>,
    pub best_effort_timestamp: Option<i64>,
    pub duration: i64,
    pub payload: FramePayload,
}

/// 单个流的编解码上下文（send/receive 模型）
pub trait CodecContext: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), CodecError>;

    fn receive_frame(&mut self) -> Result<DecodedFrame, CodecError>;

    /// 通知输入结束，之后 receive 会吐出内部缓存的帧
    fn send_eof(&mut self) -> Result<(), CodecError>;

    /// 丢弃内部缓存（seek 后）
    fn flush(&mut self);

    fn name(&self) -> String;
}

/// 数据流直通"解码器"：包内容原样作为帧输出
#[derive(Default)]
pub struct PassthroughCodec {
    pending: VecDeque<DecodedFrame>,
    eof: bool,
}

impl PassthroughCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodecContext for PassthroughCodec {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), CodecError> {
        if self.eof {
            return Err(CodecError::Eof);
        }
        self.pending.push_back(DecodedFrame {
            pts: packet.pts,
            best_effort_timestamp: packet.pts.or(packet.dts),
            duration: packet.duration,
            payload: FramePayload::Data(packet.bytes().to_vec()),
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodedFrame, CodecError> {
        match self.pending.pop_front() {
            Some(frame) => Ok(frame),
            None if self.eof => Err(CodecError::Eof),
            None => Err(CodecError::Again),
        }
    }

    fn send_eof(&mut self) -> Result<(), CodecError> {
        self.eof = true;
        Ok(())
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.eof = false;
    }

    fn name(&self) -> String {
        "passthrough".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_cycle() {
        let mut codec = PassthroughCodec::new();
        assert_eq!(codec.receive_frame().unwrap_err(), CodecError::Again);
        codec.send_packet(&Packet::from_bytes(3, vec![1, 2]).with_pts(9)).unwrap();
        let frame = codec.receive_frame().unwrap();
        assert_eq!(frame.best_effort_timestamp, Some(9));
        assert!(matches!(frame.payload, FramePayload::Data(ref d) if d == &[1, 2]));

        codec.send_eof().unwrap();
        assert_eq!(codec.receive_frame().unwrap_err(), CodecError::Eof);
        codec.flush();
        assert_eq!(codec.receive_frame().unwrap_err(), CodecError::Again);
    }
}
