use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置错误: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("无法打开输入: {0}")]
    OpenError(String),

    #[error("无法找到视频流")]
    NoVideoStream,

    #[error("无效的流: {0}")]
    InvalidStream(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("操作被中断")]
    Interrupted,

    #[error("对象已释放")]
    Disposed,

    #[error("录制错误: {0}")]
    RemuxError(String),

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
