use anyhow::{anyhow, Context as _, Result};
use flyleaf_core::core::{Config, TrackKind, TICKS_PER_MS};
use flyleaf_core::player::{DecoderContext, FfmpegBackend, PipelineEvent, SubtitlesManager};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const USAGE: &str = "用法: flyleaf_probe <url> [--config 配置.json] [--audio url] [--subs 字幕文件] \
[--seek 毫秒] [--record 输出文件] [--seconds 秒]";

#[derive(Default)]
struct Args {
    url: String,
    config: Option<PathBuf>,
    audio: Option<String>,
    subs: Option<PathBuf>,
    seek_ms: Option<i64>,
    record: Option<PathBuf>,
    seconds: u64,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        seconds: 5,
        ..Args::default()
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = || iter.next().ok_or_else(|| anyhow!("{} 缺少参数\n{}", arg, USAGE));
        match arg.as_str() {
            "--config" => args.config = Some(value()?.into()),
            "--audio" => args.audio = Some(value()?),
            "--subs" => args.subs = Some(value()?.into()),
            "--seek" => args.seek_ms = Some(value()?.parse().context("--seek 需要毫秒数")?),
            "--record" => args.record = Some(value()?.into()),
            "--seconds" => args.seconds = value()?.parse().context("--seconds 需要整数")?,
            "-h" | "--help" => return Err(anyhow!(USAGE)),
            _ if args.url.is_empty() => args.url = arg.clone(),
            _ => return Err(anyhow!("未知参数: {}\n{}", arg, USAGE)),
        }
    }
    if args.url.is_empty() {
        return Err(anyhow!(USAGE));
    }
    Ok(args)
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => Config::load(path).map_err(|e| anyhow!("配置加载失败: {}", e))?,
        None => Config::default(),
    };

    let backend = Arc::new(FfmpegBackend::new().map_err(|e| anyhow!("FFmpeg 初始化失败: {}", e))?);
    let ctx = DecoderContext::new(Arc::new(config), backend);
    ctx.open(&args.url).map_err(|e| anyhow!("打开失败: {}", e))?;

    for stream in ctx.main_demuxer().streams() {
        info!(
            "  #{} {:?} {} (时长 {}ms, 语言 {:?})",
            stream.index,
            stream.media_type,
            stream.codec,
            stream.duration / TICKS_PER_MS,
            stream.language
        );
    }

    if let Some(url) = &args.audio {
        ctx.open_external(TrackKind::Audio, url)
            .map_err(|e| anyhow!("外部音频打开失败: {}", e))?;
    }

    let subtitles = SubtitlesManager::new();
    if let Some(path) = &args.subs {
        let count = subtitles.load_file(path).map_err(|e| anyhow!("字幕加载失败: {}", e))?;
        info!("📝 外部字幕 {} 条", count);
    }

    if let Some(ms) = args.seek_ms {
        if ctx.seek(ms, false, false) < 0 {
            warn!("⚠ seek 到 {}ms 失败", ms);
        } else {
            let ts = ctx.get_video_frame(ms * TICKS_PER_MS);
            info!("🎯 精确定位: 目标 {}ms → 帧 {}ms", ms, ts / TICKS_PER_MS);
        }
        if ctx.requires_resync() {
            ctx.resync(-1);
        }
    }

    if let Some(path) = &args.record {
        match ctx.start_recording(path, true) {
            Some(path) => info!("🔴 录制到 {}", path.display()),
            None => warn!("⚠ 无法开始录制"),
        }
    }

    let events = ctx.events();
    let video_frames = Arc::clone(ctx.decoder(TrackKind::Video).frames());
    let audio_frames = Arc::clone(ctx.decoder(TrackKind::Audio).frames());
    let (mut video_count, mut audio_count) = (0usize, 0usize);
    let mut last_sub = None;

    ctx.start();
    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    'probe: while Instant::now() < deadline {
        while let Some(frame) = video_frames.pop() {
            video_count += 1;
            subtitles.set_current_time(Duration::from_micros((frame.timestamp / 10).max(0) as u64));
            let current = subtitles.get_current().map(|s| s.display_text().to_string());
            if current.is_some() && current != last_sub {
                info!("💬 {}", current.as_deref().unwrap_or_default());
            }
            last_sub = current;
        }
        while audio_frames.pop().is_some() {
            audio_count += 1;
        }

        if ctx.requires_resync() {
            ctx.resync(-1);
        }
        while let Ok(event) = events.try_recv() {
            match event {
                PipelineEvent::DecoderEnded(TrackKind::Video) => {
                    info!("🏁 视频解码结束");
                    break 'probe;
                }
                PipelineEvent::RecordingCompleted(path) => info!("⏹ 录制完成: {}", path.display()),
                other => info!("事件: {:?}", other),
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    info!("📊 视频帧 {}，音频帧 {}，缓存 {}ms", video_count, audio_count, ctx.buffered_duration() / TICKS_PER_MS);
    ctx.stop_recording();
    ctx.stop();
    Ok(())
}
