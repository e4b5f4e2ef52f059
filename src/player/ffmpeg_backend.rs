use crate::core::config::DemuxerConfig;
use crate::core::{
    AudioSamples, FramePayload, InputType, Interrupter, MediaType, NativeParameters, Packet, PacketData,
    PixelFormat, PlayerError, Rational, Result, SampleFormat, StreamInfo, SubtitleText, VideoPicture,
    TICKS_PER_MS, TICKS_PER_SECOND,
};
use crate::player::backend::MediaBackend;
use crate::player::codec::{CodecContext, CodecError, DecodedFrame};
use crate::player::demuxer_source::DemuxerSource;
use crate::player::external_subtitle::ExternalSubtitleParser;
use crate::player::log_ctx;
use crate::player::remuxer::MuxSink;
use ffmpeg_next as ffmpeg;
use ffmpeg::{codec, encoder, ffi, format, media, software, util};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::ffi::{c_void, CString};
use std::os::raw::c_int;
use std::path::Path;
use std::ptr;
use std::sync::Arc;

/// AV_TIME_BASE（微秒）→ ticks
const TICKS_PER_AV_UNIT: i64 = 10;
/// 字幕未给出结束时间时的显示时长
const DEFAULT_SUBTITLE_MS: i64 = 3000;

/// 基于 FFmpeg 的后端
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        ffmpeg::init()?;
        info!("{} ✅ FFmpeg 初始化成功", log_ctx());
        Ok(Self)
    }

    /// 网络输入的默认选项，再叠加配置中的 format_options
    fn open_options(url: &str, config: &DemuxerConfig) -> ffmpeg::Dictionary<'static> {
        let mut options = ffmpeg::Dictionary::new();
        if InputType::from_url(url) == InputType::Network {
            options.set("fflags", "+discardcorrupt+genpts");
            options.set("analyzeduration", "5000000");
            options.set("probesize", "10000000");
            options.set("buffer_size", "8388608");
            options.set("max_delay", "500000");
            if config.read_timeout_ms > 0 {
                // 微秒
                options.set("rw_timeout", &(config.read_timeout_ms * 1000).to_string());
            }
            options.set("reconnect", "1");
            options.set("reconnect_streamed", "1");
            options.set("reconnect_delay_max", "4");
            if url.contains(".m3u8") {
                options.set("live_start_index", "-1");
                options.set("max_reload", "10");
                options.set("http_persistent", "1");
            }
        }
        for (key, value) in &config.format_options {
            options.set(key, value);
        }
        options
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_input(
        &self,
        url: &str,
        interrupter: Arc<Interrupter>,
        config: &DemuxerConfig,
    ) -> Result<Box<dyn DemuxerSource>> {
        let c_url = CString::new(url).map_err(|_| PlayerError::OpenError(format!("非法 URL: {}", url)))?;
        let options = Self::open_options(url, config);

        let input = unsafe {
            let mut ctx = ffi::avformat_alloc_context();
            if ctx.is_null() {
                return Err(PlayerError::OpenError("无法分配格式上下文".to_string()));
            }
            (*ctx).interrupt_callback = ffi::AVIOInterruptCB {
                callback: Some(interrupt_callback),
                opaque: Arc::as_ptr(&interrupter) as *mut c_void,
            };

            let mut opts = options.disown();
            let ret = ffi::avformat_open_input(&mut ctx, c_url.as_ptr(), ptr::null_mut(), &mut opts);
            // 未被消费的选项
            drop(ffmpeg::Dictionary::own(opts));
            if ret < 0 {
                return Err(ffmpeg::Error::from(ret).into());
            }

            let ret = ffi::avformat_find_stream_info(ctx, ptr::null_mut());
            if ret < 0 {
                ffi::avformat_close_input(&mut ctx);
                return Err(ffmpeg::Error::from(ret).into());
            }
            format::context::Input::wrap(ctx)
        };

        let source = FfmpegSource::new(url, input, interrupter);
        info!("{} 📂 {}", log_ctx(), source.description());
        Ok(Box::new(source))
    }

    fn open_codec(&self, stream: &StreamInfo) -> Result<Box<dyn CodecContext>> {
        let params = stream
            .native
            .as_ref()
            .and_then(|n| n.0.downcast_ref::<CodecParameters>())
            .ok_or_else(|| PlayerError::InvalidStream(format!("流 #{} 缺少 codec 参数", stream.index)))?;
        let context = codec::context::Context::from_parameters(params.0.clone())?;

        let codec: Box<dyn CodecContext> = match stream.media_type {
            MediaType::Video => {
                let decoder = context.decoder().video()?;
                debug!("{} 视频解码器: {}x{}, 格式: {:?}", log_ctx(), decoder.width(), decoder.height(), decoder.format());
                Box::new(FfmpegVideoCodec {
                    decoder,
                    scaler: None,
                    name: stream.codec.clone(),
                })
            }
            MediaType::Audio => Box::new(FfmpegAudioCodec {
                decoder: context.decoder().audio()?,
                resampler: None,
                name: stream.codec.clone(),
            }),
            MediaType::Subtitle => Box::new(FfmpegSubtitleCodec {
                decoder: context.decoder().subtitle()?,
                pending: VecDeque::new(),
                eof: false,
                name: stream.codec.clone(),
            }),
            MediaType::Data => {
                return Err(PlayerError::InvalidStream("数据流不需要解码器".to_string()));
            }
        };
        Ok(codec)
    }

    fn open_muxer(&self, path: &Path) -> Result<Box<dyn MuxSink>> {
        let output = format::output(&path)?;
        Ok(Box::new(FfmpegMuxer {
            output,
            timebases: Vec::new(),
        }))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// AVIOInterruptCB：opaque 指向 Interrupter（由 FfmpegSource 持有其 Arc）
extern "C" fn interrupt_callback(opaque: *mut c_void) -> c_int {
    if opaque.is_null() {
        return 0;
    }
    let interrupter = unsafe { &*(opaque as *const Interrupter) };
    interrupter.should_interrupt() as c_int
}

/// codec 参数（只读，跨线程共享）
struct CodecParameters(codec::Parameters);

unsafe impl Send for CodecParameters {}
unsafe impl Sync for CodecParameters {}

fn ticks_or_zero(value: i64, timebase: Rational) -> i64 {
    if value == ffi::AV_NOPTS_VALUE {
        0
    } else {
        timebase.to_ticks(value)
    }
}

fn to_rational(r: ffmpeg::Rational) -> Rational {
    Rational::new(r.numerator(), r.denominator())
}

fn to_ffmpeg_rational(r: Rational) -> ffmpeg::Rational {
    ffmpeg::Rational::new(r.num, r.den)
}

fn codec_error(e: ffmpeg::Error) -> CodecError {
    match e {
        ffmpeg::Error::Other { errno } if errno == ffmpeg::error::EAGAIN => CodecError::Again,
        ffmpeg::Error::Eof => CodecError::Eof,
        e => CodecError::Invalid(e.to_string()),
    }
}

/// 把核心包转换为可送入 FFmpeg 的包
fn native_packet(packet: &Packet) -> ffmpeg::Packet {
    let mut native = match packet.data() {
        PacketData::Native(p) => p.clone(),
        PacketData::Bytes(bytes) => ffmpeg::Packet::copy(bytes),
    };
    native.set_pts(packet.pts);
    native.set_dts(packet.dts);
    native
}

// ========== 格式上下文 ==========

pub struct FfmpegSource {
    // 先于 interrupter 释放
    input: format::context::Input,
    streams: Vec<StreamInfo>,
    start_time: i64,
    duration: i64,
    url: String,
    interrupter: Arc<Interrupter>,
}

// 格式上下文只在解封装器的格式锁内访问
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    fn new(url: &str, input: format::context::Input, interrupter: Arc<Interrupter>) -> Self {
        let av_unit = Rational::new(1, 1_000_000);
        let start_time = ticks_or_zero(input.start_time(), av_unit);
        let duration = input.duration().max(0) * TICKS_PER_AV_UNIT;
        let raw_format = matches!(input.format().name(), "h264" | "hevc" | "mjpeg" | "rawvideo");

        let streams = input
            .streams()
            .filter_map(|stream| {
                let params = stream.parameters();
                let media_type = match params.medium() {
                    media::Type::Video => MediaType::Video,
                    media::Type::Audio => MediaType::Audio,
                    media::Type::Subtitle => MediaType::Subtitle,
                    media::Type::Data => MediaType::Data,
                    _ => return None,
                };
                let timebase = to_rational(stream.time_base());
                let mut info = StreamInfo::new(stream.index(), media_type, params.id().name(), timebase);
                info.start_time = ticks_or_zero(stream.start_time(), timebase);
                info.duration = match stream.duration() {
                    d if d > 0 && d != ffi::AV_NOPTS_VALUE => timebase.to_ticks(d),
                    _ => duration,
                };
                if media_type == MediaType::Video {
                    let rate = stream.avg_frame_rate();
                    if rate.numerator() > 0 && rate.denominator() > 0 {
                        info.frame_duration =
                            TICKS_PER_SECOND * rate.denominator() as i64 / rate.numerator() as i64;
                    }
                    info.fix_timestamps = raw_format;
                }
                info.bitrate = unsafe { (*params.as_ptr()).bit_rate };
                info.language = stream.metadata().get("language").map(String::from);
                info.native = Some(NativeParameters(Arc::new(CodecParameters(params))));
                Some(info)
            })
            .collect();

        Self {
            input,
            streams,
            start_time,
            duration,
            url: url.to_string(),
            interrupter,
        }
    }
}

impl DemuxerSource for FfmpegSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn start_time(&self) -> i64 {
        self.start_time
    }

    fn duration(&self) -> i64 {
        self.duration
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut native = ffmpeg::Packet::empty();
        match native.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(_) if self.interrupter.was_interrupted() => return Err(PlayerError::Interrupted),
            Err(e) => return Err(e.into()),
        }

        let stream_index = native.stream();
        let (pts, dts, duration, is_key) = (native.pts(), native.dts(), native.duration(), native.is_key());
        let mut packet = Packet::new(stream_index, PacketData::Native(native));
        packet.pts = pts;
        packet.dts = dts;
        packet.duration = duration;
        packet.is_key = is_key;
        Ok(Some(packet))
    }

    fn seek(&mut self, ticks: i64, forward: bool) -> Result<()> {
        let ts = ticks / TICKS_PER_AV_UNIT;
        let (min, max) = if forward { (ts, i64::MAX) } else { (i64::MIN, ts) };
        let ret = unsafe { ffi::avformat_seek_file(self.input.as_mut_ptr(), -1, min, ts, max, 0) };
        if ret < 0 {
            if self.interrupter.was_interrupted() {
                return Err(PlayerError::Interrupted);
            }
            return Err(ffmpeg::Error::from(ret).into());
        }
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        unsafe {
            let pb = (*self.input.as_ptr()).pb;
            if pb.is_null() {
                self.duration > 0
            } else {
                (*pb).seekable != 0
            }
        }
    }

    fn description(&self) -> String {
        format!(
            "{} [{}] {} 个流, 时长 {}ms",
            self.url,
            self.input.format().name(),
            self.streams.len(),
            self.duration / TICKS_PER_MS
        )
    }
}

// ========== 解码器 ==========

/// 视频：解码后统一转换为 RGBA
struct FfmpegVideoCodec {
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    name: String,
}

// 只在 codec 锁内访问
unsafe impl Send for FfmpegVideoCodec {}

impl FfmpegVideoCodec {
    fn convert(&mut self, frame: &util::frame::Video) -> std::result::Result<VideoPicture, CodecError> {
        let (width, height) = (frame.width(), frame.height());

        // 分辨率或像素格式变化时重建
        let stale = self.scaler.as_ref().map_or(true, |s| {
            let input = s.input();
            input.width != width || input.height != height || input.format != frame.format()
        });
        if stale {
            let scaler = software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )
            .map_err(codec_error)?;
            self.scaler = Some(scaler);
        }
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(CodecError::Invalid("缩放器不可用".to_string()));
        };

        let mut rgba = util::frame::Video::empty();
        scaler.run(frame, &mut rgba).map_err(codec_error)?;

        // 去掉行对齐填充
        let row = width as usize * 4;
        let stride = rgba.stride(0);
        let src = rgba.data(0);
        let mut data = vec![0u8; row * height as usize];
        for y in 0..height as usize {
            data[y * row..(y + 1) * row].copy_from_slice(&src[y * stride..y * stride + row]);
        }

        Ok(VideoPicture {
            width,
            height,
            format: PixelFormat::RGBA,
            data,
        })
    }
}

impl CodecContext for FfmpegVideoCodec {
    fn send_packet(&mut self, packet: &Packet) -> std::result::Result<(), CodecError> {
        self.decoder.send_packet(&native_packet(packet)).map_err(codec_error)
    }

    fn receive_frame(&mut self) -> std::result::Result<DecodedFrame, CodecError> {
        let mut frame = util::frame::Video::empty();
        self.decoder.receive_frame(&mut frame).map_err(codec_error)?;
        let picture = self.convert(&frame)?;
        Ok(DecodedFrame {
            pts: frame.pts(),
            best_effort_timestamp: frame.timestamp(),
            duration: frame.packet().duration,
            payload: FramePayload::Video(picture),
        })
    }

    fn send_eof(&mut self) -> std::result::Result<(), CodecError> {
        self.decoder.send_eof().map_err(codec_error)
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// 音频：重采样为交错 f32，保持原采样率
struct FfmpegAudioCodec {
    decoder: codec::decoder::Audio,
    resampler: Option<(software::resampling::Context, u16)>,
    name: String,
}

unsafe impl Send for FfmpegAudioCodec {}

impl FfmpegAudioCodec {
    fn convert(&mut self, frame: &util::frame::Audio) -> std::result::Result<AudioSamples, CodecError> {
        if self.resampler.is_none() {
            let (layout, channels) = match frame.channels() {
                1 => (util::channel_layout::ChannelLayout::MONO, 1),
                6 => (util::channel_layout::ChannelLayout::_5POINT1, 6),
                _ => (util::channel_layout::ChannelLayout::STEREO, 2),
            };
            debug!("{} 🔧 初始化音频重采样器: {}Hz/{}ch → f32/{}ch", log_ctx(), frame.rate(), frame.channels(), channels);
            let context = software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                layout,
                frame.rate(),
            )
            .map_err(codec_error)?;
            self.resampler = Some((context, channels));
        }
        let Some((resampler, channels)) = self.resampler.as_mut() else {
            return Err(CodecError::Invalid("重采样器不可用".to_string()));
        };

        let mut resampled = util::frame::Audio::empty();
        resampler.run(frame, &mut resampled).map_err(codec_error)?;

        let len = resampled.samples() * *channels as usize;
        let bytes = resampled.data(0);
        let samples = unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const f32, len) };
        Ok(AudioSamples {
            sample_rate: frame.rate(),
            channels: *channels,
            format: SampleFormat::F32,
            data: samples.to_vec(),
        })
    }
}

impl CodecContext for FfmpegAudioCodec {
    fn send_packet(&mut self, packet: &Packet) -> std::result::Result<(), CodecError> {
        self.decoder.send_packet(&native_packet(packet)).map_err(codec_error)
    }

    fn receive_frame(&mut self) -> std::result::Result<DecodedFrame, CodecError> {
        let mut frame = util::frame::Audio::empty();
        self.decoder.receive_frame(&mut frame).map_err(codec_error)?;
        let samples = self.convert(&frame)?;
        Ok(DecodedFrame {
            pts: frame.pts(),
            best_effort_timestamp: frame.timestamp(),
            duration: frame.packet().duration,
            payload: FramePayload::Audio(samples),
        })
    }

    fn send_eof(&mut self) -> std::result::Result<(), CodecError> {
        self.decoder.send_eof().map_err(codec_error)
    }

    fn flush(&mut self) {
        self.decoder.flush();
        self.resampler = None;
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// 字幕：旧式 decode 接口，结果先缓存再由 receive 取出
struct FfmpegSubtitleCodec {
    decoder: codec::decoder::Subtitle,
    pending: VecDeque<DecodedFrame>,
    eof: bool,
    name: String,
}

unsafe impl Send for FfmpegSubtitleCodec {}

impl FfmpegSubtitleCodec {
    /// ASS 事件行只保留 Text 字段
    fn ass_event_text(line: &str) -> &str {
        // ReadOrder,Layer,Style,Name,MarginL,MarginR,MarginV,Effect,Text
        line.splitn(9, ',').nth(8).unwrap_or(line)
    }
}

/// 移除 <i>、<font ...> 等简单标签
fn strip_markup(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '<' {
            result.push(ch);
            continue;
        }
        let mut tag = String::from('<');
        let mut closed = false;
        while let Some(&next) = chars.peek() {
            chars.next();
            tag.push(next);
            if next == '>' {
                closed = true;
                break;
            }
            if !(next.is_ascii_alphanumeric() || next.is_whitespace() || matches!(next, '/' | '=' | '"' | '#')) {
                break;
            }
        }
        if !closed {
            result.push_str(&tag);
        }
    }
    result
}

impl CodecContext for FfmpegSubtitleCodec {
    fn send_packet(&mut self, packet: &Packet) -> std::result::Result<(), CodecError> {
        if self.eof {
            return Err(CodecError::Eof);
        }
        let mut subtitle = codec::subtitle::Subtitle::default();
        let got = self
            .decoder
            .decode(&native_packet(packet), &mut subtitle)
            .map_err(codec_error)?;
        if !got {
            return Ok(());
        }

        let mut lines = Vec::new();
        for rect in subtitle.rects() {
            match rect {
                codec::subtitle::Rect::Text(text) => lines.push(strip_markup(text.get())),
                codec::subtitle::Rect::Ass(ass) => {
                    lines.push(ExternalSubtitleParser::clean_ass_text(Self::ass_event_text(ass.get())))
                }
                codec::subtitle::Rect::Bitmap(_) => debug!("{} 跳过位图字幕", log_ctx()),
                codec::subtitle::Rect::None(_) => {}
            }
        }
        let end_ms = unsafe { (*subtitle.as_ptr()).end_display_time } as i64;
        unsafe {
            ffi::avsubtitle_free(subtitle.as_mut_ptr());
        }

        let text = lines.join("\n").trim().to_string();
        if text.is_empty() {
            return Ok(());
        }
        let display_ms = if end_ms > 0 { end_ms } else { DEFAULT_SUBTITLE_MS };
        self.pending.push_back(DecodedFrame {
            pts: packet.pts,
            best_effort_timestamp: packet.pts.or(packet.dts),
            duration: 0,
            payload: FramePayload::Subtitle(SubtitleText {
                text,
                display_duration: display_ms * TICKS_PER_MS,
            }),
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> std::result::Result<DecodedFrame, CodecError> {
        match self.pending.pop_front() {
            Some(frame) => Ok(frame),
            None if self.eof => Err(CodecError::Eof),
            None => Err(CodecError::Again),
        }
    }

    fn send_eof(&mut self) -> std::result::Result<(), CodecError> {
        self.eof = true;
        Ok(())
    }

    fn flush(&mut self) {
        self.decoder.flush();
        self.pending.clear();
        self.eof = false;
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

// ========== 录制输出 ==========

struct FfmpegMuxer {
    output: format::context::Output,
    /// 写入文件头后各输出流的时间基
    timebases: Vec<ffmpeg::Rational>,
}

unsafe impl Send for FfmpegMuxer {}

impl MuxSink for FfmpegMuxer {
    fn add_stream(&mut self, stream: &StreamInfo) -> Result<usize> {
        let params = stream
            .native
            .as_ref()
            .and_then(|n| n.0.downcast_ref::<CodecParameters>())
            .ok_or_else(|| PlayerError::RemuxError(format!("流 #{} 缺少 codec 参数", stream.index)))?;
        let mut ost = self.output.add_stream(encoder::find(codec::Id::None))?;
        ost.set_parameters(params.0.clone());
        unsafe {
            (*ost.parameters().as_mut_ptr()).codec_tag = 0;
        }
        Ok(ost.index())
    }

    fn write_header(&mut self) -> Result<()> {
        self.output.write_header()?;
        self.timebases = self.output.streams().map(|s| s.time_base()).collect();
        Ok(())
    }

    fn write_packet(&mut self, out_index: usize, packet: &Packet, timebase: Rational) -> Result<()> {
        let Some(out_timebase) = self.timebases.get(out_index).copied() else {
            warn!("{} ⚠ 录制输出流 #{} 不存在", log_ctx(), out_index);
            return Ok(());
        };
        let mut native = native_packet(packet);
        native.set_stream(out_index);
        native.set_duration(packet.duration);
        native.rescale_ts(to_ffmpeg_rational(timebase), out_timebase);
        native.set_position(-1);
        native.write_interleaved(&mut self.output)?;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.output.write_trailer()?;
        Ok(())
    }
}
