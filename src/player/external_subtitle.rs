use crate::core::{PlayerError, Result};
use crate::player::subtitles_manager::SubtitleData;
use log::{info, warn};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 外部字幕文件解析器（SRT / ASS / SSA / WebVTT）
pub struct ExternalSubtitleParser;

impl ExternalSubtitleParser {
    /// 按扩展名解析字幕文件
    pub fn parse_subtitle_file(file_path: &Path) -> Result<Vec<SubtitleData>> {
        let content = fs::read_to_string(file_path)?;
        let extension = file_path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let subs = Self::parse_str(&content, &extension)?;
        info!("解析字幕完成: {} 条 ({})", subs.len(), file_path.display());
        Ok(subs)
    }

    pub fn parse_str(content: &str, format: &str) -> Result<Vec<SubtitleData>> {
        // 去掉 UTF-8 BOM
        let content = content.trim_start_matches('\u{feff}');
        match format {
            "srt" => Ok(Self::parse_cue_blocks(content, Self::parse_srt_timestamp)),
            "vtt" => Ok(Self::parse_cue_blocks(content, Self::parse_vtt_timestamp)),
            "ass" | "ssa" => Ok(Self::parse_ass(content)),
            other => Err(PlayerError::InvalidStream(format!("不支持的字幕文件格式: {}", other))),
        }
    }

    /// SRT 与 VTT 共用的"时间行 + 文本行 + 空行"结构
    fn parse_cue_blocks(content: &str, parse_time: fn(&str) -> Option<Duration>) -> Vec<SubtitleData> {
        let mut subs = Vec::new();
        let mut current: Option<(Duration, Duration, Vec<&str>)> = None;

        let mut flush = |current: &mut Option<(Duration, Duration, Vec<&str>)>| {
            if let Some((start, end, lines)) = current.take() {
                let text = lines.join("\n");
                if !text.trim().is_empty() {
                    subs.push(SubtitleData::new(start, end, text.trim()));
                }
            }
        };

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                flush(&mut current);
                continue;
            }

            if let Some((start, end)) = line.split_once("-->") {
                flush(&mut current);
                // VTT 时间行后可能带有 cue 设置
                let end = end.split_whitespace().next().unwrap_or("");
                match (parse_time(start.trim()), parse_time(end)) {
                    (Some(start), Some(end)) => current = Some((start, end, Vec::new())),
                    _ => warn!("无法解析时间行 (第{}行): {}", line_num + 1, line),
                }
                continue;
            }

            match current.as_mut() {
                Some((_, _, lines)) => lines.push(line),
                // 序号、WEBVTT 头、NOTE/STYLE 块
                None => {}
            }
        }
        flush(&mut current);
        subs
    }

    /// 00:01:30,500
    fn parse_srt_timestamp(timestamp: &str) -> Option<Duration> {
        let (clock, millis) = timestamp.split_once(',')?;
        Self::clock_to_duration(clock, millis.parse().ok()?)
    }

    /// 00:01:30.500 或 01:30.500
    fn parse_vtt_timestamp(timestamp: &str) -> Option<Duration> {
        let (clock, millis) = timestamp.split_once('.')?;
        Self::clock_to_duration(clock, millis.parse().ok()?)
    }

    /// 0:01:30.50（百分之一秒）
    fn parse_ass_timestamp(timestamp: &str) -> Option<Duration> {
        let (clock, centis) = timestamp.split_once('.')?;
        let centis: u64 = centis.parse().ok()?;
        Self::clock_to_duration(clock, centis * 10)
    }

    /// [H:]MM:SS + 毫秒
    fn clock_to_duration(clock: &str, millis: u64) -> Option<Duration> {
        let mut seconds = 0u64;
        let parts: Vec<&str> = clock.split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return None;
        }
        for part in parts {
            seconds = seconds * 60 + part.trim().parse::<u64>().ok()?;
        }
        Some(Duration::from_millis(seconds * 1000 + millis))
    }

    /// 只解析 [Events] 段的 Dialogue 行，字段位置取自 Format 行
    fn parse_ass(content: &str) -> Vec<SubtitleData> {
        let mut subs = Vec::new();
        let mut in_events = false;
        // 默认 v4+ 字段顺序
        let mut fields = vec!["layer", "start", "end", "style", "name", "marginl", "marginr", "marginv", "effect", "text"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();

        for line in content.lines().map(str::trim) {
            if line.starts_with('[') && line.ends_with(']') {
                in_events = line.eq_ignore_ascii_case("[Events]");
                continue;
            }
            if !in_events {
                continue;
            }

            if let Some(format) = line.strip_prefix("Format:") {
                fields = format.split(',').map(|f| f.trim().to_ascii_lowercase()).collect();
                continue;
            }
            let Some(dialogue) = line.strip_prefix("Dialogue:") else {
                continue;
            };

            // Text 是最后一个字段，可能含逗号
            let values: Vec<&str> = dialogue.splitn(fields.len(), ',').map(str::trim).collect();
            let field = |name: &str| fields.iter().position(|f| f == name).and_then(|i| values.get(i).copied());

            let (Some(start), Some(end), Some(text)) = (field("start"), field("end"), field("text")) else {
                continue;
            };
            let (Some(start), Some(end)) = (Self::parse_ass_timestamp(start), Self::parse_ass_timestamp(end)) else {
                warn!("无法解析 ASS 时间: {}", line);
                continue;
            };
            let text = Self::clean_ass_text(text);
            if !text.is_empty() {
                subs.push(SubtitleData::new(start, end, text));
            }
        }
        subs.sort_by_key(|s| s.start);
        subs
    }

    /// 移除 {...} 覆盖标签，\N / \n 转为换行，\h 转为空格
    pub(crate) fn clean_ass_text(text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut in_tag = false;
        let mut chars = text.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' => in_tag = true,
                '}' => in_tag = false,
                _ if in_tag => {}
                '\\' => match chars.peek() {
                    Some('N') | Some('n') => {
                        chars.next();
                        result.push('\n');
                    }
                    Some('h') => {
                        chars.next();
                        result.push(' ');
                    }
                    _ => result.push(ch),
                },
                _ => result.push(ch),
            }
        }
        result.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_parse_srt_timestamp() {
        assert_eq!(ExternalSubtitleParser::parse_srt_timestamp("00:01:30,500"), Some(ms(90500)));
        assert_eq!(ExternalSubtitleParser::parse_srt_timestamp("01:23:45,123"), Some(ms(5025123)));
        assert_eq!(ExternalSubtitleParser::parse_srt_timestamp("01:23:45.123"), None);
    }

    #[test]
    fn test_parse_ass_timestamp() {
        assert_eq!(ExternalSubtitleParser::parse_ass_timestamp("0:01:30.50"), Some(ms(90500)));
        assert_eq!(ExternalSubtitleParser::parse_ass_timestamp("1:23:45.12"), Some(ms(5025120)));
    }

    #[test]
    fn test_clean_ass_text() {
        assert_eq!(ExternalSubtitleParser::clean_ass_text("{\\b1}Hello{\\b0} World"), "Hello World");
        assert_eq!(ExternalSubtitleParser::clean_ass_text("Line 1\\NLine 2"), "Line 1\nLine 2");
    }

    #[test]
    fn test_parse_srt() {
        let srt = "\u{feff}1\n00:00:01,000 --> 00:00:05,000\n第一行\n第二行\n\n2\n00:00:10,000 --> 00:00:15,000\nsecond\n";
        let subs = ExternalSubtitleParser::parse_str(srt, "srt").unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].text, "第一行\n第二行");
        assert_eq!(subs[1].start, ms(10_000));
        assert_eq!(subs[1].end, ms(15_000));
    }

    #[test]
    fn test_parse_vtt_with_settings() {
        let vtt = "WEBVTT\n\nNOTE header\n\n00:01.000 --> 00:04.000 align:start\nhello\n\n01:00:00.000 --> 01:00:02.500\nbye\n";
        let subs = ExternalSubtitleParser::parse_str(vtt, "vtt").unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].start, ms(1_000));
        assert_eq!(subs[1].end, ms(3_602_500));
    }

    #[test]
    fn test_parse_ass_custom_format() {
        let ass = "[Script Info]\nTitle: t\n\n[Events]\nFormat: Layer, Start, End, Style, Text\nDialogue: 0,0:00:02.00,0:00:03.00,Default,{\\i1}a, b{\\i0}\nComment: 0,0:00:04.00,0:00:05.00,Default,skip\n";
        let subs = ExternalSubtitleParser::parse_str(ass, "ass").unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].text, "a, b");
        assert_eq!(subs[0].start, ms(2_000));
    }

    #[test]
    fn test_unknown_format() {
        assert!(ExternalSubtitleParser::parse_str("", "sub").is_err());
    }
}
