use crate::core::Result;
use crate::player::external_subtitle::ExternalSubtitleParser;
use log::{debug, info};
use parking_lot::RwLock;
use std::path::Path;
use std::time::Duration;

/// 一条字幕
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleData {
    pub start: Duration,
    pub end: Duration,
    pub text: String,
    /// 翻译结果（未翻译为 None）
    pub translated: Option<String>,
}

impl SubtitleData {
    pub fn new(start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            translated: None,
        }
    }

    pub fn is_translated(&self) -> bool {
        self.translated.is_some()
    }

    /// 优先显示翻译文本
    pub fn display_text(&self) -> &str {
        self.translated.as_deref().unwrap_or(&self.text)
    }
}

/// 当前播放位置相对字幕列表的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    /// 早于第一条字幕
    First,
    /// 处于某条字幕的显示区间内
    Showing,
    /// 两条字幕之间
    Around,
    /// 晚于最后一条字幕
    Last,
}

struct Inner {
    subs: Vec<SubtitleData>,
    current_index: isize,
    state: PositionState,
    last_time: Option<Duration>,
}

impl Inner {
    fn classify(&mut self, time: Duration) {
        self.last_time = Some(time);
        let (state, index) = match (self.subs.first(), self.subs.last()) {
            (Some(first), Some(last)) => {
                if time < first.start {
                    (PositionState::First, -1)
                } else if time > last.end {
                    (PositionState::Last, self.subs.len() as isize - 1)
                } else {
                    // time >= 第一条的 start，至少有一条满足
                    let index = self.subs.partition_point(|s| s.start <= time) - 1;
                    if time <= self.subs[index].end {
                        (PositionState::Showing, index as isize)
                    } else {
                        (PositionState::Around, index as isize)
                    }
                }
            }
            _ => (PositionState::First, -1),
        };
        self.state = state;
        self.current_index = index;
    }

    fn at(&self, index: isize) -> Option<SubtitleData> {
        usize::try_from(index).ok().and_then(|i| self.subs.get(i)).cloned()
    }
}

/// 按时间排序的字幕集合与当前位置游标
///
/// 与解封装完全独立；播放端周期性调用 `set_current_time`，UI 查询当前/上一条/下一条。
pub struct SubtitlesManager {
    inner: RwLock<Inner>,
}

impl Default for SubtitlesManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubtitlesManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                subs: Vec::new(),
                current_index: -1,
                state: PositionState::First,
                last_time: None,
            }),
        }
    }

    pub fn from_subs(subs: Vec<SubtitleData>) -> Self {
        let manager = Self::new();
        manager.add_range(subs);
        manager
    }

    /// 加载 SRT / ASS / VTT 文件（替换现有内容），返回条数
    pub fn load_file(&self, path: &Path) -> Result<usize> {
        let subs = ExternalSubtitleParser::parse_subtitle_file(path)?;
        let count = subs.len();
        self.clear();
        self.add_range(subs);
        info!("📝 载入字幕 {} 条: {}", count, path.display());
        Ok(count)
    }

    /// 按开始时间插入
    pub fn add(&self, sub: SubtitleData) {
        let mut inner = self.inner.write();
        let pos = inner.subs.partition_point(|s| s.start <= sub.start);
        inner.subs.insert(pos, sub);
        if let Some(time) = inner.last_time {
            inner.classify(time);
        }
    }

    pub fn add_range(&self, subs: impl IntoIterator<Item = SubtitleData>) {
        let mut inner = self.inner.write();
        inner.subs.extend(subs);
        inner.subs.sort_by_key(|s| s.start);
        if let Some(time) = inner.last_time {
            inner.classify(time);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.subs.clear();
        inner.current_index = -1;
        inner.state = PositionState::First;
        inner.last_time = None;
    }

    pub fn len(&self) -> usize {
        self.inner.read().subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().subs.is_empty()
    }

    pub fn snapshot(&self) -> Vec<SubtitleData> {
        self.inner.read().subs.clone()
    }

    pub fn get(&self, index: usize) -> Option<SubtitleData> {
        self.inner.read().subs.get(index).cloned()
    }

    pub fn set_translation(&self, index: usize, text: impl Into<String>) -> bool {
        match self.inner.write().subs.get_mut(index) {
            Some(sub) => {
                sub.translated = Some(text.into());
                true
            }
            None => false,
        }
    }

    /// 更新当前位置并重新计算状态
    pub fn set_current_time(&self, time: Duration) {
        self.inner.write().classify(time);
    }

    pub fn current_index(&self) -> isize {
        self.inner.read().current_index
    }

    pub fn state(&self) -> PositionState {
        self.inner.read().state
    }

    /// 正在显示的字幕（仅 Showing 状态）
    pub fn get_current(&self) -> Option<SubtitleData> {
        let inner = self.inner.read();
        match inner.state {
            PositionState::Showing => inner.at(inner.current_index),
            _ => None,
        }
    }

    pub fn get_prev(&self) -> Option<SubtitleData> {
        let inner = self.inner.read();
        match inner.state {
            PositionState::Showing => inner.at(inner.current_index - 1),
            PositionState::Around | PositionState::Last => inner.at(inner.current_index),
            PositionState::First => None,
        }
    }

    pub fn get_next(&self) -> Option<SubtitleData> {
        let inner = self.inner.read();
        inner.at(inner.current_index + 1)
    }

    /// 删除结束时间不早于 `time` 的所有字幕，返回删除条数
    pub fn delete_after(&self, time: Duration) -> usize {
        let mut inner = self.inner.write();
        let Some(pos) = inner.subs.iter().position(|s| s.end >= time) else {
            return 0;
        };
        let removed = inner.subs.len() - pos;
        inner.subs.truncate(pos);
        debug!("删除 {} 条字幕（>= {:?}）", removed, time);

        // 当前条或其后一条被删除时位置状态可能改变（例如 Around 变为 Last）
        if inner.current_index + 1 >= pos as isize {
            match inner.last_time {
                Some(last) => inner.classify(last),
                None => {
                    inner.current_index = -1;
                    inner.state = PositionState::First;
                }
            }
        }
        removed
    }
}
