//! 字幕事件模型与 SRT 导出

mod time;

pub use time::{ParseSrtTimeError, SrtTime};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// 顶部字幕在 SRT 中的位置标记
pub const TOP_POSITION_TAG: &str = "{\\an8}";

/// 硬字幕扫描区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Top,
    Bottom,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Top => "top",
            Channel::Bottom => "bottom",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条带时间的字幕
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleEvent {
    #[serde(rename = "start_srt")]
    pub start_time: SrtTime,
    #[serde(rename = "end_srt")]
    pub end_time: SrtTime,
    /// 相对于会话 images 目录的文件名
    pub image_file: String,
    #[serde(default)]
    pub text: String,
    /// 仅硬字幕事件带有
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
}

impl SubtitleEvent {
    pub fn new(start_time: SrtTime, end_time: SrtTime, image_file: impl Into<String>) -> Self {
        Self {
            start_time,
            end_time,
            image_file: image_file.into(),
            text: String::new(),
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// 事件列表是否来自硬字幕扫描
pub fn is_hardsub_track(events: &[SubtitleEvent]) -> bool {
    events.first().map(|e| e.channel.is_some()).unwrap_or(false)
}

/// 生成展示/导出用的视图：顶部字幕加位置标记，并按开始时间稳定排序。
///
/// 工作列表保持抽取顺序不变，批次日志中的下标依赖这个顺序。
pub fn presentation_order(events: &[SubtitleEvent]) -> Vec<SubtitleEvent> {
    let mut view: Vec<SubtitleEvent> = events
        .iter()
        .cloned()
        .map(|mut event| {
            if event.channel == Some(Channel::Top)
                && event.has_text()
                && !event.text.starts_with(TOP_POSITION_TAG)
            {
                event.text = format!("{}{}", TOP_POSITION_TAG, event.text);
            }
            event
        })
        .collect();

    if is_hardsub_track(events) {
        view.sort_by_key(|e| e.start_time);
    }
    view
}

/// 按 `index\nstart --> end\ntext\n\n` 的块格式输出，序号从 1 开始
pub fn export_srt(events: &[SubtitleEvent]) -> String {
    let mut out = String::new();
    for (i, event) in events.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            event.start_time,
            event.end_time,
            event.text.trim()
        ));
    }
    out
}

pub fn write_srt(path: &Path, events: &[SubtitleEvent]) -> std::io::Result<()> {
    fs::write(path, export_srt(events))
}
