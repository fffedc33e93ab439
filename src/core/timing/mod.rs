//! 时间轴文件解析：BDSup2Sub XML、Subtitle Edit HTML、硬字幕 JSON

mod bdsup2sub;
mod subtitle_edit;

pub use bdsup2sub::parse_bdsup2sub_xml;
pub use subtitle_edit::parse_subtitle_edit_html;

use crate::core::subtitle::SubtitleEvent;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 会话目录中可作为时间轴的扩展名
pub const TIMING_EXTENSIONS: [&str; 3] = ["xml", "html", "json"];

#[derive(Debug, Error)]
pub enum TimingError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON 数据解析失败: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported timing file: {0}")]
    Unsupported(PathBuf),
    #[error("Timing file is malformed: {0}")]
    Malformed(String),
    #[error("No subtitle events found in {0}")]
    Empty(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingFormat {
    BdSup2SubXml,
    SubtitleEditHtml,
    HardsubJson,
}

impl TimingFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xml" => Some(Self::BdSup2SubXml),
            "html" | "htm" => Some(Self::SubtitleEditHtml),
            "json" => Some(Self::HardsubJson),
            _ => None,
        }
    }
}

/// 按扩展名选择解析器，结果为空视为错误
pub fn parse_timing_file(path: &Path) -> Result<Vec<SubtitleEvent>, TimingError> {
    let format =
        TimingFormat::from_path(path).ok_or_else(|| TimingError::Unsupported(path.to_path_buf()))?;
    let content = fs::read_to_string(path)?;

    let events = match format {
        TimingFormat::BdSup2SubXml => parse_bdsup2sub_xml(&content)?,
        TimingFormat::SubtitleEditHtml => parse_subtitle_edit_html(&content)?,
        TimingFormat::HardsubJson => serde_json::from_str(&content)?,
    };

    if events.is_empty() {
        return Err(TimingError::Empty(path.to_path_buf()));
    }
    info!("📄 Parsed {} events from {}", events.len(), path.display());
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::subtitle::{Channel, SrtTime};

    #[test]
    fn test_format_from_extension() {
        assert_eq!(TimingFormat::from_path(Path::new("a/sub.XML")), Some(TimingFormat::BdSup2SubXml));
        assert_eq!(TimingFormat::from_path(Path::new("index.html")), Some(TimingFormat::SubtitleEditHtml));
        assert_eq!(TimingFormat::from_path(Path::new("hardsub_log.json")), Some(TimingFormat::HardsubJson));
        assert_eq!(TimingFormat::from_path(Path::new("sub.sup")), None);
    }

    #[test]
    fn test_parse_hardsub_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hardsub_log.json");
        let events = vec![
            SubtitleEvent::new(SrtTime::from_millis(0), SrtTime::from_millis(900), "hardsub_00001.png")
                .with_channel(Channel::Bottom),
        ];
        fs::write(&path, serde_json::to_string_pretty(&events).unwrap()).unwrap();

        assert_eq!(parse_timing_file(&path).unwrap(), events);
    }

    #[test]
    fn test_empty_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.json");
        fs::write(&empty, "[]").unwrap();
        assert!(matches!(parse_timing_file(&empty), Err(TimingError::Empty(_))));

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{not json").unwrap();
        assert!(matches!(parse_timing_file(&corrupt), Err(TimingError::Json(_))));

        let missing = dir.path().join("missing.xml");
        assert!(matches!(parse_timing_file(&missing), Err(TimingError::Io(_))));

        let other = dir.path().join("sub.sup");
        assert!(matches!(parse_timing_file(&other), Err(TimingError::Unsupported(_))));
    }
}
