use crate::core::hardsub::HardsubError;
use crate::core::ocr::OcrError;
use crate::core::session::SessionError;
use crate::core::settings::{HardsubSettings, PipelineSettings, SettingsError};
use crate::core::timing::TimingError;
use serde::{Deserialize, Serialize};

/// 字幕条目（展示用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleItem {
    /// 工作列表中的下标，`update_text` 使用它
    pub index: usize,
    pub start: String,
    pub end: String,
    pub text: String,
    pub image_path: String,
    /// "top" / "bottom"，软字幕为空
    pub channel: Option<String>,
}

/// 会话载入结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLoadResult {
    pub session_name: String,
    pub subtitle_count: usize,
    pub batch_logs: usize,
    pub failed_batches: Vec<usize>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardsubScanResult {
    pub session_name: String,
    pub frames_scanned: u64,
    pub top_events: usize,
    pub bottom_events: usize,
    /// 无法读取或保存而被跳过的事件
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRunSummary {
    pub cancelled: bool,
    pub processed: usize,
    pub total: usize,
    pub failed_batches: Vec<usize>,
    pub message: String,
}

/// 当前工作阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkStage {
    #[default]
    Idle,
    Scanning,
    Ocr,
}

/// 轮询用的进度快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub stage: WorkStage,
    pub processed: usize,
    pub total: usize,
}

/// 平铺的设置，供界面编辑
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbenchSettings {
    pub api_key: String,
    pub model: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub ocr_language: String,
    pub ocr_prompt: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub scan_top: bool,
    pub scan_bottom: bool,
    pub scan_area_height_percent: u8,
    pub confidence: f32,
    pub min_event_frames: u64,
}

impl From<&PipelineSettings> for WorkbenchSettings {
    fn from(s: &PipelineSettings) -> Self {
        Self {
            api_key: s.api_key.clone(),
            model: s.model.clone(),
            batch_size: s.batch_size,
            max_retries: s.max_retries,
            ocr_language: s.ocr_language.clone(),
            ocr_prompt: s.ocr_prompt.clone(),
            temperature: s.generation.temperature,
            top_p: s.generation.top_p,
            top_k: s.generation.top_k,
            scan_top: s.hardsub.scan_top,
            scan_bottom: s.hardsub.scan_bottom,
            scan_area_height_percent: s.hardsub.scan_area_height_percent,
            confidence: s.hardsub.confidence,
            min_event_frames: s.hardsub.min_event_frames,
        }
    }
}

impl WorkbenchSettings {
    /// 写回完整设置，界面不编辑的部分（安全设置）保持不变
    pub(crate) fn apply_to(self, settings: &mut PipelineSettings) {
        settings.api_key = self.api_key.trim().to_string();
        settings.model = self.model.trim().to_string();
        settings.batch_size = self.batch_size;
        settings.max_retries = self.max_retries;
        settings.ocr_language = self.ocr_language;
        settings.ocr_prompt = self.ocr_prompt.filter(|p| !p.trim().is_empty());
        settings.generation.temperature = self.temperature;
        settings.generation.top_p = self.top_p;
        settings.generation.top_k = self.top_k;
        settings.hardsub = HardsubSettings {
            scan_top: self.scan_top,
            scan_bottom: self.scan_bottom,
            scan_area_height_percent: self.scan_area_height_percent,
            confidence: self.confidence,
            min_event_frames: self.min_event_frames,
        };
    }
}

/// 字幕 API 错误类型，FRB 友好的设计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub error_type: String,
    pub message: String,
}

impl ApiError {
    pub(crate) fn new(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn busy() -> Self {
        Self::new("Busy", "另一个任务正在运行")
    }

    pub(crate) fn no_session() -> Self {
        Self::new("NoSession", "尚未载入会话")
    }

    pub(crate) fn invalid_index(index: usize, len: usize) -> Self {
        Self::new(
            "InvalidIndex",
            format!("字幕下标 {} 超出范围 (共 {} 条)", index, len),
        )
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.error_type, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Timing(e) => e.into(),
            other => Self::new("SessionError", other.to_string()),
        }
    }
}

impl From<TimingError> for ApiError {
    fn from(e: TimingError) -> Self {
        Self::new("TimingError", e.to_string())
    }
}

impl From<SettingsError> for ApiError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::Invalid(msg) => Self::new("ConfigError", msg),
            other => Self::new("SettingsError", other.to_string()),
        }
    }
}

impl From<OcrError> for ApiError {
    fn from(e: OcrError) -> Self {
        match e {
            OcrError::Config(msg) => Self::new("ConfigError", msg),
            other => Self::new("OcrError", other.to_string()),
        }
    }
}

impl From<HardsubError> for ApiError {
    fn from(e: HardsubError) -> Self {
        match e {
            HardsubError::Cancelled => Self::new("Cancelled", "Processing cancelled by user."),
            other => Self::new("HardsubError", other.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::new("IoError", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip_keeps_safety() {
        let mut settings = PipelineSettings::default();
        settings.safety_settings.truncate(1);

        let mut dto = WorkbenchSettings::from(&settings);
        dto.api_key = "  key ".into();
        dto.ocr_prompt = Some("   ".into());
        dto.scan_top = false;
        dto.apply_to(&mut settings);

        assert_eq!(settings.api_key, "key");
        assert_eq!(settings.ocr_prompt, None);
        assert!(!settings.hardsub.scan_top);
        assert_eq!(settings.safety_settings.len(), 1);
    }

    #[test]
    fn test_error_mapping() {
        let err: ApiError = OcrError::Config("API key is empty".into()).into();
        assert_eq!(err.error_type, "ConfigError");

        let err: ApiError = HardsubError::Cancelled.into();
        assert_eq!(err.error_type, "Cancelled");
        assert_eq!(err.to_string(), "[Cancelled] Processing cancelled by user.");

        let err: ApiError = SessionError::Timing(TimingError::Malformed("x".into())).into();
        assert_eq!(err.error_type, "TimingError");
    }
}
