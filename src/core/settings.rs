//! 持久化设置（settings.json）

use crate::core::hardsub::{HardsubConfig, SegmentPolicy};
use crate::core::ocr::gemini::{default_safety_settings, GenerationConfig, SafetySetting};
use crate::core::ocr::OrchestratorConfig;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON 数据解析失败: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing configuration: {0}")]
    Invalid(String),
}

/// 硬字幕扫描设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardsubSettings {
    pub scan_top: bool,
    pub scan_bottom: bool,
    pub scan_area_height_percent: u8,
    pub confidence: f32,
    pub min_event_frames: u64,
}

impl Default for HardsubSettings {
    fn default() -> Self {
        Self {
            scan_top: true,
            scan_bottom: true,
            scan_area_height_percent: 30,
            confidence: 0.5,
            min_event_frames: 1,
        }
    }
}

impl HardsubSettings {
    /// 超出界面允许范围的值被夹回
    pub fn to_config(&self) -> HardsubConfig {
        HardsubConfig {
            scan_top: self.scan_top,
            scan_bottom: self.scan_bottom,
            scan_area_height_percent: self.scan_area_height_percent.clamp(10, 50),
            confidence: self.confidence.clamp(0.1, 0.9),
            policy: SegmentPolicy::debounced(self.min_event_frames),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub api_key: String,
    #[serde(alias = "last_model")]
    pub model: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub ocr_language: String,
    /// 非空时替代内置的软字幕提示词
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_prompt: Option<String>,
    #[serde(alias = "generation_config")]
    pub generation: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
    pub hardsub: HardsubSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.5-flash".to_string(),
            batch_size: 120,
            max_retries: 5,
            ocr_language: "Auto".to_string(),
            ocr_prompt: None,
            generation: GenerationConfig::default(),
            safety_settings: default_safety_settings(),
            hardsub: HardsubSettings::default(),
        }
    }
}

impl PipelineSettings {
    /// 读取设置：文件不存在时写入默认值，内容损坏时使用默认值
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            info!("⚙️ {} not found, creating defaults", path.display());
            let settings = Self::default();
            settings.save(path)?;
            return Ok(settings);
        }

        let content = fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&content) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("⚠️ Error reading {}: {}. Using defaults.", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// OCR 开始前检查必需项
    pub fn validate_for_ocr(&self) -> Result<(), SettingsError> {
        if self.api_key.trim().is_empty() {
            return Err(SettingsError::Invalid("API key is empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(SettingsError::Invalid("model is not selected".to_string()));
        }
        if self.batch_size == 0 {
            return Err(SettingsError::Invalid("batch size must be at least 1".to_string()));
        }
        if self.max_retries == 0 {
            return Err(SettingsError::Invalid("max retries must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);

        let settings = PipelineSettings::load(&path).unwrap();
        assert_eq!(settings, PipelineSettings::default());
        assert!(path.exists());
        assert_eq!(settings.safety_settings.len(), 4);
        assert_eq!(settings.generation.top_k, 64);
    }

    #[test]
    fn test_partial_file_completed_from_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(
            &path,
            r#"{"api_key": "abc", "last_model": "gemini-2.0-flash", "generation_config": {"temperature": 0.7}}"#,
        )
        .unwrap();

        let settings = PipelineSettings::load(&path).unwrap();
        assert_eq!(settings.api_key, "abc");
        assert_eq!(settings.model, "gemini-2.0-flash");
        assert_eq!(settings.generation.temperature, 0.7);
        assert_eq!(settings.generation.top_k, 64);
        assert_eq!(settings.batch_size, 120);
        assert_eq!(settings.hardsub, HardsubSettings::default());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(PipelineSettings::load(&path).unwrap(), PipelineSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let settings = PipelineSettings {
            api_key: "key".into(),
            ocr_language: "Japanese".into(),
            ocr_prompt: Some("Read.".into()),
            ..Default::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(PipelineSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_validate_for_ocr() {
        let mut settings = PipelineSettings::default();
        assert!(settings.validate_for_ocr().is_err());
        settings.api_key = "key".into();
        assert!(settings.validate_for_ocr().is_ok());
        settings.batch_size = 0;
        assert!(settings.validate_for_ocr().is_err());
        settings.batch_size = 10;
        settings.max_retries = 0;
        assert!(settings.validate_for_ocr().is_err());
    }

    #[test]
    fn test_hardsub_config_is_clamped() {
        let settings = HardsubSettings {
            scan_area_height_percent: 90,
            confidence: 0.0,
            min_event_frames: 3,
            ..Default::default()
        };
        let config = settings.to_config();
        assert_eq!(config.scan_area_height_percent, 50);
        assert_eq!(config.confidence, 0.1);
        assert_eq!(config.policy.min_event_frames, 3);
    }
}
