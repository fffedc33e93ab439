//! 批量 OCR：远程视觉模型识别字幕图片中的文字

pub mod gemini;
pub mod orchestrator;
pub mod prompt;
mod reply;

pub use gemini::{list_models, GeminiClient};
pub use orchestrator::{
    BatchCheckpoint, BatchLog, BatchLogEntry, BatchOrchestrator, FailedBatches, OcrRunOutcome,
    OcrRunReport, OrchestratorConfig,
};
pub use prompt::build_prompt;
pub use reply::parse_ocr_reply;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 提交给 OCR 的单张图片
#[derive(Debug, Clone)]
pub struct OcrImage {
    pub file_name: String,
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

impl OcrImage {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_type_for(&file_name);
        Self {
            file_name,
            mime_type,
            data,
        }
    }
}

fn mime_type_for(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".bmp") {
        "image/bmp"
    } else {
        "image/png"
    }
}

/// 一条识别结果，`index` 是在本次提交子批次内的下标（从 0 开始）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrItem {
    #[serde(rename = "index")]
    pub relative_index: usize,
    pub text: String,
}

/// 成功的识别回复：校验后的结果 + 原始 JSON（用于审计日志）
#[derive(Debug, Clone, PartialEq)]
pub struct OcrReply {
    pub items: Vec<OcrItem>,
    pub raw: serde_json::Value,
}

/// 可重试的失败（格式错误、远程错误、限流等）
#[derive(Debug, Clone, PartialEq)]
pub struct OcrFailure {
    pub reason: String,
    /// 模型返回了文本但无法解析时保留原文
    pub raw_reply: Option<String>,
}

impl OcrFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw_reply: None,
        }
    }

    pub fn with_raw_reply(mut self, raw: impl Into<String>) -> Self {
        self.raw_reply = Some(raw.into());
        self
    }
}

impl fmt::Display for OcrFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// OCR 能力：给定提示词与有序图片列表，返回结果列表或失败原因
pub trait OcrCapability: Send + Sync {
    fn recognize(&self, prompt: &str, images: &[OcrImage]) -> Result<OcrReply, OcrFailure>;
}

/// 不可重试的错误：配置问题、参数问题
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Missing configuration: {0}")]
    Config(String),
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON 数据解析失败: {0}")]
    Json(#[from] serde_json::Error),
    #[error("API error: {0}")]
    Api(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_from_name() {
        assert_eq!(OcrImage::new("a.PNG", vec![]).mime_type, "image/png");
        assert_eq!(OcrImage::new("b.jpeg", vec![]).mime_type, "image/jpeg");
        assert_eq!(OcrImage::new("c.JPG", vec![]).mime_type, "image/jpeg");
    }

    #[test]
    fn test_item_uses_index_key() {
        let item: OcrItem = serde_json::from_str(r#"{"index": 2, "text": "hi"}"#).unwrap();
        assert_eq!(item.relative_index, 2);
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            serde_json::json!({"index": 2, "text": "hi"})
        );
    }
}
