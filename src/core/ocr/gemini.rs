//! Gemini 视觉模型客户端（Generative Language REST API）

use super::reply::parse_ocr_reply;
use super::{OcrCapability, OcrError, OcrFailure, OcrImage, OcrReply};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_p: 0.95,
            top_k: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

/// 字幕内容常被误判，默认全部放开
pub fn default_safety_settings() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .iter()
    .map(|category| SafetySetting {
        category: category.to_string(),
        threshold: "BLOCK_NONE".to_string(),
    })
    .collect()
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    generation: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
    base_url: String,
}

impl GeminiClient {
    /// 缺少 API key 或模型名时立即失败
    pub fn new(api_key: &str, model: &str) -> Result<Self, OcrError> {
        if api_key.trim().is_empty() {
            return Err(OcrError::Config("API key is empty".to_string()));
        }
        if model.trim().is_empty() {
            return Err(OcrError::Config("model is not selected".to_string()));
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        info!("🤖 GeminiClient: configured model {}", model);
        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            model: model.trim().trim_start_matches("models/").to_string(),
            generation: GenerationConfig::default(),
            safety_settings: default_safety_settings(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_safety_settings(mut self, safety_settings: Vec<SafetySetting>) -> Self {
        self.safety_settings = safety_settings;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    /// 提示词在前，图片按顺序作为 inline 数据附在后面
    fn request_body(&self, prompt: &str, images: &[OcrImage]) -> Value {
        let mut parts = vec![json!({ "text": prompt })];
        parts.extend(images.iter().map(|image| {
            json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": STANDARD.encode(&image.data),
                }
            })
        }));

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": self.generation.temperature,
                "topP": self.generation.top_p,
                "topK": self.generation.top_k,
            },
            "safetySettings": self.safety_settings,
        })
    }
}

impl OcrCapability for GeminiClient {
    fn recognize(&self, prompt: &str, images: &[OcrImage]) -> Result<OcrReply, OcrFailure> {
        if images.is_empty() {
            return Err(OcrFailure::new("No images to process"));
        }
        debug!("📤 Sending {} images to {}", images.len(), self.model);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt, images))
            .send()
            .map_err(|e| OcrFailure::new(format!("Gemini API request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| OcrFailure::new(format!("Could not read Gemini API response: {}", e)))?;

        if !status.is_success() {
            let preview: String = body.chars().take(300).collect();
            return Err(OcrFailure::new(format!("Gemini API error ({}): {}", status, preview)));
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            OcrFailure::new(format!("Gemini API returned invalid JSON: {}", e)).with_raw_reply(&body)
        })?;

        let text = reply_text(&value)?;
        parse_ocr_reply(&text)
    }
}

/// 取出候选回复中的文本；被拦截或没有内容时返回失败原因
fn reply_text(response: &Value) -> Result<String, OcrFailure> {
    if let Some(reason) = response
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(OcrFailure::new(format!("Prompt was blocked: {}", reason)));
    }

    let candidate = response
        .get("candidates")
        .and_then(|c| c.get(0))
        .ok_or_else(|| OcrFailure::new("API returned no content"))?;

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let finish_reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");
        return Err(OcrFailure::new(format!(
            "API returned no content, finish reason: {}",
            finish_reason
        )));
    }
    Ok(text)
}

/// 列出支持 generateContent 的 Gemini 模型
pub fn list_models(api_key: &str) -> Result<Vec<String>, OcrError> {
    list_models_at(DEFAULT_BASE_URL, api_key)
}

pub fn list_models_at(base_url: &str, api_key: &str) -> Result<Vec<String>, OcrError> {
    if api_key.trim().is_empty() {
        return Err(OcrError::Config("API key is empty".to_string()));
    }
    info!("📋 Getting Gemini model list...");

    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    let response = client
        .get(format!("{}/models", base_url.trim_end_matches('/')))
        .query(&[("pageSize", "1000")])
        .header("x-goog-api-key", api_key.trim())
        .send()?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(OcrError::Api(format!("{}: {}", status, body)));
    }

    let value: Value = response.json()?;
    let models = compatible_models(&value);
    if models.is_empty() {
        warn!("⚠️ No compatible Gemini models found");
        return Err(OcrError::Config(
            "No compatible Gemini models found, check the API key".to_string(),
        ));
    }
    info!("✅ Found {} compatible models", models.len());
    Ok(models)
}

fn compatible_models(value: &Value) -> Vec<String> {
    let mut models: Vec<String> = value
        .get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter(|m| {
                    m.get("supportedGenerationMethods")
                        .and_then(Value::as_array)
                        .map(|methods| methods.iter().any(|v| v == "generateContent"))
                        .unwrap_or(false)
                })
                .filter_map(|m| m.get("name").and_then(Value::as_str))
                .filter(|name| name.starts_with("models/gemini"))
                .map(|name| name.trim_start_matches("models/").to_string())
                .collect()
        })
        .unwrap_or_default();
    models.sort();
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_key_and_model() {
        assert!(matches!(GeminiClient::new("", "gemini-2.5-flash"), Err(OcrError::Config(_))));
        assert!(matches!(GeminiClient::new("key", "  "), Err(OcrError::Config(_))));
    }

    #[test]
    fn test_request_body_layout() {
        let client = GeminiClient::new("key", "models/gemini-2.5-flash").unwrap();
        assert_eq!(client.model(), "gemini-2.5-flash");
        assert!(client.endpoint().ends_with("/models/gemini-2.5-flash:generateContent"));

        let images = vec![OcrImage::new("a.png", vec![1, 2, 3]), OcrImage::new("b.jpg", vec![4])];
        let body = client.request_body("read", &images);

        let parts = body.pointer("/contents/0/parts").unwrap().as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["text"], "read");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "AQID");
        assert_eq!(parts[2]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(body["generationConfig"]["topK"], 64);
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_reply_text_joins_parts() {
        let response = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "[{\"index\": 0," }, { "text": " \"text\": \"a\"}]" }] },
                "finishReason": "STOP"
            }]
        });
        let text = reply_text(&response).unwrap();
        assert_eq!(parse_ocr_reply(&text).unwrap().items[0].text, "a");
    }

    #[test]
    fn test_reply_text_failures() {
        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(reply_text(&blocked).unwrap_err().reason.contains("SAFETY"));

        let empty = json!({ "candidates": [{ "finishReason": "MAX_TOKENS" }] });
        assert!(reply_text(&empty).unwrap_err().reason.contains("MAX_TOKENS"));

        assert!(reply_text(&json!({})).is_err());
    }

    #[test]
    fn test_compatible_models_filtered_and_sorted() {
        let value = json!({
            "models": [
                { "name": "models/gemini-2.5-pro", "supportedGenerationMethods": ["generateContent"] },
                { "name": "models/embedding-001", "supportedGenerationMethods": ["embedContent"] },
                { "name": "models/gemini-2.0-flash", "supportedGenerationMethods": ["countTokens", "generateContent"] },
                { "name": "models/gemini-embedding", "supportedGenerationMethods": ["embedContent"] }
            ]
        });
        assert_eq!(compatible_models(&value), vec!["gemini-2.0-flash", "gemini-2.5-pro"]);
    }

    #[test]
    fn test_failure_on_empty_image_list() {
        let client = GeminiClient::new("key", "gemini-2.5-flash").unwrap();
        assert!(client.recognize("read", &[]).is_err());
    }
}
