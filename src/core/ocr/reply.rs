use super::{OcrFailure, OcrItem, OcrReply};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("valid fence regex"));

/// 解析模型文本回复。
///
/// 优先取 ```json 代码块；严格 JSON 失败时用 json5 再试一次。
/// 顶层必须是数组，缺少整数 `index` 或字符串 `text` 的条目被跳过（原文仍保留在 raw 中）。
pub fn parse_ocr_reply(text: &str) -> Result<OcrReply, OcrFailure> {
    let body = JSON_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| text.trim());

    let raw: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(strict_err) => json5::from_str::<Value>(body).map_err(|_| {
            let preview: String = text.chars().take(200).collect();
            OcrFailure::new(format!(
                "Could not parse JSON from API response: {} ({})",
                strict_err, preview
            ))
            .with_raw_reply(text)
        })?,
    };

    let entries = raw.as_array().ok_or_else(|| {
        OcrFailure::new("API result is not a list").with_raw_reply(text)
    })?;

    let items = entries
        .iter()
        .filter_map(|entry| {
            let index = entry.get("index").and_then(Value::as_u64);
            let text = entry.get("text").and_then(Value::as_str);
            match (index, text) {
                (Some(index), Some(text)) => Some(OcrItem {
                    relative_index: index as usize,
                    text: text.to_string(),
                }),
                _ => {
                    warn!("⚠️ Invalid result item skipped: {}", entry);
                    None
                }
            }
        })
        .collect();

    Ok(OcrReply { items, raw })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json_array() {
        let reply = parse_ocr_reply(r#"[{"index": 0, "text": "Hello"}, {"index": 1, "text": ""}]"#)
            .unwrap();
        assert_eq!(reply.items.len(), 2);
        assert_eq!(reply.items[0].text, "Hello");
        assert_eq!(reply.items[1].relative_index, 1);
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here you go:\n```json\n[{\"index\": 3, \"text\": \"Hi\"}]\n```\n";
        let reply = parse_ocr_reply(text).unwrap();
        assert_eq!(reply.items, vec![OcrItem { relative_index: 3, text: "Hi".into() }]);
    }

    #[test]
    fn test_lenient_json5() {
        let text = "[{index: 0, text: 'a',},]";
        let reply = parse_ocr_reply(text).unwrap();
        assert_eq!(reply.items[0].text, "a");
    }

    #[test]
    fn test_invalid_items_skipped_but_kept_raw() {
        let text = r#"[{"index": 0, "text": "ok"}, {"idx": 1, "text": "bad"}, "junk", {"index": -1, "text": "neg"}]"#;
        let reply = parse_ocr_reply(text).unwrap();
        assert_eq!(reply.items.len(), 1);
        assert_eq!(reply.raw.as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_not_a_list_rejected() {
        let failure = parse_ocr_reply(r#"{"index": 0, "text": "x"}"#).unwrap_err();
        assert!(failure.reason.contains("not a list"));
        assert!(failure.raw_reply.is_some());
    }

    #[test]
    fn test_garbage_rejected_with_raw() {
        let failure = parse_ocr_reply("I cannot read these images.").unwrap_err();
        assert_eq!(failure.raw_reply.as_deref(), Some("I cannot read these images."));
    }
}
