/// 软字幕（PGS/VobSub 转出的图片）默认提示词
pub const DEFAULT_PROMPT: &str = "\
You will receive a sequence of subtitle images. Transcribe the text of each image exactly as shown, \
keeping line breaks between subtitle lines. Do not translate, summarize or correct the text. \
If an image contains no readable text, return an empty string for it.
Respond with a JSON array only, one object per image in the order received: \
[{\"index\": 0, \"text\": \"...\"}, {\"index\": 1, \"text\": \"...\"}]. \
The index is the 0-based position of the image in this request.";

/// 硬字幕提示词：图片是视频画面的裁剪，背景复杂
pub const HARDSUB_PROMPT: &str = "\
You will receive a sequence of cropped video frames. Each crop may contain a burned-in subtitle \
over a busy background. Transcribe only the subtitle text of each crop, keeping line breaks between \
subtitle lines. Ignore logos, signs, watermarks and on-screen UI. Do not translate or correct the text. \
If a crop contains no subtitle, return an empty string for it.
Respond with a JSON array only, one object per image in the order received: \
[{\"index\": 0, \"text\": \"...\"}, {\"index\": 1, \"text\": \"...\"}]. \
The index is the 0-based position of the image in this request.";

/// 组装本次运行的提示词
///
/// `override_prompt` 非空时替代内置软字幕提示词；硬字幕会话总是使用硬字幕提示词。
/// `language` 不是 "Auto" 时附加语言限定。
pub fn build_prompt(is_hardsub: bool, override_prompt: Option<&str>, language: &str) -> String {
    let base = if is_hardsub {
        HARDSUB_PROMPT
    } else {
        override_prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROMPT)
    };

    let mut prompt = base.to_string();
    let language = language.trim();
    if !language.is_empty() && !language.eq_ignore_ascii_case("auto") {
        prompt.push_str(&format!(
            "\nImportant: The language of the subtitles is {}. Extract text in this language only.",
            language
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_language_adds_nothing() {
        assert_eq!(build_prompt(false, None, "Auto"), DEFAULT_PROMPT);
        assert_eq!(build_prompt(false, None, "auto"), DEFAULT_PROMPT);
    }

    #[test]
    fn test_language_hint_appended() {
        let prompt = build_prompt(true, None, "Japanese");
        assert!(prompt.starts_with(HARDSUB_PROMPT));
        assert!(prompt.ends_with("The language of the subtitles is Japanese. Extract text in this language only."));
    }

    #[test]
    fn test_override_only_for_softsub() {
        assert_eq!(build_prompt(false, Some("Read it."), "Auto"), "Read it.");
        assert_eq!(build_prompt(false, Some("   "), "Auto"), DEFAULT_PROMPT);
        assert_eq!(build_prompt(true, Some("Read it."), "Auto"), HARDSUB_PROMPT);
    }
}
