use super::TimingError;
use crate::core::subtitle::{SrtTime, SubtitleEvent};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

const DEFAULT_FRAME_RATE: f64 = 23.976;

static FORMAT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Format\b([^>]*)>").expect("valid format regex"));
static EVENT_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<Event\b([^>]*)>([\s\S]*?)</Event>").expect("valid event regex")
});
static GRAPHIC_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<Graphic\b[^>]*>([^<]*)</Graphic>").expect("valid graphic regex")
});
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\w:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid attribute regex")
});

/// 取属性值，单双引号均可
fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    ATTRIBUTE
        .captures_iter(attrs)
        .find(|caps| &caps[1] == name)
        .and_then(|caps| caps.get(2).or_else(|| caps.get(3)))
        .map(|value| value.as_str())
}

/// `HH:MM:SS:FF` 时间码按帧率换算为毫秒；格式错误时记为 0
fn timecode_to_srt(tc: &str, frame_rate: f64) -> SrtTime {
    let parts: Vec<u64> = tc.split(':').filter_map(|p| p.trim().parse().ok()).collect();
    match parts.as_slice() {
        [h, m, s, f] => {
            let frame_ms = (*f as f64 / frame_rate * 1000.0) as u64;
            SrtTime::from_millis(((h * 60 + m) * 60 + s) * 1000 + frame_ms)
        }
        _ => {
            warn!("⚠️ Invalid timecode {:?}, using 00:00:00,000", tc);
            SrtTime::ZERO
        }
    }
}

/// 解析 BDSup2Sub 导出的 XML
///
/// 帧率取自 `Description/Format@FrameRate`，缺省 23.976；
/// 没有 `Graphic` 图片名的事件被跳过。
pub fn parse_bdsup2sub_xml(content: &str) -> Result<Vec<SubtitleEvent>, TimingError> {
    if !content.contains("<Events") {
        return Err(TimingError::Malformed("missing <Events> element".to_string()));
    }

    let frame_rate = FORMAT_TAG
        .captures(content)
        .and_then(|c| c.get(1))
        .and_then(|attrs| attribute(attrs.as_str(), "FrameRate"))
        .and_then(|fr| fr.trim().parse::<f64>().ok())
        .filter(|fr| *fr > 0.0)
        .unwrap_or(DEFAULT_FRAME_RATE);

    let events = EVENT_TAG
        .captures_iter(content)
        .filter_map(|caps| {
            let attrs = caps.get(1)?.as_str();
            let body = caps.get(2)?.as_str();
            let image = GRAPHIC_TAG.captures(body)?.get(1)?.as_str().trim();
            if image.is_empty() {
                return None;
            }
            let start = timecode_to_srt(attribute(attrs, "InTC").unwrap_or_default(), frame_rate);
            let end = timecode_to_srt(attribute(attrs, "OutTC").unwrap_or_default(), frame_rate);
            Some(SubtitleEvent::new(start, end, image))
        })
        .collect();

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<BDN Version="0.93">
  <Description>
    <Name Title="movie" Content=""/>
    <Format VideoFormat="1080p" FrameRate="25" DropFrame="False"/>
  </Description>
  <Events>
    <Event Forced="False" InTC="00:00:01:00" OutTC="00:00:02:12">
      <Graphic Width="800" Height="100" X="560" Y="900">movie_0001.png</Graphic>
    </Event>
    <Event Forced="False" InTC="00:01:00:05" OutTC="00:01:03:00">
      <Graphic Width="800" Height="100" X="560" Y="900"> movie_0002.png </Graphic>
    </Event>
    <Event Forced="False" InTC="00:01:05:00" OutTC="00:01:06:00">
    </Event>
  </Events>
</BDN>"#;

    #[test]
    fn test_parse_events_with_frame_rate() {
        let events = parse_bdsup2sub_xml(SAMPLE).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].start_time.to_string(), "00:00:01,000");
        // 12 帧 @25fps = 480ms
        assert_eq!(events[0].end_time.to_string(), "00:00:02,480");
        assert_eq!(events[1].start_time.to_string(), "00:01:00,200");
        assert_eq!(events[1].image_file, "movie_0002.png");
    }

    #[test]
    fn test_default_frame_rate() {
        let xml = r#"<BDN><Events><Event InTC="00:00:00:12" OutTC="00:00:01:00"><Graphic>a.png</Graphic></Event></Events></BDN>"#;
        let events = parse_bdsup2sub_xml(xml).unwrap();
        assert_eq!(events[0].start_time.as_millis(), 500);
    }

    #[test]
    fn test_single_quoted_attributes() {
        let xml = "<BDN><Description><Format FrameRate='25'/></Description><Events>\
            <Event InTC = '00:00:03:00' OutTC='00:00:04:05'><Graphic>b.png</Graphic></Event>\
            </Events></BDN>";
        let events = parse_bdsup2sub_xml(xml).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_time.as_millis(), 3_000);
        assert_eq!(events[0].end_time.as_millis(), 4_200);
    }

    #[test]
    fn test_attribute_name_must_match_exactly() {
        let attrs = r#" XInTC="00:00:09:00" InTC='00:00:01:00'"#;
        assert_eq!(attribute(attrs, "InTC"), Some("00:00:01:00"));
        assert_eq!(attribute(attrs, "OutTC"), None);
    }

    #[test]
    fn test_invalid_timecode_falls_back_to_zero() {
        assert_eq!(timecode_to_srt("00:01", 25.0), SrtTime::ZERO);
        assert_eq!(timecode_to_srt("01:00:00:00", 25.0).as_millis(), 3_600_000);
    }

    #[test]
    fn test_not_a_bdn_document() {
        assert!(matches!(
            parse_bdsup2sub_xml("<html></html>"),
            Err(TimingError::Malformed(_))
        ));
    }
}
