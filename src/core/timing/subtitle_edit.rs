use super::TimingError;
use crate::core::subtitle::{SrtTime, SubtitleEvent};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

static BODY_EVENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"#\d+:([\d:.,]+)->([\d:.,]+).*?src='(.*?)'").expect("valid event regex")
});

fn selector(css: &str) -> Result<Selector, TimingError> {
    Selector::parse(css).map_err(|e| TimingError::Malformed(format!("selector {}: {:?}", css, e)))
}

fn parse_time(raw: &str) -> Option<SrtTime> {
    match raw.trim().parse() {
        Ok(time) => Some(time),
        Err(e) => {
            warn!("⚠️ {}", e);
            None
        }
    }
}

/// 解析 Subtitle Edit 导出的 HTML
///
/// 旧版为表格：第 2 列是 `start --> end`，第 5 列的 `img` 给出图片；
/// 新版没有表格，用正文中的 `#n:start->end ... src='...'` 形式。
pub fn parse_subtitle_edit_html(content: &str) -> Result<Vec<SubtitleEvent>, TimingError> {
    let document = Html::parse_document(content);
    let row_selector = selector("tr")?;
    let rows: Vec<ElementRef> = document.select(&row_selector).collect();

    if rows.len() > 1 {
        let cell_selector = selector("td")?;
        let img_selector = selector("img")?;
        let events = rows[1..]
            .iter()
            .filter_map(|row| {
                let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
                if cells.len() < 5 {
                    return None;
                }
                let timing: String = cells[1].text().collect();
                let (start, end) = timing.split_once("-->")?;
                let src = cells[4].select(&img_selector).next()?.value().attr("src")?;
                Some(SubtitleEvent::new(parse_time(start)?, parse_time(end)?, src))
            })
            .collect();
        return Ok(events);
    }

    let events = BODY_EVENT
        .captures_iter(content)
        .filter_map(|caps| {
            let start = parse_time(caps.get(1)?.as_str())?;
            let end = parse_time(caps.get(2)?.as_str())?;
            Some(SubtitleEvent::new(start, end, caps.get(3)?.as_str()))
        })
        .collect();
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_layout() {
        let html = r#"<html><body><table>
            <tr><th>#</th><th>Time</th><th>Duration</th><th>Text</th><th>Image</th></tr>
            <tr><td>1</td><td>00:00:01,000 --> 00:00:02,500</td><td>1.5</td><td></td><td><img src="0001.png"></td></tr>
            <tr><td>2</td><td>00:00:03,000 --> 00:00:04,000</td><td>1</td><td></td><td><img src="0002.png"></td></tr>
            <tr><td>broken</td></tr>
        </table></body></html>"#;

        let events = parse_subtitle_edit_html(html).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].end_time.as_millis(), 2_500);
        assert_eq!(events[1].image_file, "0002.png");
    }

    #[test]
    fn test_body_text_layout() {
        let html = "<html><body>\
            <p>#1:0:00:01.5->0:00:02.75 <img src='0001.png'></p>\
            <p>#2:01:02,000->01:03,250 <img src='0002.png'></p>\
            </body></html>";

        let events = parse_subtitle_edit_html(html).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].start_time.to_string(), "00:00:01,500");
        assert_eq!(events[0].end_time.to_string(), "00:00:02,750");
        assert_eq!(events[1].start_time.to_string(), "00:01:02,000");
        assert_eq!(events[1].image_file, "0002.png");
    }

    #[test]
    fn test_no_events() {
        assert!(parse_subtitle_edit_html("<html><body>nothing</body></html>")
            .unwrap()
            .is_empty());
    }
}
