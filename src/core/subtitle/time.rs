use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 字幕时间戳，毫秒精度，文本形式为 `HH:MM:SS,mmm`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SrtTime(u64);

impl SrtTime {
    pub const ZERO: SrtTime = SrtTime(0);

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration.as_millis() as u64)
    }

    /// 帧序号换算时间（截断到毫秒）
    pub fn from_frame(frame_number: u64, fps: f64) -> Self {
        if fps <= 0.0 {
            return Self::ZERO;
        }
        Self((frame_number as f64 * 1000.0 / fps) as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl fmt::Display for SrtTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0 % 1000;
        let total_secs = self.0 / 1000;
        let secs = total_secs % 60;
        let minutes = (total_secs / 60) % 60;
        let hours = total_secs / 3600;
        write!(f, "{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSrtTimeError(pub String);

impl fmt::Display for ParseSrtTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid subtitle timestamp: {}", self.0)
    }
}

impl std::error::Error for ParseSrtTimeError {}

impl FromStr for SrtTime {
    type Err = ParseSrtTimeError;

    /// 接受 `H:MM:SS,mmm`、`MM:SS,mmm`，小数点分隔符 `.` 与 `,` 等价
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseSrtTimeError(s.to_string());
        let normalized = s.trim().replace('.', ",");
        let (clock, fraction) = match normalized.split_once(',') {
            Some((clock, fraction)) => (clock, fraction),
            None => (normalized.as_str(), "0"),
        };

        let parts: Vec<&str> = clock.split(':').collect();
        let (h, m, sec) = match parts.as_slice() {
            [h, m, sec] => (*h, *m, *sec),
            [m, sec] => ("0", *m, *sec),
            _ => return Err(err()),
        };
        let h: u64 = h.parse().map_err(|_| err())?;
        let m: u64 = m.parse().map_err(|_| err())?;
        let sec: u64 = sec.parse().map_err(|_| err())?;

        if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        // "5" 表示 500ms, "05" 表示 50ms
        let padded = format!("{:0<3}", fraction);
        let millis: u64 = padded[..3].parse().map_err(|_| err())?;

        Ok(Self(((h * 60 + m) * 60 + sec) * 1000 + millis))
    }
}

impl Serialize for SrtTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SrtTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_srt_time() {
        assert_eq!(SrtTime::from_millis(0).to_string(), "00:00:00,000");
        assert_eq!(SrtTime::from_millis(1_000).to_string(), "00:00:01,000");
        assert_eq!(SrtTime::from_millis(3_723_045).to_string(), "01:02:03,045");
    }

    #[test]
    fn test_parse_srt_time_variants() {
        assert_eq!("01:02:03,045".parse::<SrtTime>().unwrap().as_millis(), 3_723_045);
        assert_eq!("1:02:03.5".parse::<SrtTime>().unwrap().as_millis(), 3_723_500);
        assert_eq!("02:03,045".parse::<SrtTime>().unwrap().as_millis(), 123_045);
        assert!("garbage".parse::<SrtTime>().is_err());
        assert!("00:00:01,".parse::<SrtTime>().is_err());
    }

    #[test]
    fn test_from_frame_truncates() {
        let t = SrtTime::from_frame(1, 30.0);
        assert_eq!(t.as_millis(), 33);
        assert_eq!(SrtTime::from_frame(60, 30.0).as_millis(), 2_000);
        assert_eq!(SrtTime::from_frame(10, 0.0), SrtTime::ZERO);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&SrtTime::from_millis(1_500)).unwrap();
        assert_eq!(json, "\"00:00:01,500\"");
        let back: SrtTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_millis(), 1_500);
    }
}
