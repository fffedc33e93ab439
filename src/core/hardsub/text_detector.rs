use super::frame::Frame;

/// 小于该尺寸的区域不做检测
pub const MIN_REGION_SIZE: u32 = 32;

/// 文字存在判定。给定裁剪后的区域，返回 `[0, 1]` 置信度；
/// 是否有字由阈值比较得出，阈值越高只会让 true 变 false。
pub trait TextPresenceOracle: Send + Sync {
    fn score(&self, region: &Frame) -> f32;

    fn has_text(&self, region: &Frame, threshold: f32) -> bool {
        self.score(region) >= threshold
    }
}

/// 基于亮度特征的轻量字幕检测器
/// 针对硬字幕特点：
/// 1. 字幕颜色通常是白色/黄色，亮度高
/// 2. 文字与背景对比度高
/// 3. 文字有水平方向的笔画边缘
pub struct LumaBandOracle {
    /// 亮度阈值 (0-255)，用于检测白字/黄字
    brightness_threshold: u8,
    /// 对比度阈值（标准差）
    contrast_threshold: f32,
    /// 最小文字区域占比
    min_text_area_ratio: f32,
    /// 水平边缘判定的左右像素差
    edge_delta: i32,
}

impl LumaBandOracle {
    pub fn new() -> Self {
        Self {
            brightness_threshold: 180,
            contrast_threshold: 40.0,
            min_text_area_ratio: 0.005,
            edge_delta: 30,
        }
    }

    /// 深色字幕背景较多时放宽亮度要求
    pub fn with_brightness_threshold(mut self, threshold: u8) -> Self {
        self.brightness_threshold = threshold;
        self
    }

    fn score_luma(&self, gray: &[u8], width: u32, height: u32) -> f32 {
        let w = width as usize;
        let h = height as usize;
        let total_pixels = (w * h) as u64;
        if total_pixels == 0 || gray.len() < w * h {
            return 0.0;
        }

        // 第一遍：均值
        let sum_brightness: u64 = gray[..w * h].iter().map(|&p| p as u64).sum();
        let mean = (sum_brightness / total_pixels) as i32;

        // 第二遍：方差和高亮像素
        let mut bright_pixels = 0u64;
        let mut sum_squared_diff = 0u64;
        for &pixel in &gray[..w * h] {
            if pixel > self.brightness_threshold {
                bright_pixels += 1;
            }
            let diff = pixel as i32 - mean;
            sum_squared_diff += (diff * diff) as u64;
        }

        let std_dev = ((sum_squared_diff / total_pixels) as f32).sqrt();
        let bright_ratio = bright_pixels as f32 / total_pixels as f32;
        let horizontal_edge_ratio = self.horizontal_edge_ratio(gray, w, h);

        // 三项特征缺一项即视为无字
        if bright_ratio <= self.min_text_area_ratio
            || std_dev <= self.contrast_threshold
            || horizontal_edge_ratio <= 0.02
        {
            return 0.0;
        }

        let bright_score = (bright_ratio * 10.0).min(0.4);
        let contrast_score = (std_dev / 100.0).min(0.3);
        let edge_score = (horizontal_edge_ratio * 5.0).min(0.3);
        (bright_score + contrast_score + edge_score).min(1.0)
    }

    /// 检测水平方向的边缘（文字笔画特征）
    fn horizontal_edge_ratio(&self, gray: &[u8], w: usize, h: usize) -> f32 {
        if w < 3 {
            return 0.0;
        }
        let mut edge_count = 0u32;
        let mut total = 0u32;

        for y in 0..h {
            for x in 1..(w - 1) {
                let idx = y * w + x;
                let left = gray[idx - 1] as i32;
                let right = gray[idx + 1] as i32;
                if (right - left).abs() > self.edge_delta {
                    edge_count += 1;
                }
                total += 1;
            }
        }

        if total == 0 {
            0.0
        } else {
            edge_count as f32 / total as f32
        }
    }
}

impl Default for LumaBandOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl TextPresenceOracle for LumaBandOracle {
    fn score(&self, region: &Frame) -> f32 {
        if region.width < MIN_REGION_SIZE || region.height < MIN_REGION_SIZE {
            return 0.0;
        }
        let gray = region.to_luma();
        self.score_luma(&gray, region.width, region.height)
    }
}

pub struct MockTextOracle {
    // 模拟在特定帧编号有文字
    text_frame_pattern: Option<Box<dyn Fn(u64) -> bool + Send + Sync>>,
    confidence: f32,
}

impl MockTextOracle {
    pub fn new() -> Self {
        Self {
            text_frame_pattern: None,
            confidence: 0.85,
        }
    }

    pub fn with_pattern<F>(pattern: F) -> Self
    where
        F: Fn(u64) -> bool + Send + Sync + 'static,
    {
        Self {
            text_frame_pattern: Some(Box::new(pattern)),
            confidence: 0.85,
        }
    }

    pub fn with_fixed_frames(frames: Vec<u64>) -> Self {
        Self::with_pattern(move |frame_num| frames.contains(&frame_num))
    }
}

impl Default for MockTextOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl TextPresenceOracle for MockTextOracle {
    fn score(&self, region: &Frame) -> f32 {
        let has_text = self
            .text_frame_pattern
            .as_ref()
            .map(|p| p(region.frame_number))
            .unwrap_or(false);

        if has_text {
            self.confidence
        } else {
            0.0
        }
    }
}
