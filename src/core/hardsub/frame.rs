use super::HardsubError;
use std::path::Path;
use std::time::Duration;

/// 帧数据结构
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>, // RGBA 格式
    pub timestamp: Duration,
    pub frame_number: u64,
}

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_ms: u64,
        frame_number: u64,
    ) -> Self {
        Self {
            width,
            height,
            data,
            timestamp: Duration::from_millis(timestamp_ms),
            frame_number,
        }
    }

    pub fn from_image(img: image::RgbaImage, timestamp_ms: u64, frame_number: u64) -> Self {
        let (width, height) = img.dimensions();
        Self::new(width, height, img.into_raw(), timestamp_ms, frame_number)
    }

    pub fn pixel_count(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// 截取 [y, y + rows) 行，超出范围的部分被裁掉
    pub fn crop_rows(&self, y: u32, rows: u32) -> Frame {
        let y = y.min(self.height);
        let rows = rows.min(self.height - y);
        let stride = self.width as usize * 4;
        let start = y as usize * stride;
        let end = (start + rows as usize * stride).min(self.data.len());

        Frame {
            width: self.width,
            height: rows,
            data: self.data[start.min(end)..end].to_vec(),
            timestamp: self.timestamp,
            frame_number: self.frame_number,
        }
    }

    /// 顶部 percent% 高度的条带
    pub fn top_strip(&self, percent: u8) -> Frame {
        self.crop_rows(0, self.strip_height(percent))
    }

    /// 底部 percent% 高度的条带
    pub fn bottom_strip(&self, percent: u8) -> Frame {
        let rows = self.strip_height(percent);
        self.crop_rows(self.height - rows, rows)
    }

    fn strip_height(&self, percent: u8) -> u32 {
        let pct = percent.min(100) as u64;
        (self.height as u64 * pct / 100) as u32
    }

    /// 灰度（Y）平面
    pub fn to_luma(&self) -> Vec<u8> {
        self.data
            .chunks_exact(4)
            .map(|rgba| {
                let r = rgba[0] as u32;
                let g = rgba[1] as u32;
                let b = rgba[2] as u32;
                ((r * 299 + g * 587 + b * 114) / 1000) as u8
            })
            .collect()
    }

    pub fn save_png(&self, path: &Path) -> Result<(), HardsubError> {
        let img = image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| {
                HardsubError::InvalidFrame(format!(
                    "frame {} buffer does not match {}x{}",
                    self.frame_number, self.width, self.height
                ))
            })?;
        img.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}
