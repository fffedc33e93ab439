//! 帧来源：顺序读取 + 按帧号回读（用于抽取代表帧）

use super::frame::Frame;
use super::HardsubError;
use crate::core::subtitle::SrtTime;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub trait FrameSource {
    fn fps(&self) -> f64;

    /// 总帧数（未知时为 None）
    fn frame_count(&self) -> Option<u64>;

    /// 顺序读取下一帧，读完返回 Ok(None)
    fn next_frame(&mut self) -> Result<Option<Frame>, HardsubError>;

    /// 定位并读取指定帧
    fn read_frame_at(&mut self, frame_number: u64) -> Result<Frame, HardsubError>;
}

/// 已解码帧的图片目录，按文件名排序，帧率固定
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    fps: f64,
    cursor: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, fps: f64) -> Result<Self, HardsubError> {
        if !(fps > 0.0) {
            return Err(HardsubError::InvalidFps(fps));
        }
        if !dir.is_dir() {
            return Err(HardsubError::SourceNotFound(dir.to_path_buf()));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        info!("🎞️ ImageSequenceSource: {} frames at {:.3} fps from {:?}", files.len(), fps, dir);
        Ok(Self {
            files,
            fps,
            cursor: 0,
        })
    }

    fn load(&self, frame_number: u64) -> Result<Frame, HardsubError> {
        let path = self
            .files
            .get(frame_number as usize)
            .ok_or(HardsubError::FrameOutOfRange(frame_number))?;
        debug!("Loading frame {} from {:?}", frame_number, path);

        let img = image::open(path)?.to_rgba8();
        let timestamp = SrtTime::from_frame(frame_number, self.fps);
        Ok(Frame::from_image(img, timestamp.as_millis(), frame_number))
    }
}

impl FrameSource for ImageSequenceSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.files.len() as u64)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, HardsubError> {
        if self.cursor >= self.files.len() {
            return Ok(None);
        }
        let frame = self.load(self.cursor as u64)?;
        self.cursor += 1;
        Ok(Some(frame))
    }

    fn read_frame_at(&mut self, frame_number: u64) -> Result<Frame, HardsubError> {
        self.load(frame_number)
    }
}

/// 内存中的帧序列，宿主直接推送解码结果时使用
pub struct MemoryFrameSource {
    frames: Vec<Frame>,
    fps: f64,
    cursor: usize,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        Self {
            frames,
            fps,
            cursor: 0,
        }
    }
}

impl FrameSource for MemoryFrameSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.frames.len() as u64)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, HardsubError> {
        let frame = self.frames.get(self.cursor).cloned();
        if frame.is_some() {
            self.cursor += 1;
        }
        Ok(frame)
    }

    fn read_frame_at(&mut self, frame_number: u64) -> Result<Frame, HardsubError> {
        self.frames
            .get(frame_number as usize)
            .cloned()
            .ok_or(HardsubError::FrameOutOfRange(frame_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_frame(dir: &Path, name: &str, value: u8) {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([value, value, value, 255]));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_image_sequence_reads_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "frame_0002.png", 20);
        write_frame(dir.path(), "frame_0000.png", 0);
        write_frame(dir.path(), "frame_0001.png", 10);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 10.0).unwrap();
        assert_eq!(source.frame_count(), Some(3));

        let mut values = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            values.push((frame.frame_number, frame.data[0], frame.timestamp.as_millis()));
        }
        assert_eq!(values, vec![(0, 0, 0), (1, 10, 100), (2, 20, 200)]);

        let seek = source.read_frame_at(1).unwrap();
        assert_eq!(seek.data[0], 10);
        assert!(matches!(
            source.read_frame_at(9),
            Err(HardsubError::FrameOutOfRange(9))
        ));
    }

    #[test]
    fn test_image_sequence_rejects_bad_fps() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path(), 0.0),
            Err(HardsubError::InvalidFps(_))
        ));
    }

    #[test]
    fn test_memory_source() {
        let frames = (0..3)
            .map(|i| Frame::new(2, 2, vec![0; 16], i * 40, i))
            .collect();
        let mut source = MemoryFrameSource::new(frames, 25.0);

        let mut count = 0;
        while source.next_frame().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(source.read_frame_at(2).unwrap().frame_number, 2);
        assert!(source.read_frame_at(3).is_err());
    }
}
