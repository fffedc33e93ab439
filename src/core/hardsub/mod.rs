//! 硬字幕提取 - 从画面中烧录的字幕生成带时间的字幕事件
//!
//! 核心策略：
//! 1. 逐帧裁剪上/下扫描区域，交给文字判定
//! 2. 每个区域一个状态机，把有字/无字序列切成事件
//! 3. 扫描结束后为每个事件取中点帧，裁剪保存为图片

pub mod frame;
pub mod pipeline;
pub mod source;
pub mod state_machine;
pub mod text_detector;

pub use frame::Frame;
pub use pipeline::{HardsubConfig, HardsubScanner, ScanSummary};
pub use source::{FrameSource, ImageSequenceSource, MemoryFrameSource};
pub use state_machine::{ChannelRun, ChannelRunState, ChannelSegmenter, RunAction, SegmentPolicy};
pub use text_detector::{LumaBandOracle, MockTextOracle, TextPresenceOracle};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardsubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Frame source not found: {0:?}")]
    SourceNotFound(PathBuf),
    #[error("Invalid frame rate: {0}")]
    InvalidFps(f64),
    #[error("Frame {0} is out of range")]
    FrameOutOfRange(u64),
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    #[error("No scan area selected")]
    NoScanArea,
    #[error("Hardsub scan cancelled by user")]
    Cancelled,
}
