use crate::core::hardsub::frame::Frame;
use crate::core::hardsub::source::FrameSource;
use crate::core::hardsub::state_machine::{ChannelRun, ChannelSegmenter, SegmentPolicy};
use crate::core::hardsub::text_detector::TextPresenceOracle;
use crate::core::hardsub::HardsubError;
use crate::core::progress::{CancellationToken, ProgressSink};
use crate::core::subtitle::{Channel, SrtTime, SubtitleEvent};
use log::{info, warn};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct HardsubConfig {
    pub scan_top: bool,
    pub scan_bottom: bool,
    /// 扫描区域占画面高度的百分比
    pub scan_area_height_percent: u8,
    /// 文字判定置信度阈值
    pub confidence: f32,
    pub policy: SegmentPolicy,
}

impl Default for HardsubConfig {
    fn default() -> Self {
        Self {
            scan_top: true,
            scan_bottom: true,
            scan_area_height_percent: 30,
            confidence: 0.5,
            policy: SegmentPolicy::default(),
        }
    }
}

impl HardsubConfig {
    pub fn bottom_only() -> Self {
        Self {
            scan_top: false,
            ..Default::default()
        }
    }

    fn crop(&self, frame: &Frame, channel: Channel) -> Frame {
        match channel {
            Channel::Top => frame.top_strip(self.scan_area_height_percent),
            Channel::Bottom => frame.bottom_strip(self.scan_area_height_percent),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub frames_scanned: u64,
    pub top_events: usize,
    pub bottom_events: usize,
    pub extracted: usize,
    pub skipped: usize,
}

pub struct HardsubScanner {
    config: HardsubConfig,
}

impl HardsubScanner {
    pub fn new() -> Self {
        Self::with_config(HardsubConfig::default())
    }

    pub fn with_config(config: HardsubConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HardsubConfig {
        &self.config
    }

    /// 扫描 + 抽取代表帧
    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        oracle: &dyn TextPresenceOracle,
        images_dir: &Path,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<(Vec<SubtitleEvent>, ScanSummary), HardsubError> {
        let (runs, frames_scanned) = self.scan(source, oracle, cancel, progress)?;

        let mut summary = ScanSummary {
            frames_scanned,
            top_events: runs.iter().filter(|r| r.channel == Channel::Top).count(),
            bottom_events: runs.iter().filter(|r| r.channel == Channel::Bottom).count(),
            ..Default::default()
        };
        info!(
            "🔍 Found {} top events and {} bottom events in {} frames",
            summary.top_events, summary.bottom_events, frames_scanned
        );

        let events = self.extract(source, &runs, images_dir, cancel)?;
        summary.extracted = events.len();
        summary.skipped = runs.len() - events.len();

        info!(
            "✅ Hardsub pipeline finished: {} subtitles extracted, {} skipped",
            summary.extracted, summary.skipped
        );
        Ok((events, summary))
    }

    /// 第一阶段：逐帧判定并切分事件，返回（所有事件, 扫描帧数）。
    /// 事件按区域分组：先顶部，后底部。
    pub fn scan(
        &self,
        source: &mut dyn FrameSource,
        oracle: &dyn TextPresenceOracle,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<(Vec<ChannelRun>, u64), HardsubError> {
        if !self.config.scan_top && !self.config.scan_bottom {
            return Err(HardsubError::NoScanArea);
        }
        let fps = source.fps();
        if !(fps > 0.0) {
            return Err(HardsubError::InvalidFps(fps));
        }

        let total = source.frame_count().unwrap_or(0) as usize;
        let report_every = (fps.round() as u64).max(1);
        let policy = self.config.policy;
        let mut top = self
            .config
            .scan_top
            .then(|| ChannelSegmenter::with_policy(Channel::Top, policy));
        let mut bottom = self
            .config
            .scan_bottom
            .then(|| ChannelSegmenter::with_policy(Channel::Bottom, policy));

        info!(
            "🎬 Starting hardsub scan: {} frames, {:.3} fps, area {}%",
            total, fps, self.config.scan_area_height_percent
        );

        let (scan_top, scan_bottom) = (top.is_some(), bottom.is_some());
        let mut frame_idx: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                info!("Hardsub scan cancelled by user at frame {}", frame_idx);
                return Err(HardsubError::Cancelled);
            }

            let frame = match source.next_frame()? {
                Some(frame) => frame,
                None => break,
            };
            let frame_time = SrtTime::from_frame(frame_idx, fps);

            if frame_idx % report_every == 0 {
                progress.on_progress(frame_idx as usize, total);
            }

            let (top_has_text, bottom_has_text) = rayon::join(
                || scan_top && self.detect(oracle, &frame, Channel::Top),
                || scan_bottom && self.detect(oracle, &frame, Channel::Bottom),
            );

            if let Some(segmenter) = bottom.as_mut() {
                segmenter.observe(bottom_has_text, frame_time, frame_idx);
            }
            if let Some(segmenter) = top.as_mut() {
                segmenter.observe(top_has_text, frame_time, frame_idx);
            }

            frame_idx += 1;
        }

        progress.on_progress(frame_idx as usize, total.max(frame_idx as usize));

        // 视频在有字帧结束时，未关闭的区间也要收尾
        let mut runs = Vec::new();
        if let Some(segmenter) = top {
            runs.extend(segmenter.finish());
        }
        if let Some(segmenter) = bottom {
            runs.extend(segmenter.finish());
        }
        Ok((runs, frame_idx))
    }

    /// 第二阶段：为每个事件回读中点帧、裁剪并保存。
    /// 单帧读取或保存失败只跳过该事件。
    pub fn extract(
        &self,
        source: &mut dyn FrameSource,
        runs: &[ChannelRun],
        images_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubtitleEvent>, HardsubError> {
        info!("🖼️ Extracting representative images for {} events...", runs.len());

        let mut events = Vec::with_capacity(runs.len());
        let mut sub_count = 0usize;

        for run in runs {
            if cancel.is_cancelled() {
                info!("Hardsub extraction cancelled by user");
                return Err(HardsubError::Cancelled);
            }

            let middle = run.middle_frame();
            let frame = match source.read_frame_at(middle) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("⚠️ Could not read frame {} for {} event: {}", middle, run.channel, e);
                    continue;
                }
            };

            sub_count += 1;
            let image_file = format!("hardsub_{:05}.png", sub_count);
            let crop = self.config.crop(&frame, run.channel);
            if let Err(e) = crop.save_png(&images_dir.join(&image_file)) {
                warn!("⚠️ Could not save {}: {}", image_file, e);
                continue;
            }

            events.push(
                SubtitleEvent::new(run.start_time, run.end_time, image_file)
                    .with_channel(run.channel),
            );
        }

        Ok(events)
    }

    fn detect(&self, oracle: &dyn TextPresenceOracle, frame: &Frame, channel: Channel) -> bool {
        let region = self.config.crop(frame, channel);
        oracle.has_text(&region, self.config.confidence)
    }
}

impl Default for HardsubScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hardsub::source::MemoryFrameSource;
    use crate::core::hardsub::text_detector::MockTextOracle;
    use crate::core::progress::NoProgress;
    use std::cell::RefCell;

    fn create_test_frames(count: u64, fps: f64) -> Vec<Frame> {
        (0..count)
            .map(|i| {
                let data = vec![128u8; 64 * 64 * 4];
                Frame::new(64, 64, data, SrtTime::from_frame(i, fps).as_millis(), i)
            })
            .collect()
    }

    /// 只在某个区域报告文字的判定
    struct ChannelOracle {
        top_frames: Vec<u64>,
        bottom_frames: Vec<u64>,
    }

    impl TextPresenceOracle for ChannelOracle {
        fn score(&self, region: &Frame) -> f32 {
            // 测试帧的顶部条带第一个像素被标记为 1
            let frames = if region.data[0] == 1 {
                &self.top_frames
            } else {
                &self.bottom_frames
            };
            if frames.contains(&region.frame_number) {
                1.0
            } else {
                0.0
            }
        }
    }

    fn marked_frames(count: u64) -> Vec<Frame> {
        create_test_frames(count, 10.0)
            .into_iter()
            .map(|mut f| {
                f.data[0] = 1;
                f
            })
            .collect()
    }

    #[test]
    fn test_scan_finds_runs_per_channel() {
        let scanner = HardsubScanner::new();
        let mut source = MemoryFrameSource::new(marked_frames(10), 10.0);
        let oracle = ChannelOracle {
            top_frames: vec![1, 2, 3],
            bottom_frames: vec![5, 8, 9],
        };

        let (runs, scanned) = scanner
            .scan(&mut source, &oracle, &CancellationToken::new(), &NoProgress)
            .unwrap();

        assert_eq!(scanned, 10);
        let top: Vec<_> = runs.iter().filter(|r| r.channel == Channel::Top).collect();
        let bottom: Vec<_> = runs.iter().filter(|r| r.channel == Channel::Bottom).collect();
        assert_eq!(top.len(), 1);
        assert_eq!((top[0].start_frame, top[0].end_frame), (1, 3));
        assert_eq!(bottom.len(), 2);
        assert_eq!((bottom[1].start_frame, bottom[1].end_frame), (8, 9));
        assert_eq!(bottom[1].end_time, SrtTime::from_millis(900));
    }

    #[test]
    fn test_run_extracts_images_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = HardsubScanner::with_config(HardsubConfig::bottom_only());
        let mut source = MemoryFrameSource::new(create_test_frames(20, 10.0), 10.0);
        let oracle = MockTextOracle::with_pattern(|n| (4..=8).contains(&n) || n >= 15);

        let (events, summary) = scanner
            .run(&mut source, &oracle, dir.path(), &CancellationToken::new(), &NoProgress)
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(summary.bottom_events, 2);
        assert_eq!(summary.top_events, 0);
        assert_eq!(summary.skipped, 0);

        assert_eq!(events[0].start_time.to_string(), "00:00:00,400");
        assert_eq!(events[0].end_time.to_string(), "00:00:00,800");
        assert_eq!(events[0].channel, Some(Channel::Bottom));
        assert!(events[0].text.is_empty());
        assert_eq!(events[1].image_file, "hardsub_00002.png");

        let saved = image::open(dir.path().join(&events[0].image_file)).unwrap();
        // 64 像素高的 30% 底部区域
        assert_eq!(saved.height(), 19);
    }

    #[test]
    fn test_unreadable_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = HardsubScanner::with_config(HardsubConfig::bottom_only());
        let mut source = MemoryFrameSource::new(create_test_frames(4, 10.0), 10.0);

        let runs = vec![
            ChannelRun {
                channel: Channel::Bottom,
                start_time: SrtTime::ZERO,
                end_time: SrtTime::from_millis(100),
                start_frame: 0,
                end_frame: 1,
            },
            ChannelRun {
                channel: Channel::Bottom,
                start_time: SrtTime::from_millis(5_000),
                end_time: SrtTime::from_millis(6_000),
                start_frame: 50,
                end_frame: 60,
            },
        ];

        let events = scanner
            .extract(&mut source, &runs, dir.path(), &CancellationToken::new())
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_time, SrtTime::ZERO);
    }

    #[test]
    fn test_cancelled_scan() {
        let scanner = HardsubScanner::new();
        let mut source = MemoryFrameSource::new(create_test_frames(5, 10.0), 10.0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = scanner.scan(&mut source, &MockTextOracle::new(), &cancel, &NoProgress);
        assert!(matches!(result, Err(HardsubError::Cancelled)));
    }

    #[test]
    fn test_no_scan_area() {
        let scanner = HardsubScanner::with_config(HardsubConfig {
            scan_top: false,
            scan_bottom: false,
            ..Default::default()
        });
        let mut source = MemoryFrameSource::new(vec![], 10.0);
        let result = scanner.scan(&mut source, &MockTextOracle::new(), &CancellationToken::new(), &NoProgress);
        assert!(matches!(result, Err(HardsubError::NoScanArea)));
    }

    #[test]
    fn test_progress_reported_once_per_second() {
        let scanner = HardsubScanner::with_config(HardsubConfig::bottom_only());
        let mut source = MemoryFrameSource::new(create_test_frames(25, 10.0), 10.0);
        let seen = RefCell::new(Vec::new());
        let sink = |done: usize, total: usize| seen.borrow_mut().push((done, total));

        scanner
            .scan(&mut source, &MockTextOracle::new(), &CancellationToken::new(), &sink)
            .unwrap();

        assert_eq!(*seen.borrow(), vec![(0, 25), (10, 25), (20, 25), (25, 25)]);
    }
}
