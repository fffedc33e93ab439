//! 会话目录：一次处理的图片、时间轴、批次日志与失败批次检查点

use crate::core::ocr::{BatchCheckpoint, BatchLog, FailedBatches};
use crate::core::subtitle::SubtitleEvent;
use crate::core::timing::{parse_timing_file, TimingError, TimingFormat, TIMING_EXTENSIONS};
use chrono::Local;
use log::{error, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use uuid::Uuid;

pub const IMAGES_DIR: &str = "images";
pub const LOGS_DIR: &str = "logs";
pub const HARDSUB_TIMING_FILE: &str = "hardsub_log.json";
pub const FAILED_BATCHES_FILE: &str = "failed_batches.json";

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO 错误: {0}")]
    Io(#[from] io::Error),
    #[error("JSON 数据解析失败: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Timing(#[from] TimingError),
    #[error("Session folder does not exist: {0}")]
    NotFound(PathBuf),
    #[error("No timing file (.xml, .html, .json) found in {0}")]
    NoTimingArtifact(PathBuf),
    #[error("Several timing files found in session: {0:?}")]
    AmbiguousTimingArtifact(Vec<String>),
}

/// 所有会话的根目录
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 新建 `{name}_{YYYYmmdd_HHMMSS}_{4 位随机}` 目录及其 images/ logs/
    pub fn create_session(&self, base_name: &str) -> Result<Session, SessionError> {
        let safe_name = sanitize_name(base_name);
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");

        loop {
            let suffix = Uuid::new_v4().simple().to_string();
            let dir = self
                .root
                .join(format!("{}_{}_{}", safe_name, timestamp, &suffix[..4]));
            match fs::create_dir(&dir) {
                Ok(()) => {
                    fs::create_dir_all(dir.join(IMAGES_DIR))?;
                    fs::create_dir_all(dir.join(LOGS_DIR))?;
                    info!("📁 New session directory created: {}", dir.display());
                    return Ok(Session { dir });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 会话名列表，最近修改的在前
    pub fn list_sessions(&self) -> Result<Vec<String>, SessionError> {
        let mut sessions: Vec<(SystemTime, String)> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            sessions.push((modified, entry.file_name().to_string_lossy().into_owned()));
        }
        sessions.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(sessions.into_iter().map(|(_, name)| name).collect())
    }
}

fn sanitize_name(base_name: &str) -> String {
    let safe: String = base_name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_'))
        .collect();
    let safe = safe.trim_end();
    if safe.is_empty() {
        "session".to_string()
    } else {
        safe.to_string()
    }
}

/// 载入会话时的恢复情况
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeSummary {
    pub batch_logs: usize,
    pub failed: FailedBatches,
    pub message: String,
}

/// 单个会话目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    dir: PathBuf,
}

impl Session {
    /// 打开已有会话；缺少 logs/ 时补建
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(SessionError::NotFound(dir));
        }
        fs::create_dir_all(dir.join(LOGS_DIR))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn images_dir(&self) -> PathBuf {
        self.dir.join(IMAGES_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join(LOGS_DIR)
    }

    /// 复制外部时间轴文件及同目录图片进会话，并解析
    pub fn import_timing_file(&self, source: &Path) -> Result<Vec<SubtitleEvent>, SessionError> {
        if TimingFormat::from_path(source).is_none() {
            return Err(TimingError::Unsupported(source.to_path_buf()).into());
        }
        let file_name = source
            .file_name()
            .ok_or_else(|| SessionError::NotFound(source.to_path_buf()))?;
        let target = self.dir.join(file_name);
        fs::copy(source, &target)?;

        let images_dir = self.images_dir();
        fs::create_dir_all(&images_dir)?;
        let mut copied = 0;
        if let Some(source_dir) = source.parent().filter(|p| p.is_dir()) {
            for entry in fs::read_dir(source_dir)? {
                let path = entry?.path();
                if path.is_file() && has_extension(&path, &IMAGE_EXTENSIONS) {
                    if let Some(name) = path.file_name() {
                        fs::copy(&path, images_dir.join(name))?;
                        copied += 1;
                    }
                }
            }
        }
        info!("🖼️ Copied {} images into session", copied);

        Ok(parse_timing_file(&target)?)
    }

    /// 硬字幕会话的时间轴
    pub fn write_hardsub_timing(&self, events: &[SubtitleEvent]) -> Result<PathBuf, SessionError> {
        let path = self.dir.join(HARDSUB_TIMING_FILE);
        fs::write(&path, serde_json::to_string_pretty(events)?)?;
        Ok(path)
    }

    /// 会话根目录下应当恰好有一个时间轴文件
    pub fn find_timing_artifact(&self) -> Result<PathBuf, SessionError> {
        let mut candidates = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && has_extension(&path, &TIMING_EXTENSIONS) {
                candidates.push(path);
            }
        }
        candidates.sort();

        match candidates.len() {
            0 => Err(SessionError::NoTimingArtifact(self.dir.clone())),
            1 => Ok(candidates.remove(0)),
            _ => Err(SessionError::AmbiguousTimingArtifact(
                candidates
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect(),
            )),
        }
    }

    /// 按窗口起点升序列出批次日志
    pub fn batch_log_files(&self) -> Result<Vec<(usize, PathBuf)>, SessionError> {
        let logs_dir = self.logs_dir();
        if !logs_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut logs = Vec::new();
        for entry in fs::read_dir(&logs_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(start) = BatchLog::batch_start_from_file_name(&name.to_string_lossy()) {
                logs.push((start, entry.path()));
            }
        }
        logs.sort_by_key(|(start, _)| *start);
        Ok(logs)
    }

    /// 重建事件列表：解析时间轴，再按顺序重放批次日志
    ///
    /// 重放只写入日志中的文本，重复载入结果一致；损坏的日志记录错误后跳过。
    pub fn load_events(&self) -> Result<(Vec<SubtitleEvent>, ResumeSummary), SessionError> {
        let timing = self.find_timing_artifact()?;
        let mut events = parse_timing_file(&timing)?;

        let mut batch_logs = 0;
        for (start, path) in self.batch_log_files()? {
            let log = fs::read_to_string(&path)
                .map_err(SessionError::from)
                .and_then(|content| BatchLog::parse(start, &content).map_err(SessionError::from));
            match log {
                Ok(log) => {
                    log.apply(&mut events);
                    batch_logs += 1;
                }
                Err(e) => error!("❌ Error parsing log {}: {}", path.display(), e),
            }
        }

        let failed = self.load_failed_batches()?;
        let message = if batch_logs > 0 {
            format!(
                "Loaded {} batches from log files. Ready to review and save.",
                batch_logs
            )
        } else {
            "No log files found. Only original structure loaded.".to_string()
        };
        info!("📂 Session {}: {}", self.name(), message);

        Ok((
            events,
            ResumeSummary {
                batch_logs,
                failed,
                message,
            },
        ))
    }

    pub fn load_failed_batches(&self) -> Result<FailedBatches, SessionError> {
        let path = self.logs_dir().join(FAILED_BATCHES_FILE);
        if !path.exists() {
            return Ok(FailedBatches::new());
        }
        match serde_json::from_str(&fs::read_to_string(&path)?) {
            Ok(failed) => Ok(failed),
            Err(e) => {
                warn!("⚠️ Failed batch checkpoint unreadable, ignored: {}", e);
                Ok(FailedBatches::new())
            }
        }
    }

    pub fn save_failed_batches(&self, failed: &FailedBatches) -> Result<(), SessionError> {
        let path = self.logs_dir().join(FAILED_BATCHES_FILE);
        fs::write(path, serde_json::to_string(failed)?)?;
        Ok(())
    }
}

/// 打开会话目录并恢复事件列表
pub fn load_session(
    path: &Path,
) -> Result<(Session, Vec<SubtitleEvent>, ResumeSummary), SessionError> {
    let session = Session::open(path)?;
    let (events, summary) = session.load_events()?;
    Ok((session, events, summary))
}

impl BatchCheckpoint for Session {
    fn read_image(&self, file_name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.images_dir().join(file_name))
    }

    fn write_batch_log(&self, log: &BatchLog) -> io::Result<()> {
        let path = self.logs_dir().join(BatchLog::file_name(log.batch_start));
        let merged = match fs::read_to_string(&path) {
            Ok(content) => match BatchLog::parse(log.batch_start, &content) {
                Ok(mut existing) => {
                    existing.merge(log.clone());
                    existing
                }
                Err(_) => log.clone(),
            },
            Err(_) => log.clone(),
        };
        let json = serde_json::to_string_pretty(&merged).map_err(io::Error::other)?;
        fs::write(path, json)
    }

    fn write_raw_reply(&self, batch_start: usize, raw: &str) -> io::Result<()> {
        fs::write(
            self.logs_dir().join(BatchLog::raw_reply_file_name(batch_start)),
            raw,
        )
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}
