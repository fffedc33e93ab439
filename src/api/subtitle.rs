//! 字幕 OCR 工作台

use crate::api::models::subtitle::{
    ApiError, HardsubScanResult, OcrRunSummary, ProgressSnapshot, SessionLoadResult,
    SubtitleItem, WorkStage, WorkbenchSettings,
};
use crate::core::hardsub::{HardsubScanner, ImageSequenceSource, LumaBandOracle};
use crate::core::ocr::{build_prompt, list_models, BatchOrchestrator, FailedBatches, GeminiClient};
use crate::core::progress::CancellationToken;
use crate::core::session::{load_session, Session, SessionStore};
use crate::core::settings::{PipelineSettings, SETTINGS_FILE};
use crate::core::subtitle::{is_hardsub_track, presentation_order, write_srt, SubtitleEvent};
use flutter_rust_bridge::frb;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

const SESSIONS_DIR: &str = "app_temp";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 运行中标志，离开作用域时自动清除
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ApiError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ApiError::busy())?;
        Ok(Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct WorkbenchState {
    session: Option<Session>,
    events: Vec<SubtitleEvent>,
    failed: FailedBatches,
}

/// 字幕 OCR 工作台 - 会话管理 + 硬字幕扫描 + 批量 OCR + SRT 导出
///
/// ```dart
/// final bench = SubtitleWorkbench.create(workspaceDir: dir);
/// await bench.importTimingFile(path: xmlPath);
/// final summary = await bench.runOcr();
/// bench.exportSrt(path: outPath);
/// ```
#[frb(opaque)]
pub struct SubtitleWorkbench {
    settings_path: PathBuf,
    store: SessionStore,
    settings: Mutex<PipelineSettings>,
    state: Mutex<WorkbenchState>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    progress: Mutex<ProgressSnapshot>,
}

impl SubtitleWorkbench {
    /// 以工作目录创建，设置保存在 settings.json，会话保存在 app_temp/
    #[frb(sync)]
    pub fn create(workspace_dir: String) -> Result<Self, ApiError> {
        crate::init_logging();
        let workspace = PathBuf::from(workspace_dir);
        let settings_path = workspace.join(SETTINGS_FILE);
        let settings = PipelineSettings::load(&settings_path)?;
        let store = SessionStore::new(workspace.join(SESSIONS_DIR))?;

        info!("🎬 SubtitleWorkbench: created at {}", workspace.display());
        Ok(Self {
            settings_path,
            store,
            settings: Mutex::new(settings),
            state: Mutex::new(WorkbenchState::default()),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            progress: Mutex::new(ProgressSnapshot::default()),
        })
    }

    #[frb(sync, getter)]
    pub fn settings(&self) -> WorkbenchSettings {
        WorkbenchSettings::from(&*lock(&self.settings))
    }

    #[frb(sync)]
    pub fn update_settings(&self, settings: WorkbenchSettings) -> Result<(), ApiError> {
        let mut current = lock(&self.settings);
        settings.apply_to(&mut current);
        current.save(&self.settings_path)?;
        Ok(())
    }

    #[frb(sync)]
    pub fn list_sessions(&self) -> Result<Vec<String>, ApiError> {
        Ok(self.store.list_sessions()?)
    }

    /// 导入 BDSup2Sub XML 或 Subtitle Edit HTML，新建会话
    #[frb]
    pub fn import_timing_file(&self, path: String) -> Result<SessionLoadResult, ApiError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let source = PathBuf::from(path);
        let base_name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let session = self.store.create_session(&base_name)?;
        let events = session.import_timing_file(&source)?;
        let result = SessionLoadResult {
            session_name: session.name(),
            subtitle_count: events.len(),
            batch_logs: 0,
            failed_batches: Vec::new(),
            message: format!("Loaded {} subtitles from timing file.", events.len()),
        };
        self.replace_state(session, events, FailedBatches::new());
        Ok(result)
    }

    /// 扫描一个按文件名排序的帧图片目录，生成硬字幕会话
    #[frb]
    pub fn process_hardsub_frames(
        &self,
        frames_dir: String,
        fps: f64,
    ) -> Result<HardsubScanResult, ApiError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let frames_dir = PathBuf::from(frames_dir);
        let mut source = ImageSequenceSource::open(&frames_dir, fps)?;
        let config = lock(&self.settings).hardsub.to_config();

        let base_name = frames_dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let session = self.store.create_session(&format!("{}_hardsub", base_name))?;

        let cancel = self.fresh_cancel_token();
        self.set_progress(WorkStage::Scanning, 0, 0);
        let sink = |processed: usize, total: usize| self.set_progress(WorkStage::Scanning, processed, total);

        let outcome = HardsubScanner::with_config(config)
            .run(
                &mut source,
                &LumaBandOracle::new(),
                &session.images_dir(),
                &cancel,
                &sink,
            )
            .map_err(ApiError::from)
            .and_then(|(events, summary)| {
                session.write_hardsub_timing(&events)?;
                Ok((events, summary))
            });
        self.set_progress(WorkStage::Idle, 0, 0);
        let (events, summary) = match outcome {
            Ok(scanned) => scanned,
            Err(e) => {
                discard_session(&session);
                return Err(e);
            }
        };

        let result = HardsubScanResult {
            session_name: session.name(),
            frames_scanned: summary.frames_scanned,
            top_events: summary.top_events,
            bottom_events: summary.bottom_events,
            skipped: summary.skipped,
        };
        self.replace_state(session, events, FailedBatches::new());
        Ok(result)
    }

    /// 载入会话目录（绝对路径或 `list_sessions` 返回的名字）
    #[frb]
    pub fn load_session(&self, path: String) -> Result<SessionLoadResult, ApiError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let dir = self.resolve_session_dir(&path);
        let (session, events, summary) = load_session(&dir)?;

        let result = SessionLoadResult {
            session_name: session.name(),
            subtitle_count: events.len(),
            batch_logs: summary.batch_logs,
            failed_batches: summary.failed.iter().collect(),
            message: summary.message,
        };
        self.replace_state(session, events, summary.failed);
        Ok(result)
    }

    /// 对全部字幕执行 OCR
    #[frb]
    pub fn run_ocr(&self) -> Result<OcrRunSummary, ApiError> {
        self.run_ocr_on(false)
    }

    /// 只重跑上次失败的批次
    #[frb]
    pub fn retry_failed_batches(&self) -> Result<OcrRunSummary, ApiError> {
        self.run_ocr_on(true)
    }

    /// 请求取消当前任务，在下一个检查点生效
    #[frb(sync)]
    pub fn cancel(&self) {
        info!("🛑 Cancellation requested");
        lock(&self.cancel).cancel();
    }

    #[frb(sync, getter)]
    pub fn progress(&self) -> ProgressSnapshot {
        lock(&self.progress).clone()
    }

    #[frb(sync, getter)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 字幕列表，按展示顺序排列
    #[frb(sync)]
    pub fn subtitles(&self) -> Vec<SubtitleItem> {
        let state = lock(&self.state);
        let images_dir = state.session.as_ref().map(Session::images_dir);

        let mut order: Vec<usize> = (0..state.events.len()).collect();
        if is_hardsub_track(&state.events) {
            order.sort_by_key(|&i| state.events[i].start_time);
        }

        order
            .into_iter()
            .map(|i| {
                let event = &state.events[i];
                let image_path = match &images_dir {
                    Some(dir) => dir.join(&event.image_file).to_string_lossy().into_owned(),
                    None => event.image_file.clone(),
                };
                SubtitleItem {
                    index: i,
                    start: event.start_time.to_string(),
                    end: event.end_time.to_string(),
                    text: event.text.clone(),
                    image_path,
                    channel: event.channel.map(|c| c.as_str().to_string()),
                }
            })
            .collect()
    }

    /// 修改一条字幕文本；OCR 进行中时拒绝
    #[frb(sync)]
    pub fn update_text(&self, index: usize, text: String) -> Result<(), ApiError> {
        // 先持有 state 再检查运行标志，OCR 的快照与标志在同一把锁下获取
        let mut state = lock(&self.state);
        if self.running.load(Ordering::SeqCst) {
            return Err(ApiError::busy());
        }
        let len = state.events.len();
        let event = state
            .events
            .get_mut(index)
            .ok_or_else(|| ApiError::invalid_index(index, len))?;
        event.text = text;
        Ok(())
    }

    /// 导出 SRT，返回写入的条数
    #[frb(sync)]
    pub fn export_srt(&self, path: String) -> Result<usize, ApiError> {
        let events = presentation_order(&lock(&self.state).events);
        write_srt(Path::new(&path), &events)?;
        info!("💾 Exported {} subtitles to {}", events.len(), path);
        Ok(events.len())
    }

    #[frb]
    pub fn list_models(&self) -> Result<Vec<String>, ApiError> {
        let api_key = lock(&self.settings).api_key.clone();
        Ok(list_models(&api_key)?)
    }

    fn run_ocr_on(&self, only_failed: bool) -> Result<OcrRunSummary, ApiError> {
        let settings = lock(&self.settings).clone();
        settings.validate_for_ocr()?;

        let (_guard, session, mut events, failed) = {
            let state = lock(&self.state);
            let guard = RunGuard::acquire(&self.running)?;
            let session = state.session.clone().ok_or_else(ApiError::no_session)?;
            (guard, session, state.events.clone(), state.failed.clone())
        };

        let indices = if only_failed {
            let indices = failed.event_indices(settings.batch_size, events.len());
            if indices.is_empty() {
                return Ok(OcrRunSummary {
                    cancelled: false,
                    processed: 0,
                    total: 0,
                    failed_batches: Vec::new(),
                    message: "No failed batches to retry.".to_string(),
                });
            }
            Some(indices)
        } else {
            None
        };

        let client = GeminiClient::new(&settings.api_key, &settings.model)?
            .with_generation(settings.generation.clone())
            .with_safety_settings(settings.safety_settings.clone());
        let prompt = build_prompt(
            is_hardsub_track(&events),
            settings.ocr_prompt.as_deref(),
            &settings.ocr_language,
        );
        let orchestrator = BatchOrchestrator::new(&client, &session, settings.orchestrator_config())?;

        let cancel = self.fresh_cancel_token();
        self.set_progress(WorkStage::Ocr, 0, indices.as_ref().map_or(events.len(), Vec::len));
        let sink = |processed: usize, total: usize| self.set_progress(WorkStage::Ocr, processed, total);

        let report = orchestrator.run(
            &mut events,
            &prompt,
            indices.as_deref(),
            failed,
            &cancel,
            &sink,
        );
        self.set_progress(WorkStage::Idle, 0, 0);

        let persisted = session.save_failed_batches(&report.failed);
        {
            let mut state = lock(&self.state);
            state.events = events;
            state.failed = report.failed.clone();
        }
        persisted?;

        Ok(OcrRunSummary {
            cancelled: report.is_cancelled(),
            processed: report.processed,
            total: report.total,
            failed_batches: report.failed.iter().collect(),
            message: report.summary,
        })
    }

    fn replace_state(&self, session: Session, events: Vec<SubtitleEvent>, failed: FailedBatches) {
        let mut state = lock(&self.state);
        state.session = Some(session);
        state.events = events;
        state.failed = failed;
    }

    fn resolve_session_dir(&self, path: &str) -> PathBuf {
        let direct = PathBuf::from(path);
        if direct.is_dir() {
            direct
        } else {
            self.store.root().join(path)
        }
    }

    fn fresh_cancel_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *lock(&self.cancel) = token.clone();
        token
    }

    fn set_progress(&self, stage: WorkStage, processed: usize, total: usize) {
        *lock(&self.progress) = ProgressSnapshot {
            stage,
            processed,
            total,
        };
    }
}

/// 扫描未完成的会话没有时间轴文件，无法载入，直接删除
fn discard_session(session: &Session) {
    match fs::remove_dir_all(session.dir()) {
        Ok(()) => info!("🧹 Discarded incomplete session {}", session.name()),
        Err(e) => warn!("⚠️ Could not remove {}: {}", session.dir().display(), e),
    }
}

impl Drop for SubtitleWorkbench {
    fn drop(&mut self) {
        info!("🗑️ SubtitleWorkbench: released");
    }
}
