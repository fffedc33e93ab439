//! 批量 OCR 编排：固定窗口分批、指数退避重试、失败批次记录与选择性重跑

use super::{OcrCapability, OcrError, OcrImage, OcrReply};
use crate::core::progress::{CancellationToken, ProgressSink};
use crate::core::subtitle::SubtitleEvent;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::io;
use std::ops::Range;
use std::time::Duration;

/// 编排参数
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// 每个窗口的事件数
    pub batch_size: usize,
    /// 每个窗口最多尝试次数
    pub max_retries: u32,
    /// 第 n 次失败后等待 `backoff_unit * 2^n`
    pub backoff_unit: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 120,
            max_retries: 5,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), OcrError> {
        if self.batch_size == 0 {
            return Err(OcrError::Config("batch size must be at least 1".to_string()));
        }
        if self.max_retries == 0 {
            return Err(OcrError::Config("max retries must be at least 1".to_string()));
        }
        Ok(())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_unit.saturating_mul(factor)
    }
}

/// 所有尝试都失败的窗口起始下标集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailedBatches(BTreeSet<usize>);

impl FailedBatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, batch_start: usize) -> bool {
        self.0.insert(batch_start)
    }

    pub fn remove(&mut self, batch_start: usize) -> bool {
        self.0.remove(&batch_start)
    }

    /// 移除落在 `range` 内的所有起点，返回被移除的起点
    ///
    /// 批大小改变后，旧记录的起点不再与窗口对齐，按范围清除才能覆盖它们。
    pub fn remove_range(&mut self, range: Range<usize>) -> Vec<usize> {
        let removed: Vec<usize> = self.0.range(range).copied().collect();
        for start in &removed {
            self.0.remove(start);
        }
        removed
    }

    pub fn contains(&self, batch_start: usize) -> bool {
        self.0.contains(&batch_start)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// 展开为需要重跑的绝对下标
    pub fn event_indices(&self, batch_size: usize, total: usize) -> Vec<usize> {
        let batch_size = batch_size.max(1);
        self.iter()
            .filter(|&start| start < total)
            .flat_map(|start| start..(start + batch_size).min(total))
            .collect()
    }
}

impl FromIterator<usize> for FailedBatches {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// 批次日志条目，`index` 相对于窗口起点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLogEntry {
    pub index: usize,
    pub text: String,
}

/// 一个窗口的识别结果，落盘为 `logs/batch_{start:04}.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchLog {
    pub batch_start: usize,
    pub entries: Vec<BatchLogEntry>,
    /// 模型原始回复，仅用于审计
    #[serde(default)]
    pub raw: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredBatchLog {
    Current(BatchLog),
    Legacy(Vec<Value>),
}

impl BatchLog {
    pub fn file_name(batch_start: usize) -> String {
        format!("batch_{:04}.json", batch_start)
    }

    pub fn raw_reply_file_name(batch_start: usize) -> String {
        format!("batch_{:04}.txt", batch_start)
    }

    /// 从文件名中取回窗口起点
    pub fn batch_start_from_file_name(file_name: &str) -> Option<usize> {
        file_name
            .strip_prefix("batch_")?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }

    /// 解析日志内容；旧格式的纯数组按窗口相对下标处理
    pub fn parse(batch_start: usize, content: &str) -> Result<Self, serde_json::Error> {
        match serde_json::from_str::<StoredBatchLog>(content)? {
            StoredBatchLog::Current(log) => Ok(log),
            StoredBatchLog::Legacy(items) => {
                let entries = items
                    .iter()
                    .filter_map(|item| {
                        let index = item.get("index").and_then(Value::as_u64)?;
                        let text = item.get("text").and_then(Value::as_str)?;
                        Some(BatchLogEntry {
                            index: index as usize,
                            text: text.to_string(),
                        })
                    })
                    .collect();
                Ok(Self {
                    batch_start,
                    entries,
                    raw: Value::Array(items),
                })
            }
        }
    }

    /// 合并较新的日志，同一下标以新结果为准
    pub fn merge(&mut self, newer: BatchLog) {
        for entry in newer.entries {
            match self.entries.iter_mut().find(|e| e.index == entry.index) {
                Some(existing) => existing.text = entry.text,
                None => self.entries.push(entry),
            }
        }
        self.entries.sort_by_key(|e| e.index);
        self.raw = newer.raw;
    }

    /// 把结果写回事件列表，返回实际应用的条目数
    pub fn apply(&self, events: &mut [SubtitleEvent]) -> usize {
        let mut applied = 0;
        for entry in &self.entries {
            match events.get_mut(self.batch_start + entry.index) {
                Some(event) => {
                    event.text = entry.text.clone();
                    applied += 1;
                }
                None => warn!(
                    "⚠️ Batch {} entry {} is out of range, skipped",
                    self.batch_start, entry.index
                ),
            }
        }
        applied
    }
}

/// 编排器依赖的持久化能力
pub trait BatchCheckpoint {
    /// 按事件的 `image_file` 读取图片
    fn read_image(&self, file_name: &str) -> io::Result<Vec<u8>>;
    /// 写入批次日志；已有日志时合并
    fn write_batch_log(&self, log: &BatchLog) -> io::Result<()>;
    /// 保存无法解析的模型原文
    fn write_raw_reply(&self, batch_start: usize, raw: &str) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrRunOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrRunReport {
    pub outcome: OcrRunOutcome,
    /// 更新后的失败批次，由调用方持久化
    pub failed: FailedBatches,
    pub processed: usize,
    pub total: usize,
    pub summary: String,
}

impl OcrRunReport {
    pub fn is_cancelled(&self) -> bool {
        self.outcome == OcrRunOutcome::Cancelled
    }
}

enum WindowResult {
    Done,
    Failed(String),
    Cancelled,
}

/// 批量 OCR 编排器，窗口严格顺序处理
pub struct BatchOrchestrator<'a> {
    ocr: &'a dyn OcrCapability,
    checkpoint: &'a dyn BatchCheckpoint,
    config: OrchestratorConfig,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        ocr: &'a dyn OcrCapability,
        checkpoint: &'a dyn BatchCheckpoint,
        config: OrchestratorConfig,
    ) -> Result<Self, OcrError> {
        config.validate()?;
        Ok(Self {
            ocr,
            checkpoint,
            config,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// 对事件列表执行 OCR，结果按绝对下标原地写入 `text`
    ///
    /// `indices` 为 None 时处理全部事件；否则只处理给定下标，
    /// 不含任何待处理下标的窗口完全跳过（不请求、不写日志）。
    pub fn run(
        &self,
        events: &mut [SubtitleEvent],
        prompt: &str,
        indices: Option<&[usize]>,
        mut failed: FailedBatches,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> OcrRunReport {
        let total_events = events.len();
        let mask = build_mask(total_events, indices);
        let total = mask.iter().filter(|&&m| m).count();
        let batch_size = self.config.batch_size;

        info!(
            "🎬 OCR started: {} of {} events, batch size {}",
            total, total_events, batch_size
        );

        let mut processed = 0;
        for start in (0..total_events).step_by(batch_size) {
            let end = (start + batch_size).min(total_events);
            let masked: Vec<usize> = (start..end).filter(|&i| mask[i]).collect();
            if masked.is_empty() {
                continue;
            }

            if cancel.is_cancelled() {
                return cancelled_report(failed, processed, total);
            }

            info!(
                "📦 Batch {}-{}: {} images",
                start + 1,
                end,
                masked.len()
            );
            match self.process_window(events, start, &masked, prompt, cancel) {
                WindowResult::Done => {
                    let recovered = failed.remove_range(start..end);
                    if !recovered.is_empty() {
                        info!("✅ Batch {} recovered {:?}", start, recovered);
                    }
                }
                WindowResult::Failed(reason) => {
                    error!("❌ Batch {} failed: {}", start, reason);
                    failed.remove_range(start..end);
                    failed.insert(start);
                }
                WindowResult::Cancelled => return cancelled_report(failed, processed, total),
            }

            processed += masked.len();
            progress.on_progress(processed, total);
        }

        if total == 0 {
            progress.on_progress(0, 0);
        }

        let summary = completion_summary(&failed);
        info!("🏁 {}", summary);
        OcrRunReport {
            outcome: OcrRunOutcome::Completed,
            failed,
            processed,
            total,
            summary,
        }
    }

    fn process_window(
        &self,
        events: &mut [SubtitleEvent],
        batch_start: usize,
        masked: &[usize],
        prompt: &str,
        cancel: &CancellationToken,
    ) -> WindowResult {
        // 子批次位置 -> 绝对下标
        let mut mapping = Vec::with_capacity(masked.len());
        let mut images = Vec::with_capacity(masked.len());
        for &index in masked {
            let file_name = &events[index].image_file;
            match self.checkpoint.read_image(file_name) {
                Ok(data) => {
                    images.push(OcrImage::new(file_name.clone(), data));
                    mapping.push(index);
                }
                Err(e) => warn!("⚠️ Image {} unreadable, left out: {}", file_name, e),
            }
        }
        if images.is_empty() {
            return WindowResult::Failed("No readable images in batch".to_string());
        }

        let attempts = self.config.max_retries;
        let mut last_reason = String::new();
        for attempt in 0..attempts {
            match self.ocr.recognize(prompt, &images) {
                Ok(reply) => {
                    self.merge_reply(events, batch_start, &mapping, reply);
                    // 缺图的事件没有送出，窗口留在失败集合里等待重跑
                    if mapping.len() < masked.len() {
                        return WindowResult::Failed(format!(
                            "{} of {} images unreadable",
                            masked.len() - mapping.len(),
                            masked.len()
                        ));
                    }
                    return WindowResult::Done;
                }
                Err(failure) => {
                    warn!(
                        "⚠️ Batch {} attempt {}/{} failed: {}",
                        batch_start,
                        attempt + 1,
                        attempts,
                        failure.reason
                    );
                    if let Some(raw) = &failure.raw_reply {
                        if let Err(e) = self.checkpoint.write_raw_reply(batch_start, raw) {
                            warn!("⚠️ Could not save raw reply of batch {}: {}", batch_start, e);
                        }
                    }
                    last_reason = failure.reason;

                    if attempt + 1 < attempts {
                        let wait = self.config.backoff(attempt);
                        if cancel.is_cancelled() || !cancel.sleep(wait) {
                            return WindowResult::Cancelled;
                        }
                    }
                }
            }
        }
        WindowResult::Failed(last_reason)
    }

    fn merge_reply(
        &self,
        events: &mut [SubtitleEvent],
        batch_start: usize,
        mapping: &[usize],
        reply: OcrReply,
    ) {
        let mut entries = Vec::with_capacity(reply.items.len());
        for item in reply.items {
            match mapping.get(item.relative_index) {
                Some(&index) => {
                    events[index].text = item.text.clone();
                    entries.push(BatchLogEntry {
                        index: index - batch_start,
                        text: item.text,
                    });
                }
                None => warn!(
                    "⚠️ Batch {} returned out-of-range index {}, dropped",
                    batch_start, item.relative_index
                ),
            }
        }

        let log = BatchLog {
            batch_start,
            entries,
            raw: reply.raw,
        };
        if let Err(e) = self.checkpoint.write_batch_log(&log) {
            error!("❌ Could not write log of batch {}: {}", batch_start, e);
        }
    }
}

fn build_mask(total: usize, indices: Option<&[usize]>) -> Vec<bool> {
    match indices {
        None => vec![true; total],
        Some(indices) => {
            let mut mask = vec![false; total];
            for &index in indices {
                match mask.get_mut(index) {
                    Some(slot) => *slot = true,
                    None => warn!("⚠️ Index {} is out of range, ignored", index),
                }
            }
            mask
        }
    }
}

fn cancelled_report(failed: FailedBatches, processed: usize, total: usize) -> OcrRunReport {
    info!("🛑 OCR cancelled after {}/{} events", processed, total);
    OcrRunReport {
        outcome: OcrRunOutcome::Cancelled,
        failed,
        processed,
        total,
        summary: "OCR cancelled by user.".to_string(),
    }
}

fn completion_summary(failed: &FailedBatches) -> String {
    if failed.is_empty() {
        return "OCR complete.".to_string();
    }
    let starts: Vec<String> = failed.iter().map(|s| s.to_string()).collect();
    format!(
        "OCR complete with {} failed batch(es): starting at {}",
        failed.len(),
        starts.join(", ")
    )
}
