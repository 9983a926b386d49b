//! 试次事件日志
//!
//! 追加式的时间戳事件缓冲，并负责把经过时间映射到定稿后的
//! 帧/采样下标、定位分析窗口。

use dex_protocol::{EventKind, TrialEvent};
use tracing::warn;

/// 试次事件日志
///
/// 容量上限是显式设计限制：写满后不再记录新事件（不做丢弃
/// 最旧），`mark_event` 返回 `false` 以示丢失。
#[derive(Debug)]
pub struct TrialEventLog {
    events: Vec<TrialEvent>,
    capacity: usize,
    frame_period: f64,
    sample_period: f64,
    frame_count: usize,
    sample_count: usize,
}

impl TrialEventLog {
    pub fn new(capacity: usize, frame_period: f64, sample_period: f64) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
            frame_period,
            sample_period,
            frame_count: 0,
            sample_count: 0,
        }
    }

    /// 追加一条事件；日志已满时返回 `false` 且不记录
    pub fn mark_event(&mut self, time: f64, kind: EventKind, param: u32) -> bool {
        if self.events.len() >= self.capacity {
            warn!(?kind, time, "event log full, event dropped");
            return false;
        }
        self.events.push(TrialEvent { time, kind, param });
        true
    }

    /// 新采集开始时清空
    pub fn clear(&mut self) {
        self.events.clear();
        self.frame_count = 0;
        self.sample_count = 0;
    }

    /// 定稿：记录重采样后的帧/采样数量
    pub fn set_counts(&mut self, frame_count: usize, sample_count: usize) {
        self.frame_count = frame_count;
        self.sample_count = sample_count;
    }

    pub fn events(&self) -> &[TrialEvent] {
        &self.events
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// 经过时间 → 帧下标：`floor(t/frame_period)`，夹到 `[0, count-1]`
    pub fn time_to_frame(&self, t: f64) -> usize {
        clamp_index(t, self.frame_period, self.frame_count)
    }

    /// 经过时间 → 模拟量采样下标
    pub fn time_to_sample(&self, t: f64) -> usize {
        clamp_index(t, self.sample_period, self.sample_count)
    }

    /// 定位分析窗口的时间范围
    ///
    /// 从后向前找最近的 `BeginAnalysis`，再从它向后找最近的
    /// `EndAnalysis`；缺失的一端退化为整个缓冲区。
    pub fn analysis_time_range(&self) -> (f64, f64) {
        let begin = self
            .events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::BeginAnalysis)
            .map(|e| e.time)
            .unwrap_or(0.0);
        let end = self
            .events
            .iter()
            .find(|e| e.kind == EventKind::EndAnalysis && e.time >= begin)
            .map(|e| e.time)
            .unwrap_or_else(|| self.frame_count as f64 * self.frame_period);
        (begin, end)
    }

    /// 分析窗口的事件下标范围（含端点）
    pub fn find_analysis_event_range(&self) -> (usize, usize) {
        let (begin, end) = self.analysis_time_range();
        let first = self
            .events
            .iter()
            .position(|e| e.time >= begin)
            .unwrap_or(0);
        let last = self
            .events
            .iter()
            .rposition(|e| e.time <= end)
            .unwrap_or_else(|| self.events.len().saturating_sub(1));
        (first, last)
    }

    /// 分析窗口的帧下标范围（含端点）
    pub fn find_analysis_frame_range(&self) -> (usize, usize) {
        let (begin, end) = self.analysis_time_range();
        (self.time_to_frame(begin), self.time_to_frame(end))
    }

    /// 给定类别的全部事件
    pub fn events_of_kind(&self, kind: EventKind) -> impl Iterator<Item = &TrialEvent> {
        self.events.iter().filter(move |e| e.kind == kind)
    }
}

fn clamp_index(t: f64, period: f64, count: usize) -> usize {
    if count == 0 || period <= 0.0 {
        return 0;
    }
    let index = (t / period).floor();
    if index < 0.0 {
        0
    } else {
        (index as usize).min(count - 1)
    }
}
