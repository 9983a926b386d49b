//! 事后校验
//!
//! 在定稿后的试次缓冲上运行的统计校验。每个校验先把范围收窄到
//! 分析窗口（最近的 BeginAnalysis/EndAnalysis，缺省整个缓冲），
//! 返回 `Outcome`，并且无论通过与否都下传一条 CheckResult 遥测
//! 事件（param 高 16 位为校验编码，低 16 位为通过标志）；实测
//! 数值随提示文本与日志给出。

use nalgebra::Vector3;
use tracing::info;

use dex_motion::SchmittCounter;
use dex_motion::filter::{acceleration_magnitude, smooth_zero_phase, tangential_speed};
use dex_protocol::{EventKind, ManipulandumState};

use crate::controller::ApparatusController;
use crate::{ApparatusError, Outcome};

/// 校验编码（遥测 CheckResult 事件的 param 高 16 位）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CheckCode {
    Overrun = 0,
    Visibility = 1,
    Amplitude = 2,
    Cycles = 3,
    EarlyStarts = 4,
    StartPosition = 5,
    Direction = 6,
    ForcePeaks = 7,
    AccelerationPeaks = 8,
}

impl ApparatusController {
    /// 统一上报：遥测事件 + 失败时的操作员提示
    pub(crate) fn report_check(
        &mut self,
        code: CheckCode,
        passed: bool,
        message: String,
    ) -> Result<Outcome, ApparatusError> {
        let param = ((code as u32) << 16) | u32::from(passed);
        self.mark_event(EventKind::CheckResult, param)?;
        if passed {
            Ok(Outcome::Normal)
        } else {
            self.prompt_operator(&message)
        }
    }

    /// 分析窗口内的状态切片下标（含端点）；缓冲为空时为 `None`
    fn analysis_window(&self) -> Option<(usize, usize)> {
        let n = self.buffer.states.len();
        if n == 0 {
            return None;
        }
        let (start, end) = self.buffer.events.find_analysis_frame_range();
        Some((start.min(n - 1), end.min(n - 1)))
    }

    // ==================== 可见性 ====================

    /// 可见性校验：窗口内累计与最长连续不可见时长
    pub fn check_visibility(
        &mut self,
        max_cumulative_s: f64,
        max_continuous_s: f64,
    ) -> Result<Outcome, ApparatusError> {
        let Some((start, end)) = self.analysis_window() else {
            return self.report_check(CheckCode::Visibility, true, String::new());
        };
        let period = self.config.frame_period;

        let mut invisible = 0usize;
        let mut run = 0usize;
        let mut longest_run = 0usize;
        for state in &self.buffer.states[start..=end] {
            if state.visible {
                run = 0;
            } else {
                invisible += 1;
                run += 1;
                longest_run = longest_run.max(run);
            }
        }
        let cumulative = invisible as f64 * period;
        let continuous = longest_run as f64 * period;
        let passed = cumulative <= max_cumulative_s && continuous <= max_continuous_s;

        info!(cumulative, continuous, passed, "visibility check");
        self.report_check(
            CheckCode::Visibility,
            passed,
            format!(
                "Manipulandum visibility: {cumulative:.3} s invisible in total \
                 (limit {max_cumulative_s:.3}), longest dropout {continuous:.3} s \
                 (limit {max_continuous_s:.3})."
            ),
        )
    }

    // ==================== 运动幅度 ====================

    /// 运动幅度校验：窗口位置协方差在给定方向上的标准差，换算为
    /// 峰值幅度估计（×√2）后与界限比较
    ///
    /// 对整周期采样的正弦，SD = A/√2，因此该估计恰好还原正弦
    /// 峰值幅度 A。
    pub fn check_movement_amplitude(
        &mut self,
        min_amplitude: f64,
        max_amplitude: f64,
        direction: Vector3<f64>,
    ) -> Result<Outcome, ApparatusError> {
        let Some((start, end)) = self.analysis_window() else {
            return self.report_check(CheckCode::Amplitude, false, "Empty trial buffer.".into());
        };
        let direction = direction.normalize();
        let positions = visible_positions(&self.buffer.states[start..=end]);

        let sd = if positions.is_empty() {
            0.0
        } else {
            let n = positions.len() as f64;
            let mean: Vector3<f64> = positions.iter().sum::<Vector3<f64>>() / n;
            // 3×3 协方差在 direction 上的投影
            let mut covariance = nalgebra::Matrix3::zeros();
            for p in &positions {
                let d = p - mean;
                covariance += d * d.transpose();
            }
            covariance /= n;
            (direction.transpose() * covariance * direction)[(0, 0)].sqrt()
        };
        let amplitude = sd * std::f64::consts::SQRT_2;

        let passed = amplitude >= min_amplitude && amplitude <= max_amplitude;
        info!(sd, amplitude, passed, "movement amplitude check");
        self.report_check(
            CheckCode::Amplitude,
            passed,
            format!(
                "Movement amplitude {amplitude:.2} mm ({sd:.2} mm SD) along direction, \
                 expected {min_amplitude:.2}..{max_amplitude:.2} mm."
            ),
        )
    }

    // ==================== 运动周期 ====================

    /// 运动周期校验：去均值投影上的迟滞过零计数
    pub fn check_movement_cycles(
        &mut self,
        min_cycles: usize,
        max_cycles: usize,
        direction: Vector3<f64>,
        hysteresis: f64,
    ) -> Result<Outcome, ApparatusError> {
        let Some((start, end)) = self.analysis_window() else {
            return self.report_check(CheckCode::Cycles, false, "Empty trial buffer.".into());
        };
        let direction = direction.normalize();
        let positions = visible_positions(&self.buffer.states[start..=end]);

        let cycles = if positions.is_empty() {
            0
        } else {
            let n = positions.len() as f64;
            let mean: Vector3<f64> = positions.iter().sum::<Vector3<f64>>() / n;
            let projected: Vec<f64> = positions.iter().map(|p| (p - mean).dot(&direction)).collect();
            SchmittCounter::new(hysteresis).count_cycles(&projected)
        };

        let passed = cycles >= min_cycles && cycles <= max_cycles;
        info!(cycles, passed, "movement cycles check");
        self.report_check(
            CheckCode::Cycles,
            passed,
            format!("Counted {cycles} movement cycles, expected {min_cycles}..{max_cycles}."),
        )
    }

    // ==================== 抢跑 ====================

    /// 抢跑校验：每个 TriggerMovement 之前 `hold_time` 窗口内的
    /// 平滑切向速率不得超过阈值
    pub fn check_early_starts(
        &mut self,
        speed_threshold: f64,
        filter_alpha: f64,
        hold_time: f64,
        max_violations: usize,
    ) -> Result<Outcome, ApparatusError> {
        let Some((start, end)) = self.analysis_window() else {
            return self.report_check(CheckCode::EarlyStarts, true, String::new());
        };
        let period = self.config.frame_period;
        let positions = held_positions(&self.buffer.states[start..=end]);
        let speed = smooth_zero_phase(&tangential_speed(&positions, period), filter_alpha);

        let triggers: Vec<f64> = self
            .buffer
            .events
            .events_of_kind(EventKind::TriggerMovement)
            .map(|e| e.time)
            .collect();

        let mut violations = 0usize;
        if !speed.is_empty() {
            let last = speed.len() - 1;
            for &trigger_time in &triggers {
                let from = self.buffer.events.time_to_frame(trigger_time - hold_time);
                let to = self.buffer.events.time_to_frame(trigger_time);
                let from = from.saturating_sub(start).min(last);
                let to = to.saturating_sub(start).min(last);
                if speed[from..=to].iter().any(|&v| v > speed_threshold) {
                    violations += 1;
                }
            }
        }

        let passed = violations <= max_violations;
        info!(violations, passed, "early starts check");
        self.report_check(
            CheckCode::EarlyStarts,
            passed,
            format!(
                "{violations} early start(s) before movement triggers \
                 (speed > {speed_threshold:.1} mm/s, limit {max_violations})."
            ),
        )
    }

    // ==================== 起始位置 ====================

    /// 起始位置校验：每个 TriggerMovement 时刻位置需落在期望点
    /// 的逐轴容差内
    pub fn check_start_position(
        &mut self,
        expected: Vector3<f64>,
        tolerance: Vector3<f64>,
        max_bad: usize,
    ) -> Result<Outcome, ApparatusError> {
        if self.buffer.states.is_empty() {
            return self.report_check(CheckCode::StartPosition, true, String::new());
        }

        let triggers: Vec<f64> = self
            .buffer
            .events
            .events_of_kind(EventKind::TriggerMovement)
            .map(|e| e.time)
            .collect();

        let mut bad = 0usize;
        for &t in &triggers {
            let idx = self.buffer.events.time_to_frame(t);
            let state = &self.buffer.states[idx.min(self.buffer.states.len() - 1)];
            let delta = state.position - expected;
            let ok = state.visible
                && delta.x.abs() <= tolerance.x
                && delta.y.abs() <= tolerance.y
                && delta.z.abs() <= tolerance.z;
            if !ok {
                bad += 1;
            }
        }

        let passed = bad <= max_bad;
        info!(bad, passed, "start position check");
        self.report_check(
            CheckCode::StartPosition,
            passed,
            format!("{bad} trigger(s) started away from the expected position (limit {max_bad})."),
        )
    }

    // ==================== 运动方向 ====================

    /// 运动方向校验：每个 TriggerMoveUp/Down 之后的首次越阈位移
    /// 符号必须与提示一致
    pub fn check_movement_direction(
        &mut self,
        direction: Vector3<f64>,
        threshold: f64,
        max_bad: usize,
    ) -> Result<Outcome, ApparatusError> {
        let Some((start, end)) = self.analysis_window() else {
            return self.report_check(CheckCode::Direction, true, String::new());
        };
        let direction = direction.normalize();
        let positions = held_positions(&self.buffer.states[start..=end]);

        let mut bad = 0usize;
        let triggers: Vec<(f64, f64)> = self
            .buffer
            .events
            .events()
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::TriggerMoveUp => Some((e.time, 1.0)),
                EventKind::TriggerMoveDown => Some((e.time, -1.0)),
                _ => None,
            })
            .collect();

        for &(t, expected_sign) in &triggers {
            if positions.is_empty() {
                bad = triggers.len();
                break;
            }
            let idx = self
                .buffer
                .events
                .time_to_frame(t)
                .saturating_sub(start)
                .min(positions.len() - 1);
            let origin = positions[idx];

            // 跟踪位移直到首次越过 ±threshold
            let mut classified = false;
            for p in positions.iter().skip(idx + 1) {
                let displacement = (p - origin).dot(&direction);
                if displacement.abs() > threshold {
                    if displacement.signum() != expected_sign {
                        bad += 1;
                    }
                    classified = true;
                    break;
                }
            }
            // 从未越阈：按错误方向计
            if !classified {
                bad += 1;
            }
        }

        let passed = bad <= max_bad;
        info!(bad, passed, "movement direction check");
        self.report_check(
            CheckCode::Direction,
            passed,
            format!("{bad} movement(s) in the wrong direction (limit {max_bad})."),
        )
    }

    // ==================== 力峰 / 加速度峰 ====================

    /// 负载力峰校验：每个触发间段内负载力幅值对段均值的峰偏
    pub fn check_force_peaks(
        &mut self,
        min_peak: f64,
        max_peak: f64,
        max_bad_segments: usize,
    ) -> Result<Outcome, ApparatusError> {
        let magnitudes: Vec<f64> = self.buffer.load.iter().map(|l| l.norm()).collect();
        let segments = self.trigger_sample_segments();
        let bad = count_bad_segments(&magnitudes, &segments, min_peak, max_peak);

        let passed = bad <= max_bad_segments;
        info!(bad, passed, "force peaks check");
        self.report_check(
            CheckCode::ForcePeaks,
            passed,
            format!(
                "{bad} segment(s) with load-force peak outside {min_peak:.1}..{max_peak:.1} N \
                 (limit {max_bad_segments})."
            ),
        )
    }

    /// 加速度峰校验：同上，作用在窗口位置序列的加速度幅值上
    pub fn check_acceleration_peaks(
        &mut self,
        min_peak: f64,
        max_peak: f64,
        max_bad_segments: usize,
    ) -> Result<Outcome, ApparatusError> {
        let Some((start, end)) = self.analysis_window() else {
            return self.report_check(CheckCode::AccelerationPeaks, true, String::new());
        };
        let positions = held_positions(&self.buffer.states[start..=end]);
        let accel = acceleration_magnitude(&positions, self.config.frame_period);

        let segments: Vec<(usize, usize)> = self
            .trigger_frame_segments()
            .into_iter()
            .map(|(a, b)| (a.saturating_sub(start), b.saturating_sub(start)))
            .collect();
        let bad = count_bad_segments(&accel, &segments, min_peak, max_peak);

        let passed = bad <= max_bad_segments;
        info!(bad, passed, "acceleration peaks check");
        self.report_check(
            CheckCode::AccelerationPeaks,
            passed,
            format!(
                "{bad} segment(s) with acceleration peak outside \
                 {min_peak:.1}..{max_peak:.1} mm/s^2 (limit {max_bad_segments})."
            ),
        )
    }

    /// 触发间段（模拟量采样下标）
    fn trigger_sample_segments(&self) -> Vec<(usize, usize)> {
        let times: Vec<f64> = self
            .buffer
            .events
            .events_of_kind(EventKind::TriggerMovement)
            .map(|e| e.time)
            .collect();
        times
            .windows(2)
            .map(|pair| {
                (
                    self.buffer.events.time_to_sample(pair[0]),
                    self.buffer.events.time_to_sample(pair[1]),
                )
            })
            .collect()
    }

    /// 触发间段（帧下标）
    fn trigger_frame_segments(&self) -> Vec<(usize, usize)> {
        let times: Vec<f64> = self
            .buffer
            .events
            .events_of_kind(EventKind::TriggerMovement)
            .map(|e| e.time)
            .collect();
        times
            .windows(2)
            .map(|pair| {
                (
                    self.buffer.events.time_to_frame(pair[0]),
                    self.buffer.events.time_to_frame(pair[1]),
                )
            })
            .collect()
    }
}

/// 仅可见样本的位置
fn visible_positions(states: &[ManipulandumState]) -> Vec<Vector3<f64>> {
    states
        .iter()
        .filter(|s| s.visible)
        .map(|s| s.position)
        .collect()
}

/// 不可见样本持上一可见位置（哨兵坐标会污染差分）
fn held_positions(states: &[ManipulandumState]) -> Vec<Vector3<f64>> {
    let mut out = Vec::with_capacity(states.len());
    let mut last = states.iter().find(|s| s.visible).map(|s| s.position);
    for state in states {
        if state.visible {
            last = Some(state.position);
        }
        out.push(last.unwrap_or_else(Vector3::zeros));
    }
    out
}

/// 峰偏离段均值超界的段数
fn count_bad_segments(
    series: &[f64],
    segments: &[(usize, usize)],
    min_peak: f64,
    max_peak: f64,
) -> usize {
    let mut bad = 0;
    for &(a, b) in segments {
        if series.is_empty() || a >= b {
            continue;
        }
        let b = b.min(series.len() - 1);
        let segment = &series[a..=b];
        let mean = segment.iter().sum::<f64>() / segment.len() as f64;
        let peak = segment
            .iter()
            .map(|x| (x - mean).abs())
            .fold(0.0_f64, f64::max);
        if peak < min_peak || peak > max_peak {
            bad += 1;
        }
    }
    bad
}
