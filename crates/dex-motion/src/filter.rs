//! 信号处理工具
//!
//! 事后校验与力反馈共用的平滑、差分与周期计数原语。

use nalgebra::Vector3;

// ==================== 平滑 ====================

/// 零相位指数平滑：正向一遍、反向一遍
///
/// `alpha ∈ (0, 1]` 为新样本权重；两遍抵消相位滞后，用于事后
/// 速度序列。
pub fn smooth_zero_phase(series: &[f64], alpha: f64) -> Vec<f64> {
    let forward = smooth_forward(series, alpha);
    let mut backward = smooth_forward(&reversed(&forward), alpha);
    backward.reverse();
    backward
}

fn smooth_forward(series: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(series.len());
    let mut state = match series.first() {
        Some(&first) => first,
        None => return out,
    };
    for &x in series {
        state += alpha * (x - state);
        out.push(state);
    }
    out
}

fn reversed(series: &[f64]) -> Vec<f64> {
    let mut r = series.to_vec();
    r.reverse();
    r
}

/// 在线单极点指数滤波器
///
/// 交互等待的力反馈路径使用；首个样本直接作为初值。
#[derive(Debug, Clone)]
pub struct ExponentialFilter {
    alpha: f64,
    state: Option<f64>,
}

impl ExponentialFilter {
    /// `alpha ∈ (0, 1]`；1 表示不滤波
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            state: None,
        }
    }

    /// 送入一个样本，返回滤波输出
    pub fn filter(&mut self, x: f64) -> f64 {
        let next = match self.state {
            Some(state) => state + self.alpha * (x - state),
            None => x,
        };
        self.state = Some(next);
        next
    }

    /// 丢弃滤波状态
    pub fn reset(&mut self) {
        self.state = None;
    }
}

// ==================== 差分 ====================

/// 切向速率：位置序列的中心差分幅值
///
/// 端点用单侧差分；序列不足两点时返回全零。
pub fn tangential_speed(positions: &[Vector3<f64>], dt: f64) -> Vec<f64> {
    let n = positions.len();
    if n < 2 || dt <= 0.0 {
        return vec![0.0; n];
    }
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let velocity = if i == 0 {
            (positions[1] - positions[0]) / dt
        } else if i == n - 1 {
            (positions[n - 1] - positions[n - 2]) / dt
        } else {
            (positions[i + 1] - positions[i - 1]) / (2.0 * dt)
        };
        out.push(velocity.norm());
    }
    out
}

/// 加速度幅值：位置序列的中心二阶差分
pub fn acceleration_magnitude(positions: &[Vector3<f64>], dt: f64) -> Vec<f64> {
    let n = positions.len();
    if n < 3 || dt <= 0.0 {
        return vec![0.0; n];
    }
    let mut out = vec![0.0; n];
    for i in 1..n - 1 {
        let accel = (positions[i + 1] - 2.0 * positions[i] + positions[i - 1]) / (dt * dt);
        out[i] = accel.norm();
    }
    // 端点沿用相邻值
    out[0] = out[1];
    out[n - 1] = out[n - 2];
    out
}

// ==================== 周期计数 ====================

/// 迟滞过零计数器（施密特触发）
///
/// 信号越过 `+hysteresis` 置高、越过 `−hysteresis` 置低，死区内
/// 保持原状态；每次高→低切换计一个周期。幅值 A、k 个整周期的
/// 正弦在 `hysteresis < A` 时恰好计 k。
#[derive(Debug, Clone)]
pub struct SchmittCounter {
    hysteresis: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerState {
    Unknown,
    High,
    Low,
}

impl SchmittCounter {
    pub fn new(hysteresis: f64) -> Self {
        Self { hysteresis }
    }

    /// 对整条序列计数
    pub fn count_cycles(&self, series: &[f64]) -> usize {
        let mut state = TriggerState::Unknown;
        let mut cycles = 0;
        for &x in series {
            if x > self.hysteresis {
                state = TriggerState::High;
            } else if x < -self.hysteresis {
                if state == TriggerState::High {
                    cycles += 1;
                }
                state = TriggerState::Low;
            }
            // 死区内状态保持
        }
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_zero_phase_smoothing_preserves_constant() {
        let series = vec![3.0; 50];
        let smoothed = smooth_zero_phase(&series, 0.2);
        for &y in &smoothed {
            assert!((y - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_phase_smoothing_attenuates_spike() {
        let mut series = vec![0.0; 21];
        series[10] = 10.0;
        let smoothed = smooth_zero_phase(&series, 0.3);
        assert!(smoothed[10] < 10.0);
        // 零相位：尖峰两侧近似对称（边界截断引入的偏差很小）
        assert!((smoothed[8] - smoothed[12]).abs() < 0.01);
    }

    #[test]
    fn test_smoothing_empty_series() {
        assert!(smooth_zero_phase(&[], 0.5).is_empty());
    }

    #[test]
    fn test_exponential_filter_first_sample_passthrough() {
        let mut filter = ExponentialFilter::new(0.1);
        assert_eq!(filter.filter(5.0), 5.0);
        let second = filter.filter(10.0);
        assert!((second - 5.5).abs() < 1e-12);

        filter.reset();
        assert_eq!(filter.filter(-2.0), -2.0);
    }

    #[test]
    fn test_tangential_speed_uniform_motion() {
        // 匀速 2 mm/拍，dt = 0.5 → 速率 4 mm/s
        let positions: Vec<Vector3<f64>> = (0..10)
            .map(|i| Vector3::new(2.0 * i as f64, 0.0, 0.0))
            .collect();
        let speed = tangential_speed(&positions, 0.5);
        for &v in &speed {
            assert!((v - 4.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_acceleration_of_parabola() {
        // x = t²，dt = 1 → 二阶差分恒为 2
        let positions: Vec<Vector3<f64>> = (0..8)
            .map(|i| Vector3::new((i * i) as f64, 0.0, 0.0))
            .collect();
        let accel = acceleration_magnitude(&positions, 1.0);
        for &a in &accel {
            assert!((a - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_schmitt_counts_sinusoid_periods() {
        // 幅值 20、5 个整周期、1000 点采样，迟滞 2 → 恰好 5 个周期
        let amplitude = 20.0;
        let periods = 5;
        let n = 1000;
        let series: Vec<f64> = (0..n)
            .map(|i| amplitude * (2.0 * PI * periods as f64 * i as f64 / n as f64).sin())
            .collect();

        let counter = SchmittCounter::new(2.0);
        assert_eq!(counter.count_cycles(&series), periods);
    }

    #[test]
    fn test_schmitt_various_hysteresis() {
        let amplitude = 1.0;
        let series: Vec<f64> = (0..3000)
            .map(|i| amplitude * (2.0 * PI * 3.0 * i as f64 / 1000.0).sin())
            .collect();

        for hysteresis in [0.05, 0.2, 0.5, 0.9] {
            let counter = SchmittCounter::new(hysteresis);
            assert_eq!(counter.count_cycles(&series), 3, "hysteresis {hysteresis}");
        }
    }

    #[test]
    fn test_schmitt_ignores_noise_within_band() {
        // 迟滞带内的抖动不应计数
        let series = vec![0.1, -0.1, 0.15, -0.12, 0.08, -0.05];
        let counter = SchmittCounter::new(0.5);
        assert_eq!(counter.count_cycles(&series), 0);
    }

    #[test]
    fn test_schmitt_half_cycle_not_counted() {
        // 只升不降：没有高→低切换
        let series: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let counter = SchmittCounter::new(0.1);
        assert_eq!(counter.count_cycles(&series), 0);
    }
}
