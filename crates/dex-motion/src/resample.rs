//! 固定周期重采样
//!
//! 采集期按轮询节奏得到的序列时间不规则；停止采集后统一线性
//! 重采样到配置的固定周期。
//!
//! 两种端点策略并存（有意不统一）：
//!
//! - 标记帧：目标样本仅当两个括住它的源样本都可见时才可见，
//!   不可见样本持哨兵位置、不插值
//! - 模拟量：无论有效性如何一律插值
//!
//! 目标时刻早于第一条源样本时复制首样本（持位）；游标越过源
//! 末尾时提前返回已产生的数量。

use nalgebra::Vector3;

use dex_protocol::{AnalogSample, MarkerFrame, MarkerSample};

/// 可线性插值的通道向量
pub trait Lerp {
    /// `fraction ∈ [0, 1]`，0 取 `self`，1 取 `other`
    fn lerp_with(&self, other: &Self, fraction: f64) -> Self;
}

impl Lerp for f64 {
    fn lerp_with(&self, other: &Self, fraction: f64) -> Self {
        self + (other - self) * fraction
    }
}

impl Lerp for f32 {
    fn lerp_with(&self, other: &Self, fraction: f64) -> Self {
        self + (other - self) * fraction as f32
    }
}

impl Lerp for Vector3<f64> {
    fn lerp_with(&self, other: &Self, fraction: f64) -> Self {
        self + (other - self) * fraction
    }
}

impl<T: Lerp> Lerp for Vec<T> {
    fn lerp_with(&self, other: &Self, fraction: f64) -> Self {
        debug_assert_eq!(self.len(), other.len());
        self.iter()
            .zip(other.iter())
            .map(|(a, b)| a.lerp_with(b, fraction))
            .collect()
    }
}

/// 括住目标时刻的源样本游标
///
/// 目标时刻单调递增，游标只前进不回退。
struct Cursor {
    prev: usize,
}

impl Cursor {
    fn new() -> Self {
        Self { prev: 0 }
    }

    /// 前进到 `times[next] > t`；返回 `(prev, next)`，源耗尽时 `None`
    fn bracket(&mut self, times: &[f64], t: f64) -> Option<(usize, usize)> {
        let mut next = self.prev + 1;
        while next < times.len() && times[next] <= t {
            next += 1;
        }
        if next >= times.len() {
            return None;
        }
        self.prev = next - 1;
        Some((self.prev, next))
    }
}

fn fraction(t: f64, t_prev: f64, t_next: f64) -> f64 {
    (t - t_prev) / (t_next - t_prev)
}

/// 通用线性重采样
///
/// 输出 `floor((last − start)/period) + 1` 条样本，时间栅格为
/// `start + i·period`；源耗尽时提前截断。
pub fn resample_series<T: Lerp + Clone>(
    source: &[(f64, T)],
    start: f64,
    period: f64,
) -> Vec<(f64, T)> {
    if source.is_empty() || period <= 0.0 {
        return Vec::new();
    }
    let times: Vec<f64> = source.iter().map(|(t, _)| *t).collect();
    let count = sample_count(start, *times.last().unwrap(), period);

    let mut output = Vec::with_capacity(count);
    let mut cursor = Cursor::new();
    for i in 0..count {
        let t = start + i as f64 * period;
        if t < times[0] {
            // 持位：目标时刻早于首样本
            output.push((t, source[0].1.clone()));
            continue;
        }
        let Some((prev, next)) = cursor.bracket(&times, t) else {
            break;
        };
        let f = fraction(t, times[prev], times[next]);
        output.push((t, source[prev].1.lerp_with(&source[next].1, f)));
    }
    output
}

/// 模拟量重采样：一律插值
pub fn resample_analog(samples: &[AnalogSample], start: f64, period: f64) -> Vec<AnalogSample> {
    let source: Vec<(f64, Vec<f32>)> = samples
        .iter()
        .map(|s| (s.time, s.channels.clone()))
        .collect();
    resample_series(&source, start, period)
        .into_iter()
        .map(|(time, channels)| AnalogSample { time, channels })
        .collect()
}

/// 标记帧重采样：双端点可见才插值
pub fn resample_marker_frames(
    frames: &[MarkerFrame],
    start: f64,
    period: f64,
) -> Vec<MarkerFrame> {
    if frames.is_empty() || period <= 0.0 {
        return Vec::new();
    }
    let times: Vec<f64> = frames.iter().map(|f| f.time).collect();
    let count = sample_count(start, *times.last().unwrap(), period);

    let mut output = Vec::with_capacity(count);
    let mut cursor = Cursor::new();
    for i in 0..count {
        let t = start + i as f64 * period;
        if t < times[0] {
            let mut held = frames[0].clone();
            held.time = t;
            output.push(held);
            continue;
        }
        let Some((prev, next)) = cursor.bracket(&times, t) else {
            break;
        };
        let f = fraction(t, times[prev], times[next]);

        let markers = frames[prev]
            .markers
            .iter()
            .zip(frames[next].markers.iter())
            .map(|(a, b)| {
                if a.visible && b.visible {
                    MarkerSample::visible_at(a.position.lerp_with(&b.position, f))
                } else {
                    // 保守策略：任一端不可见即不可见，绝不插值
                    MarkerSample::invisible()
                }
            })
            .collect();
        output.push(MarkerFrame { time: t, markers });
    }
    output
}

fn sample_count(start: f64, last: f64, period: f64) -> usize {
    if last <= start {
        return 1;
    }
    ((last - start) / period).floor() as usize + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use dex_protocol::INVISIBLE_COORD;

    fn ramp_samples() -> Vec<AnalogSample> {
        // 不规则时间栅格上的线性斜坡：ch0 = 10·t
        [0.0, 0.013, 0.021, 0.040, 0.055, 0.080]
            .iter()
            .map(|&t| AnalogSample {
                time: t,
                channels: vec![10.0 * t as f32],
            })
            .collect()
    }

    #[test]
    fn test_resample_analog_recovers_ramp() {
        // 栅格终点 t == 0.08 没有 next 样本括住，提前截断
        let out = resample_analog(&ramp_samples(), 0.0, 0.01);
        assert_eq!(out.len(), 8);
        for (i, sample) in out.iter().enumerate() {
            let t = i as f64 * 0.01;
            assert!((sample.time - t).abs() < 1e-12);
            assert!(
                (sample.channels[0] - 10.0 * t as f32).abs() < 1e-5,
                "sample {i}: {} vs {}",
                sample.channels[0],
                10.0 * t as f32
            );
        }
    }

    #[test]
    fn test_resample_output_bracketed_by_source() {
        let source = ramp_samples();
        let out = resample_analog(&source, 0.0, 0.007);
        for sample in &out {
            let lo = source
                .iter()
                .filter(|s| s.time <= sample.time)
                .map(|s| s.channels[0])
                .fold(f32::MIN, f32::max);
            let hi = source
                .iter()
                .filter(|s| s.time >= sample.time)
                .map(|s| s.channels[0])
                .fold(f32::MAX, f32::min);
            assert!(sample.channels[0] >= lo - 1e-6 && sample.channels[0] <= hi + 1e-6);
        }
    }

    #[test]
    fn test_resample_holds_first_sample() {
        let source = vec![
            AnalogSample {
                time: 0.05,
                channels: vec![7.0],
            },
            AnalogSample {
                time: 0.10,
                channels: vec![9.0],
            },
        ];
        let out = resample_analog(&source, 0.0, 0.02);
        // t = 0.00, 0.02, 0.04 都早于首样本：持位
        assert!((out[0].channels[0] - 7.0).abs() < 1e-6);
        assert!((out[1].channels[0] - 7.0).abs() < 1e-6);
        assert!((out[2].channels[0] - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_resample_early_stop() {
        let source = vec![
            AnalogSample {
                time: 0.0,
                channels: vec![0.0],
            },
            AnalogSample {
                time: 0.1,
                channels: vec![1.0],
            },
        ];
        // 栅格终点恰为最后一条源样本：没有 next 括住 t == 0.1
        let out = resample_analog(&source, 0.0, 0.05);
        assert_eq!(out.len(), 2); // t = 0.0, 0.05；t = 0.1 处游标耗尽
    }

    #[test]
    fn test_marker_resample_requires_both_endpoints() {
        let visible = MarkerSample::visible_at(Vector3::new(0.0, 0.0, 0.0));
        let visible_far = MarkerSample::visible_at(Vector3::new(10.0, 0.0, 0.0));
        let frames = vec![
            MarkerFrame {
                time: 0.0,
                markers: vec![visible, visible],
            },
            MarkerFrame {
                time: 0.01,
                markers: vec![visible_far, MarkerSample::invisible()],
            },
            MarkerFrame {
                time: 0.02,
                markers: vec![visible, visible],
            },
        ];

        let out = resample_marker_frames(&frames, 0.0, 0.005);
        // 标记 0 两端可见：插值
        assert!(out[1].markers[0].visible);
        assert!((out[1].markers[0].position.x - 5.0).abs() < 1e-9);
        // 标记 1 后端不可见：持哨兵
        assert!(!out[1].markers[1].visible);
        assert_eq!(out[1].markers[1].position.x, INVISIBLE_COORD);
        // 0.01–0.02 之间同理，前端不可见
        assert!(!out[3].markers[1].visible);
    }

    #[test]
    fn test_analog_resample_ignores_validity() {
        // 与标记策略相对照：模拟量哪怕夹着"坏"数据也照样插值。
        let source = vec![
            AnalogSample {
                time: 0.0,
                channels: vec![0.0],
            },
            AnalogSample {
                time: 0.02,
                channels: vec![INVISIBLE_COORD as f32],
            },
        ];
        let out = resample_analog(&source, 0.0, 0.01);
        assert!((out[1].channels[0] - INVISIBLE_COORD as f32 / 2.0).abs() < 1.0);
    }

    #[test]
    fn test_empty_source() {
        assert!(resample_analog(&[], 0.0, 0.01).is_empty());
        assert!(resample_marker_frames(&[], 0.0, 0.01).is_empty());
    }

    #[test]
    fn test_random_irregular_grid_stays_bracketed() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        // 随机抖动的时间栅格与随机游走信号
        let mut t = 0.0;
        let mut value = 0.0_f32;
        let mut source = Vec::new();
        for _ in 0..200 {
            t += rng.gen_range(0.0005..0.004);
            value += rng.gen_range(-1.0..1.0);
            source.push(AnalogSample {
                time: t,
                channels: vec![value],
            });
        }

        let out = resample_analog(&source, 0.0, 0.001);
        let mut cursor = 0usize;
        for sample in &out {
            if sample.time < source[0].time {
                assert_eq!(sample.channels[0], source[0].channels[0]);
                continue;
            }
            while source[cursor + 1].time <= sample.time {
                cursor += 1;
            }
            let lo = source[cursor].channels[0].min(source[cursor + 1].channels[0]);
            let hi = source[cursor].channels[0].max(source[cursor + 1].channels[0]);
            assert!(
                sample.channels[0] >= lo - 1e-5 && sample.channels[0] <= hi + 1e-5,
                "sample at {} out of bracket",
                sample.time
            );
        }
    }
}
