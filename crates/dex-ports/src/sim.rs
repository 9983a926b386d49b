//! 模拟后端
//!
//! 无硬件环境（开发、测试、CLI 演示）下使用的端口实现。全部后端
//! 共享一个手动推进的 [`SimClock`]，标记与模拟量由时间闭包生成，
//! 因此每次运行完全可复现。
//!
//! 采集语义模仿真实硬件：启动后按内部速率缓冲数据，缓冲填满即
//! 置位 overrun 并停止继续记录，等待 `retrieve_*` 取回。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::{UnitQuaternion, Vector3};
use tracing::debug;

use dex_protocol::{AnalogSample, MarkerFrame, MarkerSample};

use crate::{Adc, Clock, PortError, SoundPort, TargetPort, Tracker};

// ==================== 模拟时钟 ====================

/// 手动推进的共享时钟
///
/// 克隆出的句柄观察同一时间值；`advance`/`set` 推进所有持有者。
#[derive(Debug, Clone)]
pub struct SimClock {
    bits: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(0.0_f64.to_bits())),
        }
    }

    /// 将时钟推进 `dt` 秒
    pub fn advance(&self, dt: f64) {
        let now = f64::from_bits(self.bits.load(Ordering::Relaxed));
        self.bits.store((now + dt).to_bits(), Ordering::Relaxed);
    }

    /// 直接设置时钟（秒）
    pub fn set(&self, t: f64) {
        self.bits.store(t.to_bits(), Ordering::Relaxed);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn tick(&self, dt: f64) {
        self.advance(dt);
    }
}

// ==================== 模拟跟踪器 ====================

/// 单个标记的运动路径：时间 → 采样
pub type MarkerPath = Box<dyn Fn(f64) -> MarkerSample + Send>;

/// 模拟 3D 跟踪器
pub struct SimTracker {
    clock: SimClock,
    paths: Vec<MarkerPath>,
    /// 内部缓冲速率（秒/帧）
    internal_period: f64,
    /// 硬件缓冲容量（帧）
    capacity: usize,
    initialized: bool,
    acquiring: bool,
    overrun: bool,
    start_time: f64,
    record_end: f64,
    max_duration: f64,
}

impl SimTracker {
    /// 以给定标记路径构造；默认 200Hz 内部速率、20000 帧缓冲
    pub fn new(clock: SimClock, paths: Vec<MarkerPath>) -> Self {
        Self {
            clock,
            paths,
            internal_period: 0.005,
            capacity: 20_000,
            initialized: false,
            acquiring: false,
            overrun: false,
            start_time: 0.0,
            record_end: 0.0,
            max_duration: 0.0,
        }
    }

    /// 覆盖内部速率与缓冲容量
    pub fn with_stream(mut self, internal_period: f64, capacity: usize) -> Self {
        self.internal_period = internal_period;
        self.capacity = capacity;
        self
    }

    /// 全部标记静止于给定位置
    pub fn stationary(clock: SimClock, positions: &[Vector3<f64>]) -> Self {
        let paths = positions
            .iter()
            .map(|&p| -> MarkerPath { Box::new(move |_t| MarkerSample::visible_at(p)) })
            .collect();
        Self::new(clock, paths)
    }

    fn sample_frame(&self, time: f64) -> MarkerFrame {
        MarkerFrame {
            time,
            markers: self.paths.iter().map(|path| path(time)).collect(),
        }
    }
}

impl Tracker for SimTracker {
    fn initialize(&mut self) -> Result<(), PortError> {
        self.initialized = true;
        Ok(())
    }

    fn start_acquisition(&mut self, max_duration_s: f64) -> Result<(), PortError> {
        if !self.initialized {
            return Err(PortError::NotInitialized);
        }
        if self.acquiring {
            return Err(PortError::AlreadyAcquiring);
        }
        self.acquiring = true;
        self.overrun = false;
        self.start_time = self.clock.now();
        self.max_duration = max_duration_s;
        debug!(start = self.start_time, max_duration_s, "sim tracker acquisition started");
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<(), PortError> {
        if !self.acquiring {
            return Err(PortError::NotAcquiring);
        }
        self.acquiring = false;

        // 硬件在缓冲填满或到达限时后即停止记录
        let stop = self.clock.now();
        let buffer_limit = self.start_time + self.capacity as f64 * self.internal_period;
        let duration_limit = self.start_time + self.max_duration;
        self.record_end = stop.min(buffer_limit).min(duration_limit);
        if stop > buffer_limit || stop > duration_limit {
            self.overrun = true;
        }
        debug!(stop, overrun = self.overrun, "sim tracker acquisition stopped");
        Ok(())
    }

    fn current_frame(&mut self) -> Result<MarkerFrame, PortError> {
        if !self.initialized {
            return Err(PortError::NotInitialized);
        }
        Ok(self.sample_frame(self.clock.now()))
    }

    fn retrieve_frames(&mut self, max: usize) -> Result<Vec<MarkerFrame>, PortError> {
        if !self.initialized {
            return Err(PortError::NotInitialized);
        }
        let mut frames = Vec::new();
        let mut index = 0usize;
        loop {
            let t = self.start_time + index as f64 * self.internal_period;
            if t > self.record_end || frames.len() >= max || frames.len() >= self.capacity {
                break;
            }
            frames.push(self.sample_frame(t));
            index += 1;
        }
        Ok(frames)
    }

    fn is_acquiring(&self) -> bool {
        self.acquiring
    }

    fn acquisition_overrun(&self) -> bool {
        self.overrun
    }

    fn unit_placement(
        &self,
        unit: usize,
    ) -> Result<(Vector3<f64>, UnitQuaternion<f64>), PortError> {
        // 单一虚拟单元，安装在工作空间原点
        if unit == 0 {
            Ok((Vector3::zeros(), UnitQuaternion::identity()))
        } else {
            Err(PortError::InvalidUnit(unit))
        }
    }
}

// ==================== 模拟 ADC ====================

/// 全通道波形：时间 → 各通道读数
pub type AnalogWaveform = Box<dyn Fn(f64) -> Vec<f32> + Send>;

/// 模拟模拟量采集卡
pub struct SimAdc {
    clock: SimClock,
    waveform: AnalogWaveform,
    internal_period: f64,
    capacity: usize,
    initialized: bool,
    acquiring: bool,
    start_time: f64,
    record_end: f64,
}

impl SimAdc {
    /// 以给定波形构造；默认 1kHz 内部速率、100000 条缓冲
    pub fn new(clock: SimClock, waveform: AnalogWaveform) -> Self {
        Self {
            clock,
            waveform,
            internal_period: 0.001,
            capacity: 100_000,
            initialized: false,
            acquiring: false,
            start_time: 0.0,
            record_end: 0.0,
        }
    }

    /// 覆盖内部速率与缓冲容量
    pub fn with_stream(mut self, internal_period: f64, capacity: usize) -> Self {
        self.internal_period = internal_period;
        self.capacity = capacity;
        self
    }

    /// 全通道恒定读数
    pub fn constant(clock: SimClock, levels: Vec<f32>) -> Self {
        Self::new(clock, Box::new(move |_t| levels.clone()))
    }
}

impl Adc for SimAdc {
    fn initialize(&mut self) -> Result<(), PortError> {
        self.initialized = true;
        Ok(())
    }

    fn start_acquisition(&mut self) -> Result<(), PortError> {
        if !self.initialized {
            return Err(PortError::NotInitialized);
        }
        if self.acquiring {
            return Err(PortError::AlreadyAcquiring);
        }
        self.acquiring = true;
        self.start_time = self.clock.now();
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<(), PortError> {
        if !self.acquiring {
            return Err(PortError::NotAcquiring);
        }
        self.acquiring = false;
        let stop = self.clock.now();
        let buffer_limit = self.start_time + self.capacity as f64 * self.internal_period;
        self.record_end = stop.min(buffer_limit);
        Ok(())
    }

    fn current_sample(&mut self) -> Result<AnalogSample, PortError> {
        if !self.initialized {
            return Err(PortError::NotInitialized);
        }
        let t = self.clock.now();
        Ok(AnalogSample {
            time: t,
            channels: (self.waveform)(t),
        })
    }

    fn retrieve_samples(&mut self, max: usize) -> Result<Vec<AnalogSample>, PortError> {
        if !self.initialized {
            return Err(PortError::NotInitialized);
        }
        let mut samples = Vec::new();
        let mut index = 0usize;
        loop {
            let t = self.start_time + index as f64 * self.internal_period;
            if t > self.record_end || samples.len() >= max || samples.len() >= self.capacity {
                break;
            }
            samples.push(AnalogSample {
                time: t,
                channels: (self.waveform)(t),
            });
            index += 1;
        }
        Ok(samples)
    }
}

// ==================== 模拟目标/声音端口 ====================

/// 模拟目标 LED 阵列：锁存最近状态并记录历史
#[derive(Debug, Default)]
pub struct SimTargets {
    pub state: u32,
    pub history: Vec<u32>,
}

impl SimTargets {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TargetPort for SimTargets {
    fn set_target_state(&mut self, bitmask: u32) -> Result<(), PortError> {
        self.state = bitmask;
        self.history.push(bitmask);
        Ok(())
    }
}

/// 模拟音调发生器
#[derive(Debug, Default)]
pub struct SimSounds {
    pub tone: i32,
    pub volume: i32,
    pub history: Vec<(i32, i32)>,
}

impl SimSounds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SoundPort for SimSounds {
    fn set_sound_state(&mut self, tone: i32, volume: i32) -> Result<(), PortError> {
        self.tone = tone;
        self.volume = volume;
        self.history.push((tone, volume));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_shared_between_handles() {
        let clock = SimClock::new();
        let other = clock.clone();
        clock.advance(1.5);
        assert!((other.now() - 1.5).abs() < 1e-12);
        other.set(10.0);
        assert!((clock.now() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_tracker_requires_initialize() {
        let clock = SimClock::new();
        let mut tracker = SimTracker::stationary(clock, &[Vector3::zeros()]);
        assert!(matches!(
            tracker.current_frame().unwrap_err(),
            PortError::NotInitialized
        ));
        assert!(matches!(
            tracker.start_acquisition(10.0).unwrap_err(),
            PortError::NotInitialized
        ));
    }

    #[test]
    fn test_tracker_retrieve_matches_internal_rate() {
        let clock = SimClock::new();
        let mut tracker = SimTracker::stationary(clock.clone(), &[Vector3::new(1.0, 2.0, 3.0)])
            .with_stream(0.01, 1000);
        tracker.initialize().unwrap();
        tracker.start_acquisition(60.0).unwrap();
        clock.advance(0.1);
        tracker.stop_acquisition().unwrap();

        let frames = tracker.retrieve_frames(usize::MAX).unwrap();
        // 0.0..=0.1 步长 0.01：11 帧
        assert_eq!(frames.len(), 11);
        assert!(!tracker.acquisition_overrun());
        assert!((frames[1].time - 0.01).abs() < 1e-12);
        assert_eq!(frames[0].markers[0].position, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_tracker_overrun_on_full_buffer() {
        let clock = SimClock::new();
        let mut tracker =
            SimTracker::stationary(clock.clone(), &[Vector3::zeros()]).with_stream(0.01, 10);
        tracker.initialize().unwrap();
        tracker.start_acquisition(60.0).unwrap();
        clock.advance(1.0); // 需要 100 帧，容量只有 10
        tracker.stop_acquisition().unwrap();

        assert!(tracker.acquisition_overrun());
        let frames = tracker.retrieve_frames(usize::MAX).unwrap();
        assert_eq!(frames.len(), 10);
    }

    #[test]
    fn test_tracker_overrun_on_max_duration() {
        let clock = SimClock::new();
        let mut tracker =
            SimTracker::stationary(clock.clone(), &[Vector3::zeros()]).with_stream(0.01, 10_000);
        tracker.initialize().unwrap();
        tracker.start_acquisition(0.5).unwrap();
        clock.advance(1.0); // 超过限时
        tracker.stop_acquisition().unwrap();

        assert!(tracker.acquisition_overrun());
        let frames = tracker.retrieve_frames(usize::MAX).unwrap();
        // 只记录到 start + 0.5
        assert!(frames.last().unwrap().time <= 0.5 + 1e-12);
    }

    #[test]
    fn test_adc_waveform_and_retrieve() {
        let clock = SimClock::new();
        let mut adc = SimAdc::new(
            clock.clone(),
            Box::new(|t| vec![t as f32, 2.0 * t as f32]),
        )
        .with_stream(0.1, 1000);
        adc.initialize().unwrap();
        adc.start_acquisition().unwrap();
        clock.advance(0.5);

        let current = adc.current_sample().unwrap();
        assert!((current.time - 0.5).abs() < 1e-12);
        assert!((current.channels[1] - 1.0).abs() < 1e-6);

        adc.stop_acquisition().unwrap();
        let samples = adc.retrieve_samples(usize::MAX).unwrap();
        assert_eq!(samples.len(), 6); // 0.0..=0.5 步长 0.1
    }

    #[test]
    fn test_targets_and_sounds_latch_state() {
        let mut targets = SimTargets::new();
        targets.set_target_state(0b101).unwrap();
        targets.set_target_state(0).unwrap();
        assert_eq!(targets.state, 0);
        assert_eq!(targets.history, vec![0b101, 0]);

        let mut sounds = SimSounds::new();
        sounds.set_sound_state(4, 8).unwrap();
        assert_eq!((sounds.tone, sounds.volume), (4, 8));
        sounds.set_sound_state(0, 0).unwrap();
        assert_eq!(sounds.history, vec![(4, 8), (0, 0)]);
    }

    #[test]
    fn test_invalid_unit_placement() {
        let clock = SimClock::new();
        let tracker = SimTracker::stationary(clock, &[Vector3::zeros()]);
        assert!(tracker.unit_placement(0).is_ok());
        assert!(matches!(
            tracker.unit_placement(3).unwrap_err(),
            PortError::InvalidUnit(3)
        ));
    }
}
