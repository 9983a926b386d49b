//! # DEX Ports
//!
//! 硬件端口抽象层：跟踪器、ADC、目标 LED 与声音端口的统一接口。
//!
//! 具体驱动（厂商 SDK 绑定）在本仓库之外实现；核心层只通过这里的
//! trait 对象访问硬件，在启动时选择真实或模拟后端，之后不再感知
//! 具体实现。

use std::time::{Duration, Instant};

use nalgebra::{UnitQuaternion, Vector3};
use thiserror::Error;

use dex_protocol::{AnalogSample, MarkerFrame};

pub mod sim;
pub mod sink;

pub use sim::{SimAdc, SimClock, SimSounds, SimTargets, SimTracker};
pub use sink::{ChannelSink, NullSink, TelemetrySink};

/// 端口层统一错误类型
#[derive(Error, Debug)]
pub enum PortError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Port not initialized")]
    NotInitialized,

    #[error("Acquisition already active")]
    AlreadyAcquiring,

    #[error("No acquisition active")]
    NotAcquiring,

    #[error("Invalid tracker unit: {0}")]
    InvalidUnit(usize),

    /// 后端驱动报告的错误
    #[error("Device error: {0}")]
    Device(String),
}

// ==================== 端口 trait ====================

/// 3D 运动跟踪器端口
///
/// 所有方法非阻塞；`current_frame` 返回跟踪器当前缓存的最新帧，
/// `retrieve_frames` 在采集结束后取回硬件按自身速率缓冲的完整记录。
pub trait Tracker {
    fn initialize(&mut self) -> Result<(), PortError>;

    /// 启动一次限时采集
    fn start_acquisition(&mut self, max_duration_s: f64) -> Result<(), PortError>;

    fn stop_acquisition(&mut self) -> Result<(), PortError>;

    /// 最新一帧标记快照
    fn current_frame(&mut self) -> Result<MarkerFrame, PortError>;

    /// 取回本次采集缓冲的标记帧（至多 `max` 帧）
    fn retrieve_frames(&mut self, max: usize) -> Result<Vec<MarkerFrame>, PortError>;

    /// 当前是否处于采集状态
    fn is_acquiring(&self) -> bool;

    /// 硬件缓冲是否在 `stop_acquisition` 前被填满
    fn acquisition_overrun(&self) -> bool;

    /// 跟踪器单元在工作空间中的安装位姿
    fn unit_placement(
        &self,
        unit: usize,
    ) -> Result<(Vector3<f64>, UnitQuaternion<f64>), PortError>;
}

/// 模拟量采集端口
pub trait Adc {
    fn initialize(&mut self) -> Result<(), PortError>;
    fn start_acquisition(&mut self) -> Result<(), PortError>;
    fn stop_acquisition(&mut self) -> Result<(), PortError>;

    /// 最新一次采样
    fn current_sample(&mut self) -> Result<AnalogSample, PortError>;

    /// 取回本次采集缓冲的采样（至多 `max` 条）
    fn retrieve_samples(&mut self, max: usize) -> Result<Vec<AnalogSample>, PortError>;
}

/// 目标 LED 阵列端口
pub trait TargetPort {
    /// 设置全部目标的亮灭状态（每位一个目标）
    fn set_target_state(&mut self, bitmask: u32) -> Result<(), PortError>;
}

/// 音调发生器端口
pub trait SoundPort {
    /// 设置当前音调与音量；`volume == 0` 静音
    fn set_sound_state(&mut self, tone: i32, volume: i32) -> Result<(), PortError>;
}

// ==================== 时钟 ====================

/// 单调时钟抽象
///
/// 原实现依赖文件作用域的静态计时器；此处改为显式时钟对象，
/// 由装置控制器持有，模拟后端与控制器共享同一时钟。
pub trait Clock {
    /// 自时钟原点起的秒数
    fn now(&self) -> f64;

    /// 通知时钟一个轮询拍结束
    ///
    /// 真实时钟自行流逝，默认不做任何事；模拟时钟借此按拍前进，
    /// 使等待循环在无硬件环境下同样收敛。
    fn tick(&self, _dt: f64) {}
}

/// 真实单调时钟
#[derive(Debug)]
pub struct RealClock {
    origin: Instant,
}

impl RealClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for RealClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RealClock {
    fn now(&self) -> f64 {
        let elapsed: Duration = self.origin.elapsed();
        elapsed.as_secs_f64()
    }
}
