//! # DEX Motion
//!
//! 运动与力学分析引擎：
//!
//! - `pose`: 由部分可见的标记点云解算刚体位姿
//! - `force`: 力/力矩标定管线与压力中心、抓握力、负载力派生
//! - `resample`: 不规则采样序列到固定周期序列的线性重采样
//! - `filter`: 零相位平滑、速度/加速度差分与迟滞周期计数
//!
//! 本 crate 为纯计算层，不依赖任何端口或硬件。

pub mod filter;
pub mod force;
pub mod pose;
pub mod resample;

pub use filter::{ExponentialFilter, SchmittCounter};
pub use force::CalibrationProfile;
pub use pose::Pose;
pub use resample::Lerp;

use thiserror::Error;

/// 运动分析层错误类型
#[derive(Error, Debug)]
pub enum MotionError {
    /// 位姿不可观测：无可见标记
    #[error("Pose is unobservable: no visible markers")]
    Unobservable,

    /// 标定输入的通道数与标定档不符
    #[error("Gauge channel mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// 置零操作没有可平均的采样
    #[error("Offset nullification requires at least one sample")]
    NoSamples,
}
