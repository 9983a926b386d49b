//! # DEX Apparatus
//!
//! 装置编排层：把端口、位姿/力学派生、试次缓冲、交互等待与
//! 事后校验拼成一台可跑试次的设备。
//!
//! - `controller`: [`ApparatusController`]，轮询 `update` 与采集生命周期
//! - `interaction`: 阻塞等待（到位、对中抓握、力带保持、滑移触发）
//! - `validation`: 试次定稿后的统计校验
//! - `events`: 试次事件日志与分析窗口定位
//! - `buffer`: 试次缓冲区（采集期 + 定稿序列）
//! - `config`: TOML 装置配置档
//! - `operator`: 操作员 Abort/Retry/Ignore 接口
//!
//! # 并发模型
//!
//! 单线程协作轮询：所有阻塞等待都是逐拍调用 `update()` 的忙轮询
//! 循环，没有任何内部并发。Abort 以返回值逐层上传，绝不在深层
//! 直接退出进程。

pub mod buffer;
pub mod config;
pub mod controller;
pub mod events;
mod interaction;
pub mod operator;
pub mod telemetry;
mod validation;

pub use buffer::TrialBuffer;
pub use config::{ApparatusConfig, LedRangeConfig, TransducerConfig};
pub use controller::{ApparatusBuilder, ApparatusController};
pub use events::TrialEventLog;
pub use operator::{OperatorChoice, OperatorInterface, ScriptedOperator};
pub use telemetry::TelemetryClient;
pub use validation::CheckCode;

use dex_motion::MotionError;
use dex_ports::PortError;
use dex_protocol::ProtocolError;
use dex_tools::ToolsError;
use thiserror::Error;

/// 等待与校验的统一结果
///
/// `Abort` 必须一路传回试次运行器，由它决定终止；`Retry` 只
/// 重置当前步骤的计时；`Ignore` 接受失败并继续。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 成功 / 校验通过
    Normal,
    /// 操作员中止整个运行
    Abort,
    /// 操作员要求重做当前步骤
    Retry,
    /// 操作员接受失败并继续
    Ignore,
}

impl Outcome {
    /// 遥测参数编码
    pub fn code(self) -> u32 {
        match self {
            Outcome::Normal => 0,
            Outcome::Abort => 1,
            Outcome::Retry => 2,
            Outcome::Ignore => 3,
        }
    }
}

/// 装置层错误类型
///
/// 原实现对致命条件直接退出进程；此处全部作为 `Result` 返回，
/// 由顶层试次运行器决定是否终止。
#[derive(Error, Debug)]
pub enum ApparatusError {
    /// 端口层错误
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    /// 运动分析层错误
    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),

    /// 遥测编码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 输出文件错误
    #[error("Tools error: {0}")]
    Tools(#[from] ToolsError),

    /// IO 错误
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),

    /// 引用了不存在的目标 LED
    #[error("Invalid target index: {0}")]
    InvalidTarget(usize),

    /// 没有处于采集状态
    #[error("No acquisition active")]
    NotAcquiring,
}
