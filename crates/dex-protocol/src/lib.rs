//! # DEX Protocol
//!
//! DEX 实验装置的核心数据模型与地面遥测报文契约（无硬件依赖）。
//!
//! ## 模块
//!
//! - `types`: 标记帧、模拟采样、力/力矩采样等核心数据类型
//! - `events`: 试次事件与事件类别编码
//! - `telemetry`: DEX_* 文本行遥测报文的编码/解析
//!
//! ## 分层位置
//!
//! ```text
//! Apparatus Layer (dex-apparatus)
//!     ↓ 构造 TelemetryMessage / 追加 TrialEvent
//! dex-protocol (此 crate)
//!     ↓ TelemetrySink trait 由端口层实现
//! Ports Layer (dex-ports)
//! ```

pub mod events;
pub mod telemetry;
pub mod types;

// 重新导出常用类型
pub use events::{EventKind, TrialEvent};
pub use telemetry::{MessageCounter, TELEMETRY_PACKET_SIZE, TelemetryMessage};
pub use types::*;

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 未知报文标签
    #[error("Unknown telemetry tag: {0}")]
    UnknownTag(String),

    /// 报文字段缺失
    #[error("Missing field `{field}` in {tag} message")]
    MissingField { tag: &'static str, field: &'static str },

    /// 字段解析失败
    #[error("Invalid value for field `{field}`: {value}")]
    InvalidField { field: &'static str, value: String },

    /// 渲染后的报文超过固定包长
    #[error("Rendered packet length {len} exceeds fixed packet size {max}")]
    PacketOverflow { len: usize, max: usize },

    /// 无效的事件类别编码
    #[error("Invalid event kind code: {0}")]
    InvalidEventKind(u32),
}
