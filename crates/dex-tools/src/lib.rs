//! # DEX Tools
//!
//! 试次输出文件写出器。每个试次落盘四个制表符分隔的文本文件：
//! 原始标记、派生运动学、原始模拟量、派生力学序列，每行一条
//! 采样，首列为 `time`。
//!
//! 本 crate 只依赖协议层数据类型，不依赖装置层。

pub mod output;

pub use output::{
    write_analog_file, write_forces_file, write_kinematics_file, write_marker_file,
};

use thiserror::Error;

/// 工具层错误类型
#[derive(Error, Debug)]
pub enum ToolsError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// 派生序列长度不一致
    #[error("Series length mismatch: {name} has {actual}, expected {expected}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
}
