//! 试次事件与事件类别编码
//!
//! 事件以 `(time, kind, param)` 三元组追加进试次事件日志，
//! 类别编码随 `DEX_EVENT` 报文下传，必须保持稳定。

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 事件类别
///
/// 系统事件占用 1..=15，协议脚本定义的事件从 16 起。
/// 编码是线上契约的一部分，不得重排。
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum EventKind {
    /// 采集开始
    AcquisitionStart = 1,
    /// 采集结束
    AcquisitionStop = 2,
    /// 分析窗口起点
    BeginAnalysis = 3,
    /// 分析窗口终点
    EndAnalysis = 4,
    /// 目标 LED 状态变化（param 为位掩码）
    TargetEvent = 5,
    /// 声音状态变化（param 编码音调/音量）
    SoundEvent = 6,
    /// 操作员 Abort/Retry/Ignore 决定（param 为选择编码）
    OperatorPrompt = 7,
    /// 事后校验结果（param 高 16 位为校验编码，低 16 位为通过标志）
    CheckResult = 8,

    /// 脚本触发：运动开始提示
    TriggerMovement = 16,
    /// 脚本触发：向上运动提示
    TriggerMoveUp = 17,
    /// 脚本触发：向下运动提示
    TriggerMoveDown = 18,
}

impl EventKind {
    /// 由线上编码解析
    pub fn from_code(code: u32) -> Result<Self, ProtocolError> {
        Self::try_from(code).map_err(|_| ProtocolError::InvalidEventKind(code))
    }

    /// 线上编码
    pub fn code(self) -> u32 {
        self.into()
    }

    /// 是否为协议脚本定义的触发事件
    pub fn is_trigger(self) -> bool {
        self.code() >= 16
    }
}

/// 一条试次事件
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrialEvent {
    /// 事件时刻（秒，相对采集起点）
    pub time: f64,
    /// 事件类别
    pub kind: EventKind,
    /// 类别相关参数
    pub param: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_codes_stable() {
        assert_eq!(EventKind::AcquisitionStart.code(), 1);
        assert_eq!(EventKind::AcquisitionStop.code(), 2);
        assert_eq!(EventKind::BeginAnalysis.code(), 3);
        assert_eq!(EventKind::EndAnalysis.code(), 4);
        assert_eq!(EventKind::TargetEvent.code(), 5);
        assert_eq!(EventKind::SoundEvent.code(), 6);
        assert_eq!(EventKind::OperatorPrompt.code(), 7);
        assert_eq!(EventKind::CheckResult.code(), 8);
        assert_eq!(EventKind::TriggerMovement.code(), 16);
        assert_eq!(EventKind::TriggerMoveUp.code(), 17);
        assert_eq!(EventKind::TriggerMoveDown.code(), 18);
    }

    #[test]
    fn test_event_kind_roundtrip() {
        for kind in [
            EventKind::AcquisitionStart,
            EventKind::AcquisitionStop,
            EventKind::BeginAnalysis,
            EventKind::EndAnalysis,
            EventKind::TargetEvent,
            EventKind::SoundEvent,
            EventKind::OperatorPrompt,
            EventKind::CheckResult,
            EventKind::TriggerMovement,
            EventKind::TriggerMoveUp,
            EventKind::TriggerMoveDown,
        ] {
            assert_eq!(EventKind::from_code(kind.code()).unwrap(), kind);
        }
    }

    #[test]
    fn test_event_kind_invalid_code() {
        let err = EventKind::from_code(99).unwrap_err();
        match err {
            ProtocolError::InvalidEventKind(code) => assert_eq!(code, 99),
            other => panic!("Expected InvalidEventKind, got {other:?}"),
        }
    }

    #[test]
    fn test_trigger_classification() {
        assert!(EventKind::TriggerMovement.is_trigger());
        assert!(EventKind::TriggerMoveUp.is_trigger());
        assert!(!EventKind::AcquisitionStart.is_trigger());
        assert!(!EventKind::TargetEvent.is_trigger());
    }
}
