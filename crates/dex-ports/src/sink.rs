//! 遥测发送端抽象
//!
//! 报文契约见 `dex-protocol::telemetry`；这里只定义编码后文本行
//! 的去向。套接字传输由外部实现同一 trait 接入。

use crate::PortError;

/// 遥测行的发送端
pub trait TelemetrySink {
    /// 发送一行已编码（定长）的遥测
    fn send(&mut self, line: &str) -> Result<(), PortError>;
}

/// 丢弃所有遥测的发送端（无地面链路时使用）
#[derive(Debug, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn send(&mut self, _line: &str) -> Result<(), PortError> {
        Ok(())
    }
}

/// 通过 crossbeam 通道转发遥测行的发送端
///
/// 测试与工具用它捕获遥测流；接收端关闭后发送失败按设备错误上报。
pub struct ChannelSink {
    tx: crossbeam_channel::Sender<String>,
}

impl ChannelSink {
    /// 构造发送端与配对的接收端
    pub fn channel() -> (Self, crossbeam_channel::Receiver<String>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelSink {
    fn send(&mut self, line: &str) -> Result<(), PortError> {
        self.tx
            .send(line.to_string())
            .map_err(|_| PortError::Device("telemetry channel closed".to_string()))
    }
}
