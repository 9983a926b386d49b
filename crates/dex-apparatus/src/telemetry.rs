//! 遥测客户端
//!
//! 把报文计数器和发送端捆在一起；控制器的每条遥测都经由这里，
//! 保证计数单调且与发送端解耦。

use dex_ports::TelemetrySink;
use dex_protocol::{MessageCounter, TelemetryMessage};

use crate::ApparatusError;

/// 遥测客户端
pub struct TelemetryClient {
    counter: MessageCounter,
    sink: Box<dyn TelemetrySink>,
}

impl TelemetryClient {
    pub fn new(sink: Box<dyn TelemetrySink>) -> Self {
        Self {
            counter: MessageCounter::new(),
            sink,
        }
    }

    /// 编码并发送一条报文
    pub fn send(&mut self, message: &TelemetryMessage) -> Result<(), ApparatusError> {
        let line = message.encode(self.counter.next())?;
        self.sink.send(&line)?;
        Ok(())
    }

    /// 已发送的报文数量
    pub fn issued(&self) -> u32 {
        self.counter.issued()
    }
}
