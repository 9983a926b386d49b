//! DEX 遥测报文契约
//!
//! 地面站链路使用固定包长的 ASCII 文本行数据报。每行格式为
//! `<TAG> <counter> <fields…>`，其中 `counter` 是单调递增的报文
//! 计数器，也是行内第一个数字字段。字段次序与数量是线上契约，
//! 如需地面侧兼容必须逐字节保持。
//!
//! 传输套接字机制不在本 crate 范围内；这里只负责编码与解析。

use crate::ProtocolError;

/// 遥测数据报的固定包长（字节，含结尾换行符）
///
/// 编码后的行以空格填充到该长度。
pub const TELEMETRY_PACKET_SIZE: usize = 256;

// ==================== 报文类型 ====================

/// 一条遥测报文（不含计数器）
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryMessage {
    /// `DEX_CONFIGURATION`：会话配置快照
    Configuration {
        n_markers: usize,
        n_channels: usize,
        n_transducers: usize,
        frame_period: f64,
        sample_period: f64,
    },

    /// `DEX_EVENT`：一条试次事件
    Event { time: f64, kind: u32, param: u32 },

    /// `DEX_STATE`：一拍派生状态
    State {
        time: f64,
        visible: bool,
        position: [f64; 3],
        orientation: [f64; 4],
        grip: f64,
        load: [f64; 3],
    },

    /// `DEX_RECORDING_START`：采集开始
    RecordingStart { max_duration_s: f64 },

    /// `DEX_RECORDING_SAMPLE`：一条模拟量采样
    RecordingSample {
        index: usize,
        time: f64,
        channels: Vec<f32>,
    },

    /// `DEX_RECORDING_RECORD`：一条重采样后的运动学记录
    RecordingRecord {
        index: usize,
        time: f64,
        visible: bool,
        position: [f64; 3],
    },

    /// `DEX_RECORDING_END`：采集结束与最终计数
    RecordingEnd { n_frames: usize, n_samples: usize },

    /// `DEX_QUIT`：会话结束
    Quit,
}

impl TelemetryMessage {
    /// 报文标签
    pub fn tag(&self) -> &'static str {
        match self {
            TelemetryMessage::Configuration { .. } => "DEX_CONFIGURATION",
            TelemetryMessage::Event { .. } => "DEX_EVENT",
            TelemetryMessage::State { .. } => "DEX_STATE",
            TelemetryMessage::RecordingStart { .. } => "DEX_RECORDING_START",
            TelemetryMessage::RecordingSample { .. } => "DEX_RECORDING_SAMPLE",
            TelemetryMessage::RecordingRecord { .. } => "DEX_RECORDING_RECORD",
            TelemetryMessage::RecordingEnd { .. } => "DEX_RECORDING_END",
            TelemetryMessage::Quit => "DEX_QUIT",
        }
    }

    /// 编码为固定包长的一行
    ///
    /// # 错误
    ///
    /// - `ProtocolError::PacketOverflow`: 渲染结果超过
    ///   [`TELEMETRY_PACKET_SIZE`]（通道数异常多的 SAMPLE 报文）
    pub fn encode(&self, counter: u32) -> Result<String, ProtocolError> {
        let mut line = format!("{} {}", self.tag(), counter);

        match self {
            TelemetryMessage::Configuration {
                n_markers,
                n_channels,
                n_transducers,
                frame_period,
                sample_period,
            } => {
                line.push_str(&format!(
                    " {n_markers} {n_channels} {n_transducers} {frame_period} {sample_period}"
                ));
            }
            TelemetryMessage::Event { time, kind, param } => {
                line.push_str(&format!(" {time} {kind} {param}"));
            }
            TelemetryMessage::State {
                time,
                visible,
                position,
                orientation,
                grip,
                load,
            } => {
                line.push_str(&format!(
                    " {} {} {} {} {} {} {} {} {} {} {} {} {}",
                    time,
                    u8::from(*visible),
                    position[0],
                    position[1],
                    position[2],
                    orientation[0],
                    orientation[1],
                    orientation[2],
                    orientation[3],
                    grip,
                    load[0],
                    load[1],
                    load[2],
                ));
            }
            TelemetryMessage::RecordingStart { max_duration_s } => {
                line.push_str(&format!(" {max_duration_s}"));
            }
            TelemetryMessage::RecordingSample {
                index,
                time,
                channels,
            } => {
                line.push_str(&format!(" {index} {time}"));
                for channel in channels {
                    line.push_str(&format!(" {channel}"));
                }
            }
            TelemetryMessage::RecordingRecord {
                index,
                time,
                visible,
                position,
            } => {
                line.push_str(&format!(
                    " {} {} {} {} {} {}",
                    index,
                    time,
                    u8::from(*visible),
                    position[0],
                    position[1],
                    position[2],
                ));
            }
            TelemetryMessage::RecordingEnd {
                n_frames,
                n_samples,
            } => {
                line.push_str(&format!(" {n_frames} {n_samples}"));
            }
            TelemetryMessage::Quit => {}
        }

        // 固定包长：空格填充，最后一个字节为换行符
        if line.len() + 1 > TELEMETRY_PACKET_SIZE {
            return Err(ProtocolError::PacketOverflow {
                len: line.len() + 1,
                max: TELEMETRY_PACKET_SIZE,
            });
        }
        while line.len() + 1 < TELEMETRY_PACKET_SIZE {
            line.push(' ');
        }
        line.push('\n');

        Ok(line)
    }

    /// 解析一行遥测，返回 `(counter, message)`
    pub fn parse(line: &str) -> Result<(u32, TelemetryMessage), ProtocolError> {
        let mut fields = line.split_whitespace();
        let tag = fields
            .next()
            .ok_or(ProtocolError::UnknownTag(String::new()))?;

        let tag_static: &'static str = match tag {
            "DEX_CONFIGURATION" => "DEX_CONFIGURATION",
            "DEX_EVENT" => "DEX_EVENT",
            "DEX_STATE" => "DEX_STATE",
            "DEX_RECORDING_START" => "DEX_RECORDING_START",
            "DEX_RECORDING_SAMPLE" => "DEX_RECORDING_SAMPLE",
            "DEX_RECORDING_RECORD" => "DEX_RECORDING_RECORD",
            "DEX_RECORDING_END" => "DEX_RECORDING_END",
            "DEX_QUIT" => "DEX_QUIT",
            other => return Err(ProtocolError::UnknownTag(other.to_string())),
        };

        let counter = parse_field::<u32>("counter", take(&mut fields, tag_static, "counter")?)?;

        let message = match tag_static {
            "DEX_CONFIGURATION" => TelemetryMessage::Configuration {
                n_markers: parse_field("n_markers", take(&mut fields, tag_static, "n_markers")?)?,
                n_channels: parse_field("n_channels", take(&mut fields, tag_static, "n_channels")?)?,
                n_transducers: parse_field("n_transducers", take(&mut fields, tag_static, "n_transducers")?)?,
                frame_period: parse_field("frame_period", take(&mut fields, tag_static, "frame_period")?)?,
                sample_period: parse_field("sample_period", take(&mut fields, tag_static, "sample_period")?)?,
            },
            "DEX_EVENT" => TelemetryMessage::Event {
                time: parse_field("time", take(&mut fields, tag_static, "time")?)?,
                kind: parse_field("kind", take(&mut fields, tag_static, "kind")?)?,
                param: parse_field("param", take(&mut fields, tag_static, "param")?)?,
            },
            "DEX_STATE" => {
                let time = parse_field("time", take(&mut fields, tag_static, "time")?)?;
                let visible = parse_field::<u8>("visible", take(&mut fields, tag_static, "visible")?)? != 0;
                let mut position = [0.0; 3];
                for p in position.iter_mut() {
                    *p = parse_field("position", take(&mut fields, tag_static, "position")?)?;
                }
                let mut orientation = [0.0; 4];
                for q in orientation.iter_mut() {
                    *q = parse_field("orientation", take(&mut fields, tag_static, "orientation")?)?;
                }
                let grip = parse_field("grip", take(&mut fields, tag_static, "grip")?)?;
                let mut load = [0.0; 3];
                for l in load.iter_mut() {
                    *l = parse_field("load", take(&mut fields, tag_static, "load")?)?;
                }
                TelemetryMessage::State {
                    time,
                    visible,
                    position,
                    orientation,
                    grip,
                    load,
                }
            }
            "DEX_RECORDING_START" => TelemetryMessage::RecordingStart {
                max_duration_s: parse_field("max_duration_s", take(&mut fields, tag_static, "max_duration_s")?)?,
            },
            "DEX_RECORDING_SAMPLE" => {
                let index = parse_field("index", take(&mut fields, tag_static, "index")?)?;
                let time = parse_field("time", take(&mut fields, tag_static, "time")?)?;
                let mut channels = Vec::new();
                for value in fields.by_ref() {
                    channels.push(parse_field::<f32>("channel", value)?);
                }
                TelemetryMessage::RecordingSample {
                    index,
                    time,
                    channels,
                }
            }
            "DEX_RECORDING_RECORD" => {
                let index = parse_field("index", take(&mut fields, tag_static, "index")?)?;
                let time = parse_field("time", take(&mut fields, tag_static, "time")?)?;
                let visible = parse_field::<u8>("visible", take(&mut fields, tag_static, "visible")?)? != 0;
                let mut position = [0.0; 3];
                for p in position.iter_mut() {
                    *p = parse_field("position", take(&mut fields, tag_static, "position")?)?;
                }
                TelemetryMessage::RecordingRecord {
                    index,
                    time,
                    visible,
                    position,
                }
            }
            "DEX_RECORDING_END" => TelemetryMessage::RecordingEnd {
                n_frames: parse_field("n_frames", take(&mut fields, tag_static, "n_frames")?)?,
                n_samples: parse_field("n_samples", take(&mut fields, tag_static, "n_samples")?)?,
            },
            "DEX_QUIT" => TelemetryMessage::Quit,
            _ => unreachable!(),
        };

        Ok((counter, message))
    }
}

fn take<'a, I>(fields: &mut I, tag: &'static str, field: &'static str) -> Result<&'a str, ProtocolError>
where
    I: Iterator<Item = &'a str>,
{
    fields.next().ok_or(ProtocolError::MissingField { tag, field })
}

fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    })
}

// ==================== 报文计数器 ====================

/// 单调递增的报文计数器
///
/// 原实现使用文件作用域静态计数；此处改为显式对象，由遥测
/// 客户端持有并按引用传递。
#[derive(Debug, Default)]
pub struct MessageCounter {
    next: u32,
}

impl MessageCounter {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// 取下一个计数值
    pub fn next(&mut self) -> u32 {
        let value = self.next;
        self.next = self.next.wrapping_add(1);
        value
    }

    /// 已发出的报文数量
    pub fn issued(&self) -> u32 {
        self.next
    }
}
