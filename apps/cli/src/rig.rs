//! 模拟装置的组装
//!
//! CLI 没有真实硬件可用，全部命令都在模拟后端上运行：操纵器
//! 沿脚本路径运动，ADC 给出可调的抓握波形，时钟由控制器按拍
//! 推进。

use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::Vector3;
use tracing::info;

use dex_apparatus::{ApparatusConfig, ApparatusController, OperatorChoice, OperatorInterface};
use dex_ports::sim::{AnalogWaveform, MarkerPath};
use dex_ports::{PortError, SimAdc, SimClock, SimSounds, SimTargets, SimTracker, TelemetrySink};
use dex_protocol::MarkerSample;

/// 加载配置档；省缺取默认
pub fn load_config(path: Option<&Path>) -> Result<ApparatusConfig> {
    match path {
        Some(path) => ApparatusConfig::load_from_file(path)
            .with_context(|| format!("loading apparatus config from {}", path.display())),
        None => Ok(ApparatusConfig::default()),
    }
}

// ==================== 操作员 ====================

/// 控制台操作员：inquire 选单；`assume` 给定时免提问
pub struct ConsoleOperator {
    assume: Option<OperatorChoice>,
}

impl ConsoleOperator {
    pub fn new(assume: Option<OperatorChoice>) -> Self {
        Self { assume }
    }
}

impl OperatorInterface for ConsoleOperator {
    fn signal_error(&mut self, message: &str) -> OperatorChoice {
        if let Some(choice) = self.assume {
            info!(message, ?choice, "unattended operator decision");
            return choice;
        }

        eprintln!("\n!! {message}");
        let answer = inquire::Select::new("How should the run proceed?", vec![
            "Retry", "Ignore", "Abort",
        ])
        .prompt();

        match answer {
            Ok("Retry") => OperatorChoice::Retry,
            Ok("Ignore") => OperatorChoice::Ignore,
            // 选择 Abort 或终端交互失败都按中止处理
            _ => OperatorChoice::Abort,
        }
    }
}

/// `--assume` 参数解析
pub fn parse_assume(value: &str) -> std::result::Result<OperatorChoice, String> {
    match value.to_ascii_lowercase().as_str() {
        "abort" => Ok(OperatorChoice::Abort),
        "retry" => Ok(OperatorChoice::Retry),
        "ignore" => Ok(OperatorChoice::Ignore),
        other => Err(format!("unknown choice `{other}`, expected abort|retry|ignore")),
    }
}

// ==================== 遥测 ====================

/// 把遥测行原样打到标准输出
pub struct PrintSink;

impl TelemetrySink for PrintSink {
    fn send(&mut self, line: &str) -> std::result::Result<(), PortError> {
        println!("{}", line.trim_end());
        Ok(())
    }
}

// ==================== 装配 ====================

/// 刚体沿给定平移路径运动的标记路径集
pub fn rigid_body_paths(
    config: &ApparatusConfig,
    translation: impl Fn(f64) -> Vector3<f64> + Send + Clone + 'static,
) -> Vec<MarkerPath> {
    let mut paths: Vec<MarkerPath> = Vec::new();
    for marker in 0..config.n_markers {
        let offset = config
            .rigid_body
            .iter()
            .find(|m| m.marker_id == marker)
            .map(|m| Vector3::from(m.offset));
        let f = translation.clone();
        paths.push(Box::new(move |t| match offset {
            Some(offset) => MarkerSample::visible_at(f(t) + offset),
            None => MarkerSample::invisible(),
        }));
    }
    paths
}

/// 组装一台模拟装置
pub fn build_rig(
    config: ApparatusConfig,
    translation: impl Fn(f64) -> Vector3<f64> + Send + Clone + 'static,
    waveform: AnalogWaveform,
    operator: ConsoleOperator,
    echo_telemetry: bool,
) -> Result<(ApparatusController, SimClock)> {
    let clock = SimClock::new();
    let tracker = SimTracker::new(clock.clone(), rigid_body_paths(&config, translation));
    let adc = SimAdc::new(clock.clone(), waveform);

    let mut builder = ApparatusController::builder(config)
        .tracker(tracker)
        .adc(adc)
        .targets(SimTargets::new())
        .sounds(SimSounds::new())
        .operator(operator)
        .clock(clock.clone());
    if echo_telemetry {
        builder = builder.telemetry_sink(PrintSink);
    }

    let mut controller = builder.build()?;
    controller.initialize()?;
    Ok((controller, clock))
}
