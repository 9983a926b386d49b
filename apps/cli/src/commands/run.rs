//! `run`：一个完整的模拟试次
//!
//! 脚本：等待到位 → 采集正弦运动 → 停止 → 事后校验 → 落盘。
//! 操纵器先从工作空间上方接近目标 0，到位保持后开始 20mm、
//! 1Hz 的正弦振荡并建立 4N 抓握。

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;
use dex_ports::Clock;
use nalgebra::{UnitQuaternion, Vector3};
use tracing::info;

use dex_apparatus::Outcome;
use dex_protocol::EventKind;

use crate::rig::{self, ConsoleOperator};

const APPROACH_S: f64 = 1.0;
/// 振荡起点：给"到位保持"阶段留出静止平台
const OSC_START_S: f64 = 2.0;
const TRIAL_S: f64 = 5.0;
const AMPLITUDE_MM: f64 = 20.0;
const FREQ_HZ: f64 = 1.0;
const GRIP_N: f32 = 4.0;

#[derive(Args, Debug)]
pub struct RunCommand {
    /// 试次输出目录
    #[arg(long, default_value = "trial_out")]
    out: PathBuf,

    /// 无人值守：对所有提示固定回答 abort|retry|ignore
    #[arg(long, value_parser = rig::parse_assume)]
    assume: Option<dex_apparatus::OperatorChoice>,

    /// 把遥测行回显到标准输出
    #[arg(long)]
    telemetry: bool,
}

pub fn run(config: dex_apparatus::ApparatusConfig, args: RunCommand) -> Result<()> {
    let n_channels = config.n_channels;
    let target = config.target_position(0)?;

    // 操纵器路径：1 秒线性下落到目标，静止保持，然后正弦振荡
    let translation = move |t: f64| {
        if t < APPROACH_S {
            let start = target + Vector3::new(0.0, 150.0, 0.0);
            start + (target - start) * (t / APPROACH_S)
        } else if t < OSC_START_S {
            target
        } else {
            let phase = 2.0 * std::f64::consts::PI * FREQ_HZ * (t - OSC_START_S);
            target + Vector3::new(0.0, AMPLITUDE_MM * phase.sin(), 0.0)
        }
    };

    // 到位之后建立抓握
    let waveform = Box::new(move |t: f64| {
        let mut channels = vec![0.0_f32; n_channels];
        if t >= APPROACH_S {
            channels[2] = GRIP_N;
            channels[8] = -GRIP_N;
        }
        channels
    });

    let operator = ConsoleOperator::new(args.assume);
    let (mut controller, clock) =
        rig::build_rig(config, translation, waveform, operator, args.telemetry)?;

    // 1. 等待到位并保持
    let outcome = controller.wait_until_at_target(
        0,
        UnitQuaternion::identity(),
        Vector3::new(10.0, 10.0, 10.0),
        0.5,
        0.5,
        20.0,
    )?;
    if outcome != Outcome::Normal {
        bail!("run terminated while waiting at target: {outcome:?}");
    }
    info!(elapsed = clock.now(), "subject at target, starting trial");

    // 2. 采集
    controller.start_acquisition(30.0)?;
    let acquisition_start = clock.now();
    let mut marked = false;
    while clock.now() - acquisition_start < TRIAL_S {
        controller.update()?;
        if !marked && clock.now() - acquisition_start >= 2.0 {
            controller.mark_event(EventKind::TriggerMovement, 0)?;
            marked = true;
        }
    }
    controller.stop_acquisition()?;

    // 3. 事后校验
    let direction = Vector3::new(0.0, 1.0, 0.0);
    let checks = [
        ("overrun", controller.check_overrun()?),
        ("visibility", controller.check_visibility(1.0, 0.05)?),
        (
            "amplitude",
            controller.check_movement_amplitude(15.0, 25.0, direction)?,
        ),
        (
            "cycles",
            controller.check_movement_cycles(3, 6, direction, 2.0)?,
        ),
    ];
    for (name, outcome) in &checks {
        println!("check {name:12} -> {outcome:?}");
        if *outcome == Outcome::Abort {
            bail!("run aborted by operator during {name} check");
        }
    }

    // 4. 落盘
    controller.write_trial_files(&args.out)?;
    controller.quit()?;
    println!(
        "trial complete: {} frames, {} samples -> {}",
        controller.trial_buffer().frame_count(),
        controller.trial_buffer().sample_count(),
        args.out.display()
    );
    Ok(())
}
