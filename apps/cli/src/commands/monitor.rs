//! `monitor`：打印实时操纵器状态

use anyhow::Result;
use clap::Args;
use dex_ports::Clock;
use nalgebra::Vector3;

use crate::rig::{self, ConsoleOperator};

#[derive(Args, Debug)]
pub struct MonitorCommand {
    /// 打印频率（Hz）
    #[arg(short, long, default_value_t = 10)]
    frequency: u32,

    /// 监控时长（秒）
    #[arg(short, long, default_value_t = 3.0)]
    duration: f64,
}

pub fn monitor(config: dex_apparatus::ApparatusConfig, args: MonitorCommand) -> Result<()> {
    let n_channels = config.n_channels;

    // 缓慢圆周运动，便于肉眼核对坐标变化
    let translation = |t: f64| {
        Vector3::new(
            30.0 * (0.5 * t).cos(),
            100.0 + 30.0 * (0.5 * t).sin(),
            0.0,
        )
    };

    let (mut controller, clock) = rig::build_rig(
        config,
        translation,
        Box::new(move |_t| vec![0.0; n_channels]),
        ConsoleOperator::new(None),
        false,
    )?;

    let print_period = 1.0 / f64::from(args.frequency.max(1));
    let mut next_print = 0.0;
    while clock.now() < args.duration {
        controller.update()?;
        let now = clock.now();
        if now >= next_print {
            let state = controller.manipulandum_state();
            println!(
                "t={:7.3}  visible={}  pos=[{:8.2} {:8.2} {:8.2}]  grip={:6.2}",
                now,
                u8::from(state.visible),
                state.position.x,
                state.position.y,
                state.position.z,
                controller.grip_force(),
            );
            next_print = now + print_period;
        }
    }
    Ok(())
}
