//! `zero`：力传感器偏置置零
//!
//! 模拟 ADC 上带一个恒定电平，演示置零把它完全吸收。

use anyhow::Result;
use clap::Args;
use nalgebra::Vector3;

use crate::rig::{self, ConsoleOperator};

#[derive(Args, Debug)]
pub struct ZeroCommand {
    /// 模拟的恒定残余电平
    #[arg(long, default_value_t = 0.75)]
    level: f32,
}

pub fn zero(config: dex_apparatus::ApparatusConfig, args: ZeroCommand) -> Result<()> {
    let n_channels = config.n_channels;
    let level = args.level;

    let (mut controller, _clock) = rig::build_rig(
        config,
        |_t| Vector3::zeros(),
        Box::new(move |_t| vec![level; n_channels]),
        ConsoleOperator::new(None),
        false,
    )?;

    controller.nullify_offsets()?;

    for (i, profile) in controller.calibrations().iter().enumerate() {
        println!("transducer {i} bias: {:?}", profile.bias);
    }

    // 置零后派生力应为零
    controller.update()?;
    println!(
        "grip after zeroing: {:.6} N, load: {:.6} N",
        controller.grip_force(),
        controller.load_force().norm()
    );
    Ok(())
}
