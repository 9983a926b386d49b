//! # DEX CLI
//!
//! 模拟装置的命令行入口。
//!
//! ```bash
//! # 完整的模拟试次：等待到位 → 采集 5s 正弦运动 → 校验 → 落盘
//! dex-cli run --out trial_001
//!
//! # 力传感器偏置置零
//! dex-cli zero
//!
//! # 以 10Hz 打印实时状态 3 秒
//! dex-cli monitor --frequency 10 --duration 3
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod rig;

use commands::{MonitorCommand, RunCommand, ZeroCommand};

/// DEX 装置命令行工具
#[derive(Parser, Debug)]
#[command(name = "dex-cli")]
#[command(about = "Command-line interface for the DEX apparatus", long_about = None)]
#[command(version)]
struct Cli {
    /// 装置配置档（TOML）；省缺使用内置默认
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行一个完整的模拟试次
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 力传感器偏置置零
    Zero {
        #[command(flatten)]
        args: ZeroCommand,
    },

    /// 打印实时操纵器状态
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dex_cli=info".parse().unwrap())
                .add_directive("dex_apparatus=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = rig::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { args } => commands::run(config, args),
        Commands::Zero { args } => commands::zero(config, args),
        Commands::Monitor { args } => commands::monitor(config, args),
    }
}
