//! 子命令实现

mod monitor;
mod run;
mod zero;

pub use monitor::{MonitorCommand, monitor};
pub use run::{RunCommand, run};
pub use zero::{ZeroCommand, zero};
