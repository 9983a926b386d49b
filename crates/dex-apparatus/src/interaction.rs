//! 交互等待状态机
//!
//! 所有 `wait_*` 操作共享同一骨架：
//!
//! ```text
//! loop:
//!   update()                    # 轮询、派生、遥测
//!   if 超时:
//!      outcome = prompt_operator(...)   # Abort | Retry | Ignore
//!      Abort/Ignore → 返回；Retry → 只重置本步骤计时，继续
//!   驱动反馈（闪烁目标 / 力 LED 映射）
//!   if 条件满足: 返回 Normal
//! ```
//!
//! 超时提示永远配对遥测事件；Retry 只重置当前步骤的计时器。

use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, info};

use dex_motion::ExponentialFilter;
use dex_motion::force::compute_cop;
use dex_protocol::ManipulandumState;

use crate::controller::ApparatusController;
use crate::{ApparatusError, Outcome};

impl ApparatusController {
    /// 等待操纵器到达目标并保持
    ///
    /// 阶段 1：目标闪烁，直到位置（逐轴容差）、姿态（四元数夹角）
    /// 与可见性同时满足；阶段 2：目标常亮，要求连续满足
    /// `hold_time`，任何违反回到阶段 1（不是从头再来）。总超时
    /// 横跨两个阶段。
    pub fn wait_until_at_target(
        &mut self,
        target: usize,
        desired_orientation: UnitQuaternion<f64>,
        position_tolerance: Vector3<f64>,
        orientation_tolerance: f64,
        hold_time: f64,
        timeout: f64,
    ) -> Result<Outcome, ApparatusError> {
        let target_position = self.config.target_position(target)?;
        let blink_period = self.config.blink_period;

        let mut deadline = self.clock.now() + timeout;
        let mut hold_started: Option<f64> = None;
        let mut blink_on = false;
        let mut last_blink = self.clock.now();

        info!(target, timeout, "wait_until_at_target");
        loop {
            self.update()?;
            let now = self.clock.now();

            if now >= deadline {
                let outcome = self.prompt_operator(&format!(
                    "Subject did not reach target {target} within {timeout:.1} s. \
                     Check that the manipulandum is visible and within the workspace."
                ))?;
                match outcome {
                    Outcome::Abort | Outcome::Ignore => {
                        self.targets_off()?;
                        return Ok(outcome);
                    }
                    // Retry：只重置本步骤的计时
                    _ => {
                        deadline = self.clock.now() + timeout;
                        hold_started = None;
                        continue;
                    }
                }
            }

            let satisfied = at_target(
                &self.state,
                &target_position,
                &position_tolerance,
                &desired_orientation,
                orientation_tolerance,
            );

            match hold_started {
                None => {
                    // 阶段 1：闪烁引导
                    if now - last_blink >= blink_period {
                        blink_on = !blink_on;
                        last_blink = now;
                        self.set_target_state(if blink_on { 1 << target } else { 0 })?;
                    }
                    if satisfied {
                        hold_started = Some(now);
                        self.set_target_state(1 << target)?;
                        debug!(target, "target reached, hold phase");
                    }
                }
                Some(start) => {
                    if !satisfied {
                        // 违反 → 回到阶段 1
                        hold_started = None;
                        debug!(target, "hold violated, back to blink phase");
                    } else if now - start >= hold_time {
                        self.targets_off()?;
                        info!(target, "target held");
                        return Ok(Outcome::Normal);
                    }
                }
            }
        }
    }

    /// 等待对中抓握
    ///
    /// 仅当每只传感器的压力中心都有定义（以 `min_force` 为法向
    /// 阈值）且距中心 `< tolerance` 时成功。
    pub fn wait_centered_grip(
        &mut self,
        tolerance: f64,
        min_force: f64,
        timeout: f64,
    ) -> Result<Outcome, ApparatusError> {
        let mut deadline = self.clock.now() + timeout;

        info!(tolerance, min_force, timeout, "wait_centered_grip");
        loop {
            self.update()?;
            let now = self.clock.now();

            if now >= deadline {
                let outcome = self.prompt_operator(&format!(
                    "Grip is not centered (tolerance {tolerance:.1} mm at {min_force:.2} N). \
                     Ask the subject to regrasp the manipulandum."
                ))?;
                match outcome {
                    Outcome::Abort | Outcome::Ignore => return Ok(outcome),
                    _ => {
                        deadline = self.clock.now() + timeout;
                        continue;
                    }
                }
            }

            let centered = self.force_torque.iter().all(|ft| {
                let cop = compute_cop(ft, min_force);
                cop.is_defined() && cop.distance < tolerance
            });
            if centered {
                info!("grip centered");
                return Ok(Outcome::Normal);
            }
        }
    }

    /// 等待抓握力与负载力进入目标带并保持
    ///
    /// 实测力经单极点滤波（常数 `filter`）后映射到各自的 LED
    /// 子区间作为反馈；两个力带必须连续满足 `hold_time`，任何
    /// 越带只重置保持计时器，不重置整个等待。
    #[allow(clippy::too_many_arguments)]
    pub fn wait_desired_forces(
        &mut self,
        min_grip: f64,
        max_grip: f64,
        min_load: f64,
        max_load: f64,
        direction: Vector3<f64>,
        filter: f64,
        hold_time: f64,
        timeout: f64,
    ) -> Result<Outcome, ApparatusError> {
        let direction = direction.normalize();
        let mut grip_filter = ExponentialFilter::new(filter);
        let mut load_filter = ExponentialFilter::new(filter);

        let mut deadline = self.clock.now() + timeout;
        let mut hold_started: Option<f64> = None;
        let mut last_mask: Option<u32> = None;

        info!(min_grip, max_grip, min_load, max_load, "wait_desired_forces");
        loop {
            self.update()?;
            let now = self.clock.now();

            if now >= deadline {
                let outcome = self.prompt_operator(&format!(
                    "Desired forces not reached (grip {min_grip:.1}..{max_grip:.1} N, \
                     load {min_load:.1}..{max_load:.1} N held for {hold_time:.1} s)."
                ))?;
                match outcome {
                    Outcome::Abort | Outcome::Ignore => {
                        self.targets_off()?;
                        return Ok(outcome);
                    }
                    _ => {
                        deadline = self.clock.now() + timeout;
                        hold_started = None;
                        grip_filter.reset();
                        load_filter.reset();
                        continue;
                    }
                }
            }

            let grip = grip_filter.filter(self.grip);
            let load = load_filter.filter(self.load.dot(&direction));

            // 力 → LED 线性映射反馈（仅在变化时驱动端口）
            let mask = (1u32 << self.config.grip_leds.led_for(grip))
                | (1u32 << self.config.load_leds.led_for(load));
            if last_mask != Some(mask) {
                self.set_target_state(mask)?;
                last_mask = Some(mask);
            }

            let in_band = (min_grip..=max_grip).contains(&grip)
                && (min_load..=max_load).contains(&load);

            match hold_started {
                None if in_band => hold_started = Some(now),
                Some(_) if !in_band => {
                    // 越带只重置保持计时器
                    hold_started = None;
                    debug!("force excursion, hold timer reset");
                }
                Some(start) if now - start >= hold_time => {
                    self.targets_off()?;
                    info!(grip, load, "desired forces held");
                    return Ok(Outcome::Normal);
                }
                _ => {}
            }
        }
    }

    /// 等待滑移
    ///
    /// 记录每只传感器的初始压力中心，任一传感器的压力中心相对
    /// 初值位移超过 `slip_threshold` 即成功：位移触发，不是
    /// 范围保持。
    pub fn wait_slip(
        &mut self,
        min_force: f64,
        slip_threshold: f64,
        timeout: f64,
    ) -> Result<Outcome, ApparatusError> {
        let mut initial: Vec<Option<Vector3<f64>>> = vec![None; self.force_torque.len()];
        let mut deadline = self.clock.now() + timeout;

        info!(slip_threshold, timeout, "wait_slip");
        loop {
            self.update()?;
            let now = self.clock.now();

            if now >= deadline {
                let outcome = self.prompt_operator(&format!(
                    "No slip detected within {timeout:.1} s (threshold {slip_threshold:.1} mm)."
                ))?;
                match outcome {
                    Outcome::Abort | Outcome::Ignore => return Ok(outcome),
                    _ => {
                        deadline = self.clock.now() + timeout;
                        // 重试保留初始压力中心：步骤语义是"从初值滑开"
                        continue;
                    }
                }
            }

            for (i, ft) in self.force_torque.iter().enumerate() {
                let cop = compute_cop(ft, min_force);
                if !cop.is_defined() {
                    continue;
                }
                match initial[i] {
                    None => initial[i] = Some(cop.point),
                    Some(reference) => {
                        if (cop.point - reference).norm() > slip_threshold {
                            info!(transducer = i, "slip detected");
                            return Ok(Outcome::Normal);
                        }
                    }
                }
            }
        }
    }
}

/// 位置（逐轴）、姿态（夹角）与可见性同时满足
fn at_target(
    state: &ManipulandumState,
    target: &Vector3<f64>,
    position_tolerance: &Vector3<f64>,
    desired: &UnitQuaternion<f64>,
    orientation_tolerance: f64,
) -> bool {
    if !state.visible {
        return false;
    }
    let delta = state.position - target;
    if delta.x.abs() > position_tolerance.x
        || delta.y.abs() > position_tolerance.y
        || delta.z.abs() > position_tolerance.z
    {
        return false;
    }
    state.orientation.angle_to(desired) <= orientation_tolerance
}
