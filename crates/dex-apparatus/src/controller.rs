//! 装置控制器
//!
//! 持有四个端口对象、时钟、操作员接口与遥测客户端，驱动轮询
//! `update`、采集生命周期与试次文件写出。端口以 trait 对象注入，
//! 核心永远不感知当前是真实驱动还是模拟后端。

use std::path::Path;
use std::time::Duration;

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use dex_motion::force::{apply_calibration, compute_cop, grip_force, load_force, nullify_offsets};
use dex_motion::pose::{estimate_pose, visible_pairs};
use dex_motion::resample::{resample_analog, resample_marker_frames};
use dex_motion::{CalibrationProfile, MotionError};
use dex_ports::{Adc, Clock, NullSink, RealClock, SoundPort, TargetPort, TelemetrySink, Tracker};
use dex_protocol::{
    AnalogSample, CenterOfPressure, EventKind, ForceTorqueSample, ManipulandumState,
    RigidBodyModel, TelemetryMessage,
};

use crate::buffer::TrialBuffer;
use crate::config::ApparatusConfig;
use crate::operator::{OperatorChoice, OperatorInterface, ScriptedOperator};
use crate::telemetry::TelemetryClient;
use crate::validation::CheckCode;
use crate::{ApparatusError, Outcome};

/// 装置控制器
///
/// 试次缓冲区被它独占：`start_acquisition` 清空、`update` 追加、
/// `stop_acquisition` 定稿重采样，之后只读用于校验。
pub struct ApparatusController {
    pub(crate) config: ApparatusConfig,
    pub(crate) rigid_body: RigidBodyModel,
    pub(crate) calibrations: Vec<CalibrationProfile>,

    pub(crate) tracker: Box<dyn Tracker>,
    pub(crate) adc: Box<dyn Adc>,
    pub(crate) targets: Box<dyn TargetPort>,
    pub(crate) sounds: Box<dyn SoundPort>,
    pub(crate) operator: Box<dyn OperatorInterface>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) telemetry: TelemetryClient,

    pub(crate) buffer: TrialBuffer,
    pub(crate) acquiring: bool,
    pub(crate) acquisition_start: f64,
    last_update: Option<f64>,

    // 最近一拍的派生状态
    pub(crate) state: ManipulandumState,
    pub(crate) force_torque: Vec<ForceTorqueSample>,
    pub(crate) cop: Vec<CenterOfPressure>,
    pub(crate) grip: f64,
    pub(crate) load: Vector3<f64>,
}

// ==================== Builder ====================

/// 控制器构造器（链式注入端口）
pub struct ApparatusBuilder {
    config: ApparatusConfig,
    tracker: Option<Box<dyn Tracker>>,
    adc: Option<Box<dyn Adc>>,
    targets: Option<Box<dyn TargetPort>>,
    sounds: Option<Box<dyn SoundPort>>,
    operator: Option<Box<dyn OperatorInterface>>,
    clock: Option<Box<dyn Clock>>,
    sink: Option<Box<dyn TelemetrySink>>,
}

impl ApparatusBuilder {
    pub fn new(config: ApparatusConfig) -> Self {
        Self {
            config,
            tracker: None,
            adc: None,
            targets: None,
            sounds: None,
            operator: None,
            clock: None,
            sink: None,
        }
    }

    pub fn tracker(mut self, tracker: impl Tracker + 'static) -> Self {
        self.tracker = Some(Box::new(tracker));
        self
    }

    pub fn adc(mut self, adc: impl Adc + 'static) -> Self {
        self.adc = Some(Box::new(adc));
        self
    }

    pub fn targets(mut self, targets: impl TargetPort + 'static) -> Self {
        self.targets = Some(Box::new(targets));
        self
    }

    pub fn sounds(mut self, sounds: impl SoundPort + 'static) -> Self {
        self.sounds = Some(Box::new(sounds));
        self
    }

    /// 省缺时每次错误都回答 Abort
    pub fn operator(mut self, operator: impl OperatorInterface + 'static) -> Self {
        self.operator = Some(Box::new(operator));
        self
    }

    /// 省缺时使用真实单调时钟
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// 省缺时遥测被丢弃
    pub fn telemetry_sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn build(self) -> Result<ApparatusController, ApparatusError> {
        self.config.validate()?;

        let tracker = self
            .tracker
            .ok_or_else(|| ApparatusError::Config("tracker port not provided".to_string()))?;
        let adc = self
            .adc
            .ok_or_else(|| ApparatusError::Config("adc port not provided".to_string()))?;
        let targets = self
            .targets
            .ok_or_else(|| ApparatusError::Config("target port not provided".to_string()))?;
        let sounds = self
            .sounds
            .ok_or_else(|| ApparatusError::Config("sound port not provided".to_string()))?;

        let operator = self
            .operator
            .unwrap_or_else(|| Box::new(ScriptedOperator::new(OperatorChoice::Abort)));
        let clock = self.clock.unwrap_or_else(|| Box::new(RealClock::new()));
        let sink = self.sink.unwrap_or_else(|| Box::new(NullSink));

        let n_transducers = self.config.transducers.len();
        let buffer = TrialBuffer::new(
            self.config.frame_capacity,
            self.config.sample_capacity,
            self.config.event_capacity,
            self.config.frame_period,
            self.config.sample_period,
            n_transducers,
        );

        let rigid_body = self.config.rigid_body_model();
        let calibrations = self.config.calibration_profiles()?;

        Ok(ApparatusController {
            state: ManipulandumState::invisible(0.0, nalgebra::UnitQuaternion::identity()),
            force_torque: vec![ForceTorqueSample::zero(); n_transducers],
            cop: vec![CenterOfPressure::undefined(); n_transducers],
            grip: 0.0,
            load: Vector3::zeros(),
            config: self.config,
            rigid_body,
            calibrations,
            tracker,
            adc,
            targets,
            sounds,
            operator,
            clock,
            telemetry: TelemetryClient::new(sink),
            buffer,
            acquiring: false,
            acquisition_start: 0.0,
            last_update: None,
        })
    }
}

// ==================== 生命周期 ====================

impl ApparatusController {
    pub fn builder(config: ApparatusConfig) -> ApparatusBuilder {
        ApparatusBuilder::new(config)
    }

    /// 初始化全部端口并下传配置快照
    pub fn initialize(&mut self) -> Result<(), ApparatusError> {
        self.tracker.initialize()?;
        self.adc.initialize()?;
        self.targets.set_target_state(0)?;
        self.sounds.set_sound_state(0, 0)?;

        self.telemetry.send(&TelemetryMessage::Configuration {
            n_markers: self.config.n_markers,
            n_channels: self.config.n_channels,
            n_transducers: self.config.transducers.len(),
            frame_period: self.config.frame_period,
            sample_period: self.config.sample_period,
        })?;
        info!(
            markers = self.config.n_markers,
            channels = self.config.n_channels,
            transducers = self.config.transducers.len(),
            "apparatus initialized"
        );
        Ok(())
    }

    /// 会话结束：端口静默并下传 DEX_QUIT
    pub fn quit(&mut self) -> Result<(), ApparatusError> {
        self.targets.set_target_state(0)?;
        self.sounds.set_sound_state(0, 0)?;
        self.telemetry.send(&TelemetryMessage::Quit)?;
        Ok(())
    }

    // ==================== 轮询 ====================

    /// 轮询一拍：采样端口、派生状态、追加缓冲、下传遥测
    ///
    /// 按配置的最小拍间隔自节流：真实时钟下睡掉剩余时间，模拟
    /// 时钟按拍前进，等待循环因此有界。
    pub fn update(&mut self) -> Result<(), ApparatusError> {
        let before = self.clock.now();
        self.clock.tick(self.config.min_update_period);
        let mut now = self.clock.now();
        if now - before < self.config.min_update_period * 0.5 {
            // 真实时钟：tick 不前进，需要时补足最小拍间隔
            if let Some(last) = self.last_update {
                let remaining = self.config.min_update_period - (now - last);
                if remaining > 0.0 {
                    spin_sleep::sleep(Duration::from_secs_f64(remaining));
                }
            }
            now = self.clock.now();
        }
        self.last_update = Some(now);
        let t = self.elapsed(now);

        // 轮询端口，每拍一次、非阻塞
        let mut frame = self.tracker.current_frame()?;
        let sample = self.adc.current_sample()?;
        frame.time = t;

        // 位姿派生：默认姿态取最近已知姿态
        let pairs = visible_pairs(&self.rigid_body, &frame);
        let state = match estimate_pose(&pairs, Some(self.state.orientation)) {
            Ok(pose) => ManipulandumState {
                time: t,
                position: pose.position,
                orientation: pose.orientation,
                visible: true,
            },
            Err(MotionError::Unobservable) => {
                ManipulandumState::invisible(t, self.state.orientation)
            }
            Err(e) => return Err(e.into()),
        };

        // 力学派生
        for (i, profile) in self.calibrations.iter().enumerate() {
            let gauges = extract_gauges(&sample.channels, &self.config.transducers[i].channels);
            let ft = apply_calibration(&gauges, profile)?;
            self.cop[i] = compute_cop(&ft, self.config.cop_threshold);
            self.force_torque[i] = ft;
        }
        if self.force_torque.len() >= 2 {
            self.grip = grip_force(&self.force_torque[0], &self.force_torque[1]);
            self.load = load_force(&self.force_torque[0], &self.force_torque[1]);
        }
        self.state = state;

        if self.acquiring {
            let rebased = AnalogSample {
                time: t,
                channels: sample.channels,
            };
            self.buffer.append_polled(frame, state, rebased);
        }

        let q = state.orientation.quaternion();
        self.telemetry.send(&TelemetryMessage::State {
            time: t,
            visible: state.visible,
            position: [state.position.x, state.position.y, state.position.z],
            orientation: [q.i, q.j, q.k, q.w],
            grip: self.grip,
            load: [self.load.x, self.load.y, self.load.z],
        })?;
        Ok(())
    }

    /// 相对时间：采集中相对采集起点，否则相对会话起点
    pub(crate) fn elapsed(&self, now: f64) -> f64 {
        if self.acquiring {
            now - self.acquisition_start
        } else {
            now
        }
    }

    // ==================== 采集 ====================

    /// 开始一次限时采集：清空缓冲与事件日志
    pub fn start_acquisition(&mut self, max_duration_s: f64) -> Result<(), ApparatusError> {
        self.buffer.clear();
        self.tracker.start_acquisition(max_duration_s)?;
        self.adc.start_acquisition()?;
        self.acquisition_start = self.clock.now();
        self.acquiring = true;

        self.buffer
            .events
            .mark_event(0.0, EventKind::AcquisitionStart, 0);
        self.telemetry
            .send(&TelemetryMessage::RecordingStart { max_duration_s })?;
        info!(max_duration_s, "acquisition started");
        Ok(())
    }

    /// 结束采集：取回硬件记录、重采样、定稿派生序列
    pub fn stop_acquisition(&mut self) -> Result<(), ApparatusError> {
        if !self.acquiring {
            return Err(ApparatusError::NotAcquiring);
        }
        self.tracker.stop_acquisition()?;
        self.adc.stop_acquisition()?;
        self.acquiring = false;
        let duration = self.clock.now() - self.acquisition_start;

        // 取回硬件缓冲的完整记录；端口没有缓冲时回退到轮询序列
        let mut frames = self.tracker.retrieve_frames(self.config.frame_capacity)?;
        for frame in &mut frames {
            frame.time -= self.acquisition_start;
        }
        if frames.is_empty() {
            frames = self.buffer.polled_frames.clone();
        }
        let mut analog = self.adc.retrieve_samples(self.config.sample_capacity)?;
        for sample in &mut analog {
            sample.time -= self.acquisition_start;
        }
        if analog.is_empty() {
            analog = self.buffer.polled_analog.clone();
        }

        // 定稿：固定周期重采样（标记与模拟量策略不同）
        self.buffer.frames =
            resample_marker_frames(&frames, 0.0, self.config.frame_period);
        self.buffer.analog = resample_analog(&analog, 0.0, self.config.sample_period);

        self.derive_finalized_series()?;

        let n_frames = self.buffer.frames.len();
        let n_samples = self.buffer.analog.len();
        self.buffer.events.set_counts(n_frames, n_samples);
        self.buffer
            .events
            .mark_event(duration, EventKind::AcquisitionStop, 0);
        self.telemetry.send(&TelemetryMessage::RecordingEnd {
            n_frames,
            n_samples,
        })?;
        info!(n_frames, n_samples, duration, "acquisition stopped");
        Ok(())
    }

    /// 在定稿栅格上重算状态与力学序列
    fn derive_finalized_series(&mut self) -> Result<(), ApparatusError> {
        self.buffer.states.clear();
        let mut orientation = nalgebra::UnitQuaternion::identity();
        for frame in &self.buffer.frames {
            let pairs = visible_pairs(&self.rigid_body, frame);
            let state = match estimate_pose(&pairs, Some(orientation)) {
                Ok(pose) => {
                    orientation = pose.orientation;
                    ManipulandumState {
                        time: frame.time,
                        position: pose.position,
                        orientation: pose.orientation,
                        visible: true,
                    }
                }
                Err(MotionError::Unobservable) => {
                    ManipulandumState::invisible(frame.time, orientation)
                }
                Err(e) => return Err(e.into()),
            };
            self.buffer.states.push(state);
        }

        for series in &mut self.buffer.force_torque {
            series.clear();
        }
        for series in &mut self.buffer.cop {
            series.clear();
        }
        self.buffer.grip.clear();
        self.buffer.load.clear();

        let n_transducers = self.calibrations.len();
        for sample in &self.buffer.analog {
            let mut fts = Vec::with_capacity(n_transducers);
            for (i, profile) in self.calibrations.iter().enumerate() {
                let gauges =
                    extract_gauges(&sample.channels, &self.config.transducers[i].channels);
                let ft = apply_calibration(&gauges, profile)?;
                self.buffer.cop[i].push(compute_cop(&ft, self.config.cop_threshold));
                self.buffer.force_torque[i].push(ft);
                fts.push(ft);
            }
            if fts.len() >= 2 {
                self.buffer.grip.push(grip_force(&fts[0], &fts[1]));
                self.buffer.load.push(load_force(&fts[0], &fts[1]));
            } else {
                self.buffer.grip.push(0.0);
                self.buffer.load.push(Vector3::zeros());
            }
        }
        Ok(())
    }

    /// 采集越限检查：可恢复条件，绝不崩溃
    pub fn check_overrun(&mut self) -> Result<Outcome, ApparatusError> {
        let hardware = self.tracker.acquisition_overrun();
        let software = self.buffer.overrun();
        let passed = !hardware && !software;
        if !passed {
            warn!(hardware, software, "acquisition overrun detected");
        }
        self.report_check(
            CheckCode::Overrun,
            passed,
            format!(
                "Acquisition overrun: hardware buffer full = {hardware}, trial buffer full = {software}. \
                 The recording is truncated."
            ),
        )
    }

    // ==================== 事件 / 刺激 ====================

    /// 标记一条协议事件并下传
    pub fn mark_event(&mut self, kind: EventKind, param: u32) -> Result<(), ApparatusError> {
        let t = self.elapsed(self.clock.now());
        self.buffer.events.mark_event(t, kind, param);
        self.telemetry.send(&TelemetryMessage::Event {
            time: t,
            kind: kind.code(),
            param,
        })?;
        Ok(())
    }

    /// 设置目标 LED 位掩码（记录 TargetEvent）
    pub fn set_target_state(&mut self, bitmask: u32) -> Result<(), ApparatusError> {
        self.targets.set_target_state(bitmask)?;
        self.mark_event(EventKind::TargetEvent, bitmask)
    }

    /// 点亮单个目标，熄灭其它
    pub fn set_target_on(&mut self, target: usize) -> Result<(), ApparatusError> {
        if target >= self.config.target_positions.len() {
            return Err(ApparatusError::InvalidTarget(target));
        }
        self.set_target_state(1 << target)
    }

    /// 全部目标熄灭
    pub fn targets_off(&mut self) -> Result<(), ApparatusError> {
        self.set_target_state(0)
    }

    /// 设置音调与音量（记录 SoundEvent）
    pub fn set_sound(&mut self, tone: i32, volume: i32) -> Result<(), ApparatusError> {
        self.sounds.set_sound_state(tone, volume)?;
        let param = ((tone as u32 & 0xFFFF) << 16) | (volume as u32 & 0xFFFF);
        self.mark_event(EventKind::SoundEvent, param)
    }

    /// 静音
    pub fn sound_off(&mut self) -> Result<(), ApparatusError> {
        self.set_sound(0, 0)
    }

    // ==================== 置零 ====================

    /// 偏置置零：平均配置数量的原始采样作为新偏置
    pub fn nullify_offsets(&mut self) -> Result<(), ApparatusError> {
        let n_transducers = self.calibrations.len();
        let mut gauge_samples: Vec<Vec<Vec<f32>>> = vec![Vec::new(); n_transducers];

        for _ in 0..self.config.nullify_samples {
            self.clock.tick(self.config.min_update_period);
            let sample = self.adc.current_sample()?;
            for (i, transducer) in self.config.transducers.iter().enumerate() {
                gauge_samples[i].push(extract_gauges(&sample.channels, &transducer.channels));
            }
        }

        for (profile, samples) in self.calibrations.iter_mut().zip(gauge_samples.iter()) {
            nullify_offsets(profile, samples)?;
        }
        info!(
            samples = self.config.nullify_samples,
            "force offsets nullified"
        );
        Ok(())
    }

    // ==================== 操作员 ====================

    /// 面向操作员的错误提示，永远配对一条遥测事件
    pub(crate) fn prompt_operator(&mut self, message: &str) -> Result<Outcome, ApparatusError> {
        warn!(message, "operator prompt");
        let choice = self.operator.signal_error(message);
        let outcome = match choice {
            OperatorChoice::Abort => Outcome::Abort,
            OperatorChoice::Retry => Outcome::Retry,
            OperatorChoice::Ignore => Outcome::Ignore,
        };
        self.mark_event(EventKind::OperatorPrompt, outcome.code())?;
        debug!(?outcome, "operator decision");
        Ok(outcome)
    }

    // ==================== 输出 ====================

    /// 把定稿试次写成四个制表符分隔文件
    pub fn write_trial_files<P: AsRef<Path>>(&self, dir: P) -> Result<(), ApparatusError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let mut f = std::fs::File::create(dir.join("markers.txt"))?;
        dex_tools::write_marker_file(&mut f, &self.buffer.frames)?;

        let mut f = std::fs::File::create(dir.join("kinematics.txt"))?;
        dex_tools::write_kinematics_file(&mut f, &self.buffer.states)?;

        let mut f = std::fs::File::create(dir.join("analog.txt"))?;
        dex_tools::write_analog_file(&mut f, &self.buffer.analog)?;

        let times: Vec<f64> = self.buffer.analog.iter().map(|s| s.time).collect();
        let mut f = std::fs::File::create(dir.join("forces.txt"))?;
        dex_tools::write_forces_file(
            &mut f,
            &times,
            &self.buffer.force_torque,
            &self.buffer.cop,
            &self.buffer.grip,
            &self.buffer.load,
        )?;
        Ok(())
    }

    // ==================== 只读访问 ====================

    pub fn config(&self) -> &ApparatusConfig {
        &self.config
    }

    /// 最近一拍的操纵器状态
    pub fn manipulandum_state(&self) -> &ManipulandumState {
        &self.state
    }

    /// 最近一拍的抓握力
    pub fn grip_force(&self) -> f64 {
        self.grip
    }

    /// 最近一拍的负载力
    pub fn load_force(&self) -> Vector3<f64> {
        self.load
    }

    /// 最近一拍的压力中心
    pub fn cops(&self) -> &[CenterOfPressure] {
        &self.cop
    }

    pub fn trial_buffer(&self) -> &TrialBuffer {
        &self.buffer
    }

    /// 当前标定档（含置零后的偏置）
    pub fn calibrations(&self) -> &[CalibrationProfile] {
        &self.calibrations
    }

    /// 跟踪器单元的安装位姿
    pub fn tracker_placement(
        &self,
        unit: usize,
    ) -> Result<(Vector3<f64>, nalgebra::UnitQuaternion<f64>), ApparatusError> {
        Ok(self.tracker.unit_placement(unit)?)
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquiring
    }

    pub fn telemetry_issued(&self) -> u32 {
        self.telemetry.issued()
    }
}

/// 按通道映射抽取一只传感器的应变读数
fn extract_gauges(channels: &[f32], indices: &[usize]) -> Vec<f32> {
    indices
        .iter()
        .map(|&i| channels.get(i).copied().unwrap_or(0.0))
        .collect()
}
