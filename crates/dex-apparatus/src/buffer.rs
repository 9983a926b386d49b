//! 试次缓冲区
//!
//! 一个试次的全部数组都集中在这里，采集期间由控制器独占写入，
//! `stop_acquisition` 定稿后只读交给事后校验。容量在构造时由
//! 配置固定（arena 风格），没有任何全局常量数组。

use nalgebra::Vector3;

use dex_protocol::{
    AnalogSample, CenterOfPressure, ForceTorqueSample, ManipulandumState, MarkerFrame,
};

use crate::events::TrialEventLog;

/// 一个试次的全部缓冲
#[derive(Debug)]
pub struct TrialBuffer {
    // ---- 采集期（轮询节奏，时间不规则）----
    /// 轮询到的标记帧
    pub polled_frames: Vec<MarkerFrame>,
    /// 逐拍派生的操纵器状态
    pub polled_states: Vec<ManipulandumState>,
    /// 轮询到的模拟量采样
    pub polled_analog: Vec<AnalogSample>,

    // ---- 定稿（固定周期，stop_acquisition 之后）----
    /// 重采样后的标记帧
    pub frames: Vec<MarkerFrame>,
    /// 固定周期上的操纵器状态
    pub states: Vec<ManipulandumState>,
    /// 重采样后的模拟量
    pub analog: Vec<AnalogSample>,
    /// 每传感器的力/力矩序列（与 `analog` 同栅格）
    pub force_torque: Vec<Vec<ForceTorqueSample>>,
    /// 每传感器的压力中心序列
    pub cop: Vec<Vec<CenterOfPressure>>,
    /// 抓握力序列
    pub grip: Vec<f64>,
    /// 负载力序列
    pub load: Vec<Vector3<f64>>,

    /// 事件日志
    pub events: TrialEventLog,

    frame_capacity: usize,
    sample_capacity: usize,
    overrun: bool,
}

impl TrialBuffer {
    pub fn new(
        frame_capacity: usize,
        sample_capacity: usize,
        event_capacity: usize,
        frame_period: f64,
        sample_period: f64,
        n_transducers: usize,
    ) -> Self {
        Self {
            polled_frames: Vec::new(),
            polled_states: Vec::new(),
            polled_analog: Vec::new(),
            frames: Vec::new(),
            states: Vec::new(),
            analog: Vec::new(),
            force_torque: vec![Vec::new(); n_transducers],
            cop: vec![Vec::new(); n_transducers],
            grip: Vec::new(),
            load: Vec::new(),
            events: TrialEventLog::new(event_capacity, frame_period, sample_period),
            frame_capacity,
            sample_capacity,
            overrun: false,
        }
    }

    /// `start_acquisition` 清空所有序列与事件
    pub fn clear(&mut self) {
        self.polled_frames.clear();
        self.polled_states.clear();
        self.polled_analog.clear();
        self.frames.clear();
        self.states.clear();
        self.analog.clear();
        for series in &mut self.force_torque {
            series.clear();
        }
        for series in &mut self.cop {
            series.clear();
        }
        self.grip.clear();
        self.load.clear();
        self.events.clear();
        self.overrun = false;
    }

    /// 追加一拍轮询数据；缓冲写满时置位 overrun 并丢弃
    pub fn append_polled(
        &mut self,
        frame: MarkerFrame,
        state: ManipulandumState,
        sample: AnalogSample,
    ) {
        if self.polled_frames.len() < self.frame_capacity {
            self.polled_frames.push(frame);
            self.polled_states.push(state);
        } else {
            self.overrun = true;
        }
        if self.polled_analog.len() < self.sample_capacity {
            self.polled_analog.push(sample);
        } else {
            self.overrun = true;
        }
    }

    /// 装置侧缓冲是否在采集期间写满
    pub fn overrun(&self) -> bool {
        self.overrun
    }

    /// 定稿后的帧数
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// 定稿后的模拟量采样数
    pub fn sample_count(&self) -> usize {
        self.analog.len()
    }
}
