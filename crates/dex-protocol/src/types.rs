//! 核心数据类型
//!
//! 标记帧、模拟采样与力/力矩派生量。全部类型在捕获后不可变，
//! 由装置层以 append-only 方式写入试次缓冲区。

use nalgebra::{UnitQuaternion, Vector3};

/// 刚体模型可携带的标记数量上限
pub const MAX_MARKERS: usize = 28;

/// 不可见标记位置的哨兵坐标
///
/// 重采样持位与文件输出均使用该值；它不是合法的工作空间坐标。
pub const INVISIBLE_COORD: f64 = -999_999.0;

// ==================== 标记数据 ====================

/// 单个标记的一次采样
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerSample {
    /// 本帧中该标记是否被跟踪器看到
    pub visible: bool,
    /// 标记位置（跟踪器坐标系，毫米）
    pub position: Vector3<f64>,
}

impl MarkerSample {
    /// 可见采样
    pub fn visible_at(position: Vector3<f64>) -> Self {
        Self {
            visible: true,
            position,
        }
    }

    /// 不可见采样（位置为哨兵值）
    pub fn invisible() -> Self {
        Self {
            visible: false,
            position: Vector3::repeat(INVISIBLE_COORD),
        }
    }
}

/// 一个时间戳下全部标记的快照
///
/// 标记数量在配置时固定，会话期间不变；`markers[i]` 的下标 `i`
/// 就是标记的稳定标识，绝不重新编号。
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerFrame {
    /// 采样时刻（秒，相对采集起点）
    pub time: f64,
    /// 全部标记采样，长度固定
    pub markers: Vec<MarkerSample>,
}

impl MarkerFrame {
    /// 构造全部标记不可见的帧
    pub fn all_invisible(time: f64, n_markers: usize) -> Self {
        Self {
            time,
            markers: vec![MarkerSample::invisible(); n_markers],
        }
    }

    /// 本帧可见标记数量
    pub fn visible_count(&self) -> usize {
        self.markers.iter().filter(|m| m.visible).count()
    }
}

/// 刚体模型：标记在刚体零位姿下的体坐标偏移
///
/// 会话常量。`marker_id` 引用 [`MarkerFrame::markers`] 的下标。
#[derive(Debug, Clone)]
pub struct RigidBodyModel {
    pub markers: Vec<RigidBodyMarker>,
}

/// 刚体模型中的单个标记
#[derive(Debug, Clone, Copy)]
pub struct RigidBodyMarker {
    /// 标记在跟踪器帧中的下标
    pub marker_id: usize,
    /// 零位姿下的体坐标偏移（毫米）
    pub body_frame_offset: Vector3<f64>,
}

impl RigidBodyModel {
    /// 由 `(marker_id, offset)` 对构造
    pub fn from_pairs(pairs: &[(usize, Vector3<f64>)]) -> Self {
        Self {
            markers: pairs
                .iter()
                .map(|&(marker_id, body_frame_offset)| RigidBodyMarker {
                    marker_id,
                    body_frame_offset,
                })
                .collect(),
        }
    }
}

/// 操纵器（manipulandum）每拍派生一次的刚体状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManipulandumState {
    /// 派生时刻（秒）
    pub time: f64,
    /// 刚体位置（毫米）
    pub position: Vector3<f64>,
    /// 刚体姿态
    pub orientation: UnitQuaternion<f64>,
    /// 本拍位姿是否可观测
    pub visible: bool,
}

impl ManipulandumState {
    /// 不可见状态（位置为哨兵值，姿态取上一已知值）
    pub fn invisible(time: f64, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            time,
            position: Vector3::repeat(INVISIBLE_COORD),
            orientation,
            visible: false,
        }
    }
}

// ==================== 模拟量数据 ====================

/// 一次 ADC 采样：全部通道的原始或标定后读数
///
/// 通道数量在配置时固定。
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogSample {
    /// 采样时刻（秒）
    pub time: f64,
    /// 各通道读数
    pub channels: Vec<f32>,
}

impl AnalogSample {
    pub fn zeroed(time: f64, n_channels: usize) -> Self {
        Self {
            time,
            channels: vec![0.0; n_channels],
        }
    }
}

// ==================== 力/力矩派生量 ====================

/// 单个力/力矩传感器的一拍派生量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceTorqueSample {
    /// 力（牛顿，传感器坐标系经对齐旋转）
    pub force: Vector3<f64>,
    /// 力矩（牛·毫米）
    pub torque: Vector3<f64>,
}

impl ForceTorqueSample {
    pub fn zero() -> Self {
        Self {
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
        }
    }
}

/// 压力中心
///
/// `distance < 0` 表示法向力不足、压力中心无定义。这是哨兵，
/// 不是合法幅值。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterOfPressure {
    /// 压力中心在传感器表面上的坐标（毫米）
    pub point: Vector3<f64>,
    /// 距传感器中心的距离；负值表示无定义
    pub distance: f64,
}

impl CenterOfPressure {
    /// 法向力不足时的哨兵值
    pub fn undefined() -> Self {
        Self {
            point: Vector3::zeros(),
            distance: -1.0,
        }
    }

    /// 压力中心是否有定义
    pub fn is_defined(&self) -> bool {
        self.distance >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invisible_marker_sample() {
        let sample = MarkerSample::invisible();
        assert!(!sample.visible);
        assert_eq!(sample.position.x, INVISIBLE_COORD);
        assert_eq!(sample.position.y, INVISIBLE_COORD);
        assert_eq!(sample.position.z, INVISIBLE_COORD);
    }

    #[test]
    fn test_marker_frame_visible_count() {
        let mut frame = MarkerFrame::all_invisible(0.0, 4);
        assert_eq!(frame.visible_count(), 0);

        frame.markers[1] = MarkerSample::visible_at(Vector3::new(1.0, 2.0, 3.0));
        frame.markers[3] = MarkerSample::visible_at(Vector3::zeros());
        assert_eq!(frame.visible_count(), 2);
    }

    #[test]
    fn test_rigid_body_model_from_pairs() {
        let model = RigidBodyModel::from_pairs(&[
            (0, Vector3::new(10.0, 0.0, 0.0)),
            (2, Vector3::new(0.0, 10.0, 0.0)),
        ]);
        assert_eq!(model.markers.len(), 2);
        assert_eq!(model.markers[1].marker_id, 2);
        assert_eq!(model.markers[1].body_frame_offset.y, 10.0);
    }

    #[test]
    fn test_cop_sentinel() {
        let cop = CenterOfPressure::undefined();
        assert!(!cop.is_defined());
        assert_eq!(cop.distance, -1.0);
        assert_eq!(cop.point, Vector3::zeros());
    }

    #[test]
    fn test_analog_sample_zeroed() {
        let sample = AnalogSample::zeroed(1.5, 16);
        assert_eq!(sample.time, 1.5);
        assert_eq!(sample.channels.len(), 16);
        assert!(sample.channels.iter().all(|&c| c == 0.0));
    }
}
