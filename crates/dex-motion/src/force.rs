//! 力/力矩派生管线
//!
//! 把标定后的原始应变通道转换为力、力矩、压力中心、抓握力与
//! 负载力。两只传感器夹持操纵器两侧，z 轴为抓握轴，法向相对。

use nalgebra::{SMatrix, UnitQuaternion, Vector3};

use dex_protocol::{CenterOfPressure, ForceTorqueSample};

use crate::MotionError;

/// 每只传感器的应变计通道数
pub const GAUGES_PER_TRANSDUCER: usize = 6;

/// 应变计 → 力/力矩 的标定矩阵
pub type GaugeMatrix = SMatrix<f64, 6, 6>;

/// 单只传感器的标定档
///
/// 仅 `nullify_offsets` 可变更偏置；试次运行期间只读。
#[derive(Debug, Clone)]
pub struct CalibrationProfile {
    /// 各应变通道的零点偏置
    pub bias: Vec<f32>,
    /// 传感器坐标系到装置坐标系的对齐旋转
    pub align_rotation: UnitQuaternion<f64>,
    /// 厂商标定矩阵（应变 → [Fx Fy Fz Tx Ty Tz]）
    pub gauge_matrix: GaugeMatrix,
}

impl CalibrationProfile {
    /// 单位标定矩阵、零偏置、无对齐旋转
    pub fn identity() -> Self {
        Self {
            bias: vec![0.0; GAUGES_PER_TRANSDUCER],
            align_rotation: UnitQuaternion::identity(),
            gauge_matrix: GaugeMatrix::identity(),
        }
    }
}

/// 原始应变通道 → 力/力矩
///
/// 减去偏置，经标定矩阵映射，再按对齐旋转转到装置坐标系。
///
/// # 错误
///
/// - `MotionError::ChannelMismatch`: 输入通道数与标定档不符
pub fn apply_calibration(
    raw_channels: &[f32],
    profile: &CalibrationProfile,
) -> Result<ForceTorqueSample, MotionError> {
    if raw_channels.len() != profile.bias.len() {
        return Err(MotionError::ChannelMismatch {
            expected: profile.bias.len(),
            actual: raw_channels.len(),
        });
    }

    let mut debiased = SMatrix::<f64, 6, 1>::zeros();
    for (i, (&raw, &bias)) in raw_channels.iter().zip(profile.bias.iter()).enumerate() {
        debiased[i] = f64::from(raw - bias);
    }

    let mapped = profile.gauge_matrix * debiased;
    let force = Vector3::new(mapped[0], mapped[1], mapped[2]);
    let torque = Vector3::new(mapped[3], mapped[4], mapped[5]);

    Ok(ForceTorqueSample {
        force: profile.align_rotation * force,
        torque: profile.align_rotation * torque,
    })
}

/// 压力中心
///
/// 法向力幅值不足 `threshold` 时压力中心无定义，返回哨兵
/// （`distance == -1`）。
pub fn compute_cop(ft: &ForceTorqueSample, threshold: f64) -> CenterOfPressure {
    if ft.force.z.abs() > threshold {
        let x = -ft.torque.y / ft.force.z;
        let y = -ft.torque.x / ft.force.z;
        let point = Vector3::new(x, y, 0.0);
        CenterOfPressure {
            point,
            distance: (x * x + y * y).sqrt(),
        }
    } else {
        CenterOfPressure::undefined()
    }
}

/// 抓握力：两只传感器法向力之差的一半
///
/// 两传感器法向相对安装，因此作差而非求和。
pub fn grip_force(ft0: &ForceTorqueSample, ft1: &ForceTorqueSample) -> f64 {
    (ft0.force.z - ft1.force.z) / 2.0
}

/// 负载力：两只传感器受力的矢量和
pub fn load_force(ft0: &ForceTorqueSample, ft1: &ForceTorqueSample) -> Vector3<f64> {
    ft0.force + ft1.force
}

/// 平面负载力：去掉抓握轴分量后的负载力幅值
pub fn planar_load_force(ft0: &ForceTorqueSample, ft1: &ForceTorqueSample) -> f64 {
    let mut load = load_force(ft0, ft1);
    load.z = 0.0;
    load.norm()
}

/// 偏置置零：把给定应变采样的逐通道均值存为新的偏置
///
/// 每次归零步骤调用一次，绝不逐拍调用。
///
/// # 错误
///
/// - `MotionError::NoSamples`: 没有采样可平均
/// - `MotionError::ChannelMismatch`: 任一采样的通道数与标定档不符
pub fn nullify_offsets(
    profile: &mut CalibrationProfile,
    gauge_samples: &[Vec<f32>],
) -> Result<(), MotionError> {
    if gauge_samples.is_empty() {
        return Err(MotionError::NoSamples);
    }
    let n_gauges = profile.bias.len();
    for sample in gauge_samples {
        if sample.len() != n_gauges {
            return Err(MotionError::ChannelMismatch {
                expected: n_gauges,
                actual: sample.len(),
            });
        }
    }

    for gauge in 0..n_gauges {
        let sum: f32 = gauge_samples.iter().map(|sample| sample[gauge]).sum();
        profile.bias[gauge] = sum / gauge_samples.len() as f32;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_calibration_identity() {
        let profile = CalibrationProfile::identity();
        let ft = apply_calibration(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &profile).unwrap();
        assert_eq!(ft.force, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(ft.torque, Vector3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_apply_calibration_bias_and_rotation() {
        let mut profile = CalibrationProfile::identity();
        profile.bias = vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        // 绕 z 轴 90°：x → y
        profile.align_rotation =
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);

        let ft = apply_calibration(&[2.0, 1.0, 1.0, 0.0, 0.0, 0.0], &profile).unwrap();
        assert!((ft.force - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_apply_calibration_channel_mismatch() {
        let profile = CalibrationProfile::identity();
        let err = apply_calibration(&[1.0, 2.0], &profile).unwrap_err();
        match err {
            MotionError::ChannelMismatch { expected, actual } => {
                assert_eq!(expected, 6);
                assert_eq!(actual, 2);
            }
            other => panic!("Expected ChannelMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_cop_sentinel_below_threshold() {
        // |fz| ≤ threshold 时必须返回哨兵，对所有阈值 ≥ 0 成立
        for threshold in [0.0, 0.25, 1.0, 10.0] {
            let ft = ForceTorqueSample {
                force: Vector3::new(5.0, 5.0, threshold),
                torque: Vector3::new(100.0, 100.0, 100.0),
            };
            let cop = compute_cop(&ft, threshold);
            assert_eq!(cop.distance, -1.0);
            assert_eq!(cop.point, Vector3::zeros());
            assert!(!cop.is_defined());
        }
    }

    #[test]
    fn test_cop_geometry() {
        let ft = ForceTorqueSample {
            force: Vector3::new(0.0, 0.0, 2.0),
            torque: Vector3::new(4.0, -6.0, 0.0),
        };
        let cop = compute_cop(&ft, 0.5);
        // x = -ty/fz = 3, y = -tx/fz = -2
        assert!((cop.point.x - 3.0).abs() < 1e-12);
        assert!((cop.point.y - -2.0).abs() < 1e-12);
        assert_eq!(cop.point.z, 0.0);
        assert!((cop.distance - 13.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_grip_and_load() {
        let ft0 = ForceTorqueSample {
            force: Vector3::new(1.0, 0.0, 5.0),
            torque: Vector3::zeros(),
        };
        let ft1 = ForceTorqueSample {
            force: Vector3::new(0.0, 2.0, -4.0),
            torque: Vector3::zeros(),
        };

        assert!((grip_force(&ft0, &ft1) - 4.5).abs() < 1e-12);
        assert_eq!(load_force(&ft0, &ft1), Vector3::new(1.0, 2.0, 1.0));
        assert!((planar_load_force(&ft0, &ft1) - 5.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_nullify_offsets_averages_samples() {
        let mut profile = CalibrationProfile::identity();
        let samples = vec![
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            vec![3.0, 2.0, 1.0, 0.0, -1.0, -2.0],
        ];
        nullify_offsets(&mut profile, &samples).unwrap();
        assert_eq!(profile.bias, vec![2.0, 2.0, 2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_nullify_offsets_requires_samples() {
        let mut profile = CalibrationProfile::identity();
        assert!(matches!(
            nullify_offsets(&mut profile, &[]).unwrap_err(),
            MotionError::NoSamples
        ));
    }
}
