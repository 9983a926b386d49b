//! 刚体位姿解算
//!
//! 由可见标记子集和刚体模型恢复位置与姿态。
//!
//! # 算法
//!
//! 按可见标记数 N 分派：
//!
//! - N ≥ 4: 对模型偏移与实测位置分别去质心，解最小二乘旋转
//!   `best = (MᵗM)⁻¹(MᵗA)`，再正交归一化后转四元数
//! - N == 3: 由三点直接构造局部基（模型侧与实测侧各一），
//!   旋转 = 实测基 · 模型基ᵀ
//! - N ∈ {1, 2}: 姿态不可观测，取调用方提供的默认姿态
//! - N == 0: 位置不可观测，返回 [`MotionError::Unobservable`]
//!
//! 位置 = 可见标记上 `actual_i − R·model_i` 的均值。
//!
//! 近共线/共面的标记构型下最小二乘解的数值误差无界；与原始
//! 装置一致，这里不做回退或告警，仅在法方程矩阵完全不可逆时
//! 退回三点基构造。

use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use smallvec::SmallVec;

use dex_protocol::{MAX_MARKERS, MarkerFrame, RigidBodyModel};

use crate::MotionError;

/// 一次位姿解算结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// 刚体位置（毫米）
    pub position: Vector3<f64>,
    /// 刚体姿态
    pub orientation: UnitQuaternion<f64>,
}

/// 模型偏移与实测位置的配对
pub type MarkerPair = (Vector3<f64>, Vector3<f64>);

/// 收集一帧中刚体模型的可见 `(offset, measured)` 对
///
/// 模型引用帧外下标时按不可见处理。
pub fn visible_pairs(
    model: &RigidBodyModel,
    frame: &MarkerFrame,
) -> SmallVec<[MarkerPair; MAX_MARKERS]> {
    let mut pairs = SmallVec::new();
    for marker in &model.markers {
        if let Some(sample) = frame.markers.get(marker.marker_id)
            && sample.visible
        {
            pairs.push((marker.body_frame_offset, sample.position));
        }
    }
    pairs
}

/// 由可见配对解算刚体位姿
///
/// # 错误
///
/// - `MotionError::Unobservable`: 没有任何可见标记
pub fn estimate_pose(
    pairs: &[MarkerPair],
    default_orientation: Option<UnitQuaternion<f64>>,
) -> Result<Pose, MotionError> {
    let orientation = match pairs.len() {
        0 => return Err(MotionError::Unobservable),
        1 | 2 => default_orientation.unwrap_or_else(UnitQuaternion::identity),
        3 => triad_rotation(pairs),
        _ => least_squares_rotation(pairs)
            // 法方程不可逆（退化构型）时退回三点基构造
            .unwrap_or_else(|| triad_rotation(&pairs[..3])),
    };

    // 位置 = 各可见标记 (actual − R·model) 的均值
    let mut sum = Vector3::zeros();
    for (offset, measured) in pairs {
        sum += measured - orientation * offset;
    }
    let position = sum / pairs.len() as f64;

    Ok(Pose {
        position,
        orientation,
    })
}

/// N ≥ 4 的最小二乘旋转；法方程矩阵不可逆时返回 `None`
fn least_squares_rotation(pairs: &[MarkerPair]) -> Option<UnitQuaternion<f64>> {
    let n = pairs.len() as f64;

    let model_centroid: Vector3<f64> =
        pairs.iter().map(|(offset, _)| offset).sum::<Vector3<f64>>() / n;
    let actual_centroid: Vector3<f64> =
        pairs.iter().map(|(_, measured)| measured).sum::<Vector3<f64>>() / n;

    // 零均值增量的互协方差系统
    let mut mtm = Matrix3::zeros();
    let mut mta = Matrix3::zeros();
    for (offset, measured) in pairs {
        let dm = offset - model_centroid;
        let da = measured - actual_centroid;
        mtm += dm * dm.transpose();
        mta += dm * da.transpose();
    }

    let best = mtm.try_inverse()? * mta;

    // best 的行是模型基向量的像：行向量约定下 actual ≈ model · best
    let x = Vector3::new(best[(0, 0)], best[(0, 1)], best[(0, 2)]);
    let y = Vector3::new(best[(1, 0)], best[(1, 1)], best[(1, 2)]);

    Some(orthonormalize(x, y))
}

/// 三点基构造旋转
fn triad_rotation(pairs: &[MarkerPair]) -> UnitQuaternion<f64> {
    debug_assert_eq!(pairs.len(), 3);
    let model_basis = triad_basis(pairs[0].0, pairs[1].0, pairs[2].0);
    let actual_basis = triad_basis(pairs[0].1, pairs[1].1, pairs[2].1);

    let rotation = actual_basis * model_basis.transpose();
    UnitQuaternion::from_matrix(&rotation)
}

/// 由三点构造正交基（列向量为基轴）
fn triad_basis(p0: Vector3<f64>, p1: Vector3<f64>, p2: Vector3<f64>) -> Matrix3<f64> {
    let x = (p1 - p0).normalize();
    let z = x.cross(&(p2 - p0)).normalize();
    let y = z.cross(&x);
    Matrix3::from_columns(&[x, y, z])
}

/// 固定 X 轴的正交归一化，返回四元数
///
/// Z = X×Y, Y = Z×X，各轴归一化后组装旋转矩阵。
fn orthonormalize(x: Vector3<f64>, y: Vector3<f64>) -> UnitQuaternion<f64> {
    let x = x.normalize();
    let z = x.cross(&y).normalize();
    let y = z.cross(&x);
    let rotation = Matrix3::from_columns(&[x, y, z]);
    UnitQuaternion::from_matrix(&rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Unit;

    fn tetrahedron() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(30.0, 0.0, 0.0),
            Vector3::new(0.0, 30.0, 0.0),
            Vector3::new(0.0, 0.0, 30.0),
            Vector3::new(30.0, 30.0, 0.0),
        ]
    }

    fn transform_pairs(
        offsets: &[Vector3<f64>],
        rotation: &UnitQuaternion<f64>,
        translation: &Vector3<f64>,
    ) -> Vec<MarkerPair> {
        offsets
            .iter()
            .map(|&offset| (offset, rotation * offset + translation))
            .collect()
    }

    fn assert_pose_close(pose: &Pose, rotation: &UnitQuaternion<f64>, translation: &Vector3<f64>) {
        let angle = pose.orientation.angle_to(rotation);
        assert!(angle < 1e-9, "orientation error: {angle}");
        let err = (pose.position - translation).norm();
        assert!(err < 1e-9, "position error: {err}");
    }

    #[test]
    fn test_pose_roundtrip_full_set() {
        let rotation = UnitQuaternion::from_axis_angle(
            &Unit::new_normalize(Vector3::new(1.0, 2.0, -0.5)),
            0.75,
        );
        let translation = Vector3::new(120.0, -45.0, 300.0);
        let pairs = transform_pairs(&tetrahedron(), &rotation, &translation);

        let pose = estimate_pose(&pairs, None).unwrap();
        assert_pose_close(&pose, &rotation, &translation);
    }

    #[test]
    fn test_pose_roundtrip_every_subset_of_four() {
        let offsets = tetrahedron();
        let rotation = UnitQuaternion::from_axis_angle(
            &Unit::new_normalize(Vector3::new(0.0, 1.0, 1.0)),
            -1.2,
        );
        let translation = Vector3::new(-10.0, 5.0, 60.0);
        let pairs = transform_pairs(&offsets, &rotation, &translation);

        // 每个大小为 4 的非共线子集都应精确恢复
        for skip in 0..offsets.len() {
            let subset: Vec<MarkerPair> = pairs
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, &pair)| pair)
                .collect();
            let pose = estimate_pose(&subset, None).unwrap();
            assert_pose_close(&pose, &rotation, &translation);
        }
    }

    #[test]
    fn test_pose_three_markers_triad() {
        let offsets = &tetrahedron()[..3];
        let rotation = UnitQuaternion::from_axis_angle(
            &Unit::new_normalize(Vector3::new(0.3, -1.0, 0.2)),
            0.4,
        );
        let translation = Vector3::new(3.0, 4.0, 5.0);
        let pairs = transform_pairs(offsets, &rotation, &translation);

        let pose = estimate_pose(&pairs, None).unwrap();
        assert_pose_close(&pose, &rotation, &translation);
    }

    #[test]
    fn test_pose_two_markers_uses_default_orientation() {
        let default = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5);
        let offsets = [Vector3::new(10.0, 0.0, 0.0), Vector3::new(-10.0, 0.0, 0.0)];
        let translation = Vector3::new(1.0, 2.0, 3.0);
        let pairs: Vec<MarkerPair> = offsets
            .iter()
            .map(|&offset| (offset, default * offset + translation))
            .collect();

        let pose = estimate_pose(&pairs, Some(default)).unwrap();
        assert_pose_close(&pose, &default, &translation);
    }

    #[test]
    fn test_pose_one_marker_without_default_is_identity() {
        let pairs = [(Vector3::zeros(), Vector3::new(5.0, 6.0, 7.0))];
        let pose = estimate_pose(&pairs, None).unwrap();
        assert_eq!(pose.orientation, UnitQuaternion::identity());
        assert!((pose.position - Vector3::new(5.0, 6.0, 7.0)).norm() < 1e-12);
    }

    #[test]
    fn test_pose_unobservable() {
        let err = estimate_pose(&[], Some(UnitQuaternion::identity())).unwrap_err();
        assert!(matches!(err, MotionError::Unobservable));
    }

    #[test]
    fn test_orthonormalized_result_is_consistent() {
        // 带噪输入仍应得到单位正交的姿态
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.3);
        let translation = Vector3::new(0.0, 0.0, 100.0);
        let mut pairs = transform_pairs(&tetrahedron(), &rotation, &translation);
        for (i, pair) in pairs.iter_mut().enumerate() {
            pair.1 += Vector3::new(0.05, -0.03, 0.02) * (i as f64 - 2.0);
        }

        let pose = estimate_pose(&pairs, None).unwrap();
        let q = pose.orientation.quaternion();
        assert!((q.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_visible_pairs_skips_invisible() {
        use dex_protocol::{MarkerSample, RigidBodyModel};

        let model = RigidBodyModel::from_pairs(&[
            (0, Vector3::new(1.0, 0.0, 0.0)),
            (1, Vector3::new(0.0, 1.0, 0.0)),
            (5, Vector3::new(0.0, 0.0, 1.0)), // 帧外下标
        ]);
        let mut frame = MarkerFrame::all_invisible(0.0, 3);
        frame.markers[0] = MarkerSample::visible_at(Vector3::new(7.0, 8.0, 9.0));

        let pairs = visible_pairs(&model, &frame);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(pairs[0].1, Vector3::new(7.0, 8.0, 9.0));
    }
}
