//! 装置配置档
//!
//! 会话常量全部来自这里：标记布局、刚体模型、模拟量通道映射、
//! 传感器标定、流周期与缓冲容量。TOML 存取，结构与字段名即
//! 文件格式。

use std::path::Path;

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use dex_motion::CalibrationProfile;
use dex_motion::force::{GAUGES_PER_TRANSDUCER, GaugeMatrix};
use dex_protocol::{MAX_MARKERS, RigidBodyModel};

use crate::ApparatusError;

/// 装置配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApparatusConfig {
    /// 跟踪器标记数量
    pub n_markers: usize,
    /// ADC 通道数量
    pub n_channels: usize,
    /// 定稿标记/状态流周期（秒）
    pub frame_period: f64,
    /// 定稿模拟量流周期（秒）
    pub sample_period: f64,
    /// `update` 的最小拍间隔（秒），约束遥测量
    pub min_update_period: f64,
    /// 试次缓冲容量（帧）
    pub frame_capacity: usize,
    /// 试次缓冲容量（模拟量采样）
    pub sample_capacity: usize,
    /// 事件日志容量
    pub event_capacity: usize,
    /// 压力中心法向力阈值（牛）
    pub cop_threshold: f64,
    /// 偏置置零平均的采样数
    pub nullify_samples: usize,
    /// 目标闪烁半周期（秒）
    pub blink_period: f64,
    /// 刚体模型：`(marker_id, 体坐标偏移)`
    pub rigid_body: Vec<RigidBodyMarkerConfig>,
    /// 目标 LED 在工作空间中的位置（毫米）
    pub target_positions: Vec<[f64; 3]>,
    /// 力/力矩传感器
    pub transducers: Vec<TransducerConfig>,
    /// 抓握力反馈的 LED 子区间
    pub grip_leds: LedRangeConfig,
    /// 负载力反馈的 LED 子区间
    pub load_leds: LedRangeConfig,
}

/// 刚体模型中的一个标记
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigidBodyMarkerConfig {
    pub marker_id: usize,
    pub offset: [f64; 3],
}

/// 单只传感器的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransducerConfig {
    /// 该传感器占用的 ADC 通道下标（按应变计次序）
    pub channels: Vec<usize>,
    /// 应变通道零点偏置
    pub bias: Vec<f32>,
    /// 对齐旋转四元数 `[x, y, z, w]`
    pub align_rotation: [f64; 4],
    /// 标定矩阵（6 行 × 6 列）；省略时为单位矩阵
    #[serde(default)]
    pub gauge_matrix: Option<Vec<Vec<f64>>>,
}

/// 力 → LED 下标的线性映射区间
///
/// `led = first + clamp(floor((force − offset) · gain), 0, count−1)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LedRangeConfig {
    pub first: usize,
    pub count: usize,
    pub offset: f64,
    pub gain: f64,
}

impl LedRangeConfig {
    /// 把力值映射到区间内的 LED 下标
    pub fn led_for(&self, force: f64) -> usize {
        if self.count == 0 {
            return self.first;
        }
        let raw = ((force - self.offset) * self.gain).floor();
        let clamped = raw.clamp(0.0, (self.count - 1) as f64);
        self.first + clamped as usize
    }
}

impl Default for ApparatusConfig {
    fn default() -> Self {
        // 操纵器四标记构成 30mm 四面体
        let rigid_body = vec![
            RigidBodyMarkerConfig {
                marker_id: 0,
                offset: [0.0, 0.0, 0.0],
            },
            RigidBodyMarkerConfig {
                marker_id: 1,
                offset: [30.0, 0.0, 0.0],
            },
            RigidBodyMarkerConfig {
                marker_id: 2,
                offset: [0.0, 30.0, 0.0],
            },
            RigidBodyMarkerConfig {
                marker_id: 3,
                offset: [0.0, 0.0, 30.0],
            },
        ];

        // 垂直一列 10 个目标，间距 50mm
        let target_positions = (0..10).map(|i| [0.0, 50.0 * i as f64, 0.0]).collect();

        let transducer = |first_channel: usize| TransducerConfig {
            channels: (first_channel..first_channel + GAUGES_PER_TRANSDUCER).collect(),
            bias: vec![0.0; GAUGES_PER_TRANSDUCER],
            align_rotation: [0.0, 0.0, 0.0, 1.0],
            gauge_matrix: None,
        };

        Self {
            n_markers: 8,
            n_channels: 16,
            frame_period: 0.005,
            sample_period: 0.001,
            min_update_period: 0.001,
            frame_capacity: 40_000,
            sample_capacity: 200_000,
            event_capacity: 4_096,
            cop_threshold: 0.25,
            nullify_samples: 100,
            blink_period: 0.2,
            rigid_body,
            target_positions,
            transducers: vec![transducer(0), transducer(GAUGES_PER_TRANSDUCER)],
            grip_leds: LedRangeConfig {
                first: 0,
                count: 5,
                offset: 0.0,
                gain: 0.25,
            },
            load_leds: LedRangeConfig {
                first: 5,
                count: 5,
                offset: 0.0,
                gain: 0.25,
            },
        }
    }
}

impl ApparatusConfig {
    /// 从 TOML 文件加载
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ApparatusError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ApparatusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 保存为 TOML 文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ApparatusError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ApparatusError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// 配置一致性检查
    pub fn validate(&self) -> Result<(), ApparatusError> {
        if self.rigid_body.len() > MAX_MARKERS {
            return Err(ApparatusError::Config(format!(
                "rigid body has {} markers, maximum is {MAX_MARKERS}",
                self.rigid_body.len()
            )));
        }
        for marker in &self.rigid_body {
            if marker.marker_id >= self.n_markers {
                return Err(ApparatusError::Config(format!(
                    "rigid body references marker {} but only {} markers configured",
                    marker.marker_id, self.n_markers
                )));
            }
        }
        for (i, transducer) in self.transducers.iter().enumerate() {
            if transducer.channels.len() != transducer.bias.len() {
                return Err(ApparatusError::Config(format!(
                    "transducer {i}: {} channels but {} bias entries",
                    transducer.channels.len(),
                    transducer.bias.len()
                )));
            }
            for &channel in &transducer.channels {
                if channel >= self.n_channels {
                    return Err(ApparatusError::Config(format!(
                        "transducer {i} references channel {channel} but only {} channels configured",
                        self.n_channels
                    )));
                }
            }
            if let Some(matrix) = &transducer.gauge_matrix {
                if matrix.len() != GAUGES_PER_TRANSDUCER
                    || matrix.iter().any(|row| row.len() != GAUGES_PER_TRANSDUCER)
                {
                    return Err(ApparatusError::Config(format!(
                        "transducer {i}: gauge matrix must be {GAUGES_PER_TRANSDUCER}x{GAUGES_PER_TRANSDUCER}"
                    )));
                }
            }
        }
        if self.frame_period <= 0.0 || self.sample_period <= 0.0 {
            return Err(ApparatusError::Config(
                "stream periods must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// 构造刚体模型
    pub fn rigid_body_model(&self) -> RigidBodyModel {
        RigidBodyModel::from_pairs(
            &self
                .rigid_body
                .iter()
                .map(|m| (m.marker_id, Vector3::from(m.offset)))
                .collect::<Vec<_>>(),
        )
    }

    /// 构造各传感器的标定档
    pub fn calibration_profiles(&self) -> Result<Vec<CalibrationProfile>, ApparatusError> {
        self.transducers
            .iter()
            .map(|t| {
                let q = Quaternion::new(
                    t.align_rotation[3],
                    t.align_rotation[0],
                    t.align_rotation[1],
                    t.align_rotation[2],
                );
                let align_rotation = UnitQuaternion::try_new(q, 1e-9).ok_or_else(|| {
                    ApparatusError::Config("align_rotation quaternion has zero norm".to_string())
                })?;

                let gauge_matrix = match &t.gauge_matrix {
                    Some(rows) => {
                        let mut matrix = GaugeMatrix::zeros();
                        for (r, row) in rows.iter().enumerate() {
                            for (c, &value) in row.iter().enumerate() {
                                matrix[(r, c)] = value;
                            }
                        }
                        matrix
                    }
                    None => GaugeMatrix::identity(),
                };

                Ok(CalibrationProfile {
                    bias: t.bias.clone(),
                    align_rotation,
                    gauge_matrix,
                })
            })
            .collect()
    }

    /// 目标 LED 位置
    pub fn target_position(&self, target: usize) -> Result<Vector3<f64>, ApparatusError> {
        self.target_positions
            .get(target)
            .map(|&p| Vector3::from(p))
            .ok_or(ApparatusError::InvalidTarget(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ApparatusConfig::default();
        config.validate().unwrap();
        assert_eq!(config.transducers.len(), 2);
        assert_eq!(config.rigid_body.len(), 4);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ApparatusConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apparatus.toml");

        config.save_to_file(&path).unwrap();
        let loaded = ApparatusConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded.n_markers, config.n_markers);
        assert_eq!(loaded.frame_period, config.frame_period);
        assert_eq!(loaded.transducers.len(), config.transducers.len());
        assert_eq!(loaded.target_positions, config.target_positions);
    }

    #[test]
    fn test_validate_rejects_bad_channel() {
        let mut config = ApparatusConfig::default();
        config.transducers[0].channels[0] = 99;
        assert!(matches!(
            config.validate().unwrap_err(),
            ApparatusError::Config(_)
        ));
    }

    #[test]
    fn test_validate_rejects_bad_marker_id() {
        let mut config = ApparatusConfig::default();
        config.rigid_body[0].marker_id = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_led_mapping_clamps_to_range() {
        let range = LedRangeConfig {
            first: 5,
            count: 5,
            offset: 2.0,
            gain: 1.0,
        };
        assert_eq!(range.led_for(-10.0), 5); // 下夹
        assert_eq!(range.led_for(2.0), 5);
        assert_eq!(range.led_for(4.5), 7);
        assert_eq!(range.led_for(100.0), 9); // 上夹
    }

    #[test]
    fn test_calibration_profiles_from_config() {
        let mut config = ApparatusConfig::default();
        config.transducers[0].bias = vec![1.0; 6];
        config.transducers[0].gauge_matrix =
            Some((0..6).map(|r| (0..6).map(|c| if r == c { 2.0 } else { 0.0 }).collect()).collect());

        let profiles = config.calibration_profiles().unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].bias, vec![1.0; 6]);
        assert_eq!(profiles[0].gauge_matrix[(3, 3)], 2.0);
        assert_eq!(profiles[1].gauge_matrix[(3, 3)], 1.0);
    }

    #[test]
    fn test_target_position_bounds() {
        let config = ApparatusConfig::default();
        assert!(config.target_position(0).is_ok());
        assert!(matches!(
            config.target_position(99).unwrap_err(),
            ApparatusError::InvalidTarget(99)
        ));
    }
}
