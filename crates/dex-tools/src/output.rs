//! 试次输出文件
//!
//! 全部为制表符分隔文本，首行列名，之后每行一条采样。浮点列
//! 固定六位小数；不可见标记写哨兵坐标与 `0` 可见位。

use std::io::Write;

use nalgebra::Vector3;

use dex_protocol::{
    AnalogSample, CenterOfPressure, ForceTorqueSample, ManipulandumState, MarkerFrame,
};

use crate::ToolsError;

/// 原始标记文件：`time` + 每标记 `visible x y z`
pub fn write_marker_file<W: Write>(w: &mut W, frames: &[MarkerFrame]) -> Result<(), ToolsError> {
    let n_markers = frames.first().map_or(0, |f| f.markers.len());

    write!(w, "time")?;
    for m in 0..n_markers {
        write!(w, "\tm{m}.visible\tm{m}.x\tm{m}.y\tm{m}.z")?;
    }
    writeln!(w)?;

    for frame in frames {
        write!(w, "{:.6}", frame.time)?;
        for marker in &frame.markers {
            write!(
                w,
                "\t{}\t{:.6}\t{:.6}\t{:.6}",
                u8::from(marker.visible),
                marker.position.x,
                marker.position.y,
                marker.position.z,
            )?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// 派生运动学文件：`time visible px py pz qx qy qz qw`
pub fn write_kinematics_file<W: Write>(
    w: &mut W,
    states: &[ManipulandumState],
) -> Result<(), ToolsError> {
    writeln!(w, "time\tvisible\tpx\tpy\tpz\tqx\tqy\tqz\tqw")?;
    for state in states {
        let q = state.orientation.quaternion();
        writeln!(
            w,
            "{:.6}\t{}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}",
            state.time,
            u8::from(state.visible),
            state.position.x,
            state.position.y,
            state.position.z,
            q.i,
            q.j,
            q.k,
            q.w,
        )?;
    }
    Ok(())
}

/// 原始模拟量文件：`time` + 各通道
pub fn write_analog_file<W: Write>(w: &mut W, samples: &[AnalogSample]) -> Result<(), ToolsError> {
    let n_channels = samples.first().map_or(0, |s| s.channels.len());

    write!(w, "time")?;
    for c in 0..n_channels {
        write!(w, "\tch{c}")?;
    }
    writeln!(w)?;

    for sample in samples {
        write!(w, "{:.6}", sample.time)?;
        for &value in &sample.channels {
            write!(w, "\t{value:.6}")?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// 派生力学文件
///
/// `time` + 每传感器 `fx fy fz tx ty tz copx copy copd` + `grip` +
/// `loadx loady loadz`。`transducers` 与 `cops` 外层按传感器。
///
/// # 错误
///
/// - `ToolsError::LengthMismatch`: 任一序列长度与 `times` 不一致
pub fn write_forces_file<W: Write>(
    w: &mut W,
    times: &[f64],
    transducers: &[Vec<ForceTorqueSample>],
    cops: &[Vec<CenterOfPressure>],
    grip: &[f64],
    load: &[Vector3<f64>],
) -> Result<(), ToolsError> {
    let n = times.len();
    for (name, actual) in [("grip", grip.len()), ("load", load.len())] {
        if actual != n {
            return Err(ToolsError::LengthMismatch {
                name,
                expected: n,
                actual,
            });
        }
    }
    for series in transducers {
        if series.len() != n {
            return Err(ToolsError::LengthMismatch {
                name: "transducer",
                expected: n,
                actual: series.len(),
            });
        }
    }
    for series in cops {
        if series.len() != n {
            return Err(ToolsError::LengthMismatch {
                name: "cop",
                expected: n,
                actual: series.len(),
            });
        }
    }

    write!(w, "time")?;
    for t in 0..transducers.len() {
        write!(
            w,
            "\tt{t}.fx\tt{t}.fy\tt{t}.fz\tt{t}.tx\tt{t}.ty\tt{t}.tz\tt{t}.copx\tt{t}.copy\tt{t}.copd"
        )?;
    }
    writeln!(w, "\tgrip\tloadx\tloady\tloadz")?;

    for i in 0..n {
        write!(w, "{:.6}", times[i])?;
        for (series, cop_series) in transducers.iter().zip(cops.iter()) {
            let ft = &series[i];
            let cop = &cop_series[i];
            write!(
                w,
                "\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}",
                ft.force.x,
                ft.force.y,
                ft.force.z,
                ft.torque.x,
                ft.torque.y,
                ft.torque.z,
                cop.point.x,
                cop.point.y,
                cop.distance,
            )?;
        }
        writeln!(
            w,
            "\t{:.6}\t{:.6}\t{:.6}\t{:.6}",
            grip[i], load[i].x, load[i].y, load[i].z
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dex_protocol::MarkerSample;
    use nalgebra::UnitQuaternion;
    use std::io::Read;

    #[test]
    fn test_marker_file_layout() {
        let mut frame = MarkerFrame::all_invisible(0.0, 2);
        frame.markers[0] = MarkerSample::visible_at(Vector3::new(1.0, 2.0, 3.0));

        let mut out = Vec::new();
        write_marker_file(&mut out, &[frame]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next().unwrap(),
            "time\tm0.visible\tm0.x\tm0.y\tm0.z\tm1.visible\tm1.x\tm1.y\tm1.z"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("0.000000\t1\t1.000000\t2.000000\t3.000000\t0\t"));
        assert!(row.contains("-999999.000000"));
    }

    #[test]
    fn test_kinematics_file_layout() {
        let state = ManipulandumState {
            time: 0.5,
            position: Vector3::new(10.0, 20.0, 30.0),
            orientation: UnitQuaternion::identity(),
            visible: true,
        };

        let mut out = Vec::new();
        write_kinematics_file(&mut out, &[state]).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("time\tvisible\tpx\tpy\tpz\tqx\tqy\tqz\tqw\n"));
        assert!(text.contains(
            "0.500000\t1\t10.000000\t20.000000\t30.000000\t0.000000\t0.000000\t0.000000\t1.000000"
        ));
    }

    #[test]
    fn test_analog_file_layout() {
        let samples = vec![
            AnalogSample {
                time: 0.0,
                channels: vec![0.5, -0.5],
            },
            AnalogSample {
                time: 0.001,
                channels: vec![0.25, 0.75],
            },
        ];

        let mut out = Vec::new();
        write_analog_file(&mut out, &samples).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "time\tch0\tch1");
        assert_eq!(lines[1], "0.000000\t0.500000\t-0.500000");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_forces_file_roundtrip_to_disk() {
        let times = vec![0.0, 0.001];
        let ft = ForceTorqueSample {
            force: Vector3::new(1.0, 0.0, 4.0),
            torque: Vector3::zeros(),
        };
        let transducers = vec![vec![ft; 2], vec![ft; 2]];
        let cops = vec![vec![CenterOfPressure::undefined(); 2]; 2];
        let grip = vec![4.0, 4.0];
        let load = vec![Vector3::new(2.0, 0.0, 8.0); 2];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forces.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        write_forces_file(&mut file, &times, &transducers, &cops, &grip, &load).unwrap();
        drop(file);

        let mut text = String::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("time\tt0.fx"));
        assert!(lines[0].ends_with("grip\tloadx\tloady\tloadz"));
        // COP 哨兵原样落盘
        assert!(lines[1].contains("\t-1.000000\t"));
    }

    #[test]
    fn test_forces_file_length_mismatch() {
        let mut out = Vec::new();
        let err = write_forces_file(
            &mut out,
            &[0.0, 0.001],
            &[],
            &[],
            &[4.0], // 长度不符
            &[Vector3::zeros(), Vector3::zeros()],
        )
        .unwrap_err();
        assert!(matches!(err, ToolsError::LengthMismatch { name: "grip", .. }));
    }

    #[test]
    fn test_empty_series_headers_only() {
        let mut out = Vec::new();
        write_marker_file(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "time\n");
    }
}
