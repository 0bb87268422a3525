// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! contains pose types of the haptic device and conversion functions.
use nalgebra::{Matrix3, Matrix4};

/// Below this value of cos(pitch) the rotation is treated as gimbal locked.
const GIMBAL_LOCK_THRESHOLD: f64 = 1e-4;

/// converts the rotational part of a 4x4 column-major homogeneous matrix to a Matrix3
pub fn array_to_rotation(array: &[f64; 16]) -> Matrix3<f64> {
    Matrix4::from_column_slice(array)
        .remove_column(3)
        .remove_row(3)
}

/// Roll, pitch and yaw in degrees, following the Z-Y-X convention.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct EulerAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl EulerAngles {
    /// returns `[roll, pitch, yaw]`
    pub fn as_array(&self) -> [f64; 3] {
        [self.roll, self.pitch, self.yaw]
    }
}

/// Extracts roll, pitch and yaw (degrees) from a column-major homogeneous transform.
///
/// The function is total. Near gimbal lock (|cos(pitch)| below 1e-4) yaw is pinned to 0
/// and the whole remaining rotation is expressed as roll.
pub fn extract_euler_angles(transform: &[f64; 16]) -> EulerAngles {
    let r = array_to_rotation(transform);
    let pitch = (-r[(2, 0)]).max(-1.).min(1.).asin();
    let (roll, yaw) = if pitch.cos() > GIMBAL_LOCK_THRESHOLD {
        (r[(2, 1)].atan2(r[(2, 2)]), r[(1, 0)].atan2(r[(0, 0)]))
    } else {
        ((-r[(1, 2)]).atan2(r[(1, 1)]), 0.)
    };
    EulerAngles {
        roll: roll.to_degrees(),
        pitch: pitch.to_degrees(),
        yaw: yaw.to_degrees(),
    }
}

/// A single pose sample of a haptic stylus.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Pose3 {
    /// position in device units (device frame)
    pub position: [f64; 3],
    /// orientation in degrees
    pub euler: EulerAngles,
}

impl Pose3 {
    pub fn new(position: [f64; 3], transform: &[f64; 16]) -> Self {
        Pose3 {
            position,
            euler: extract_euler_angles(transform),
        }
    }
}

#[cfg(test)]
pub(crate) fn rotation_to_array(rotation: &nalgebra::Rotation3<f64>) -> [f64; 16] {
    let mut array = [0.; 16];
    array.copy_from_slice(rotation.to_homogeneous().as_slice());
    array
}

#[cfg(test)]
mod tests {
    use super::{extract_euler_angles, rotation_to_array, EulerAngles, Pose3};
    use nalgebra::{Rotation3, Vector3};
    use std::f64::consts::FRAC_PI_2;

    const IDENTITY: [f64; 16] = [
        1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1.,
    ];

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "{} != {}",
            actual,
            expected
        );
    }

    #[test]
    fn identity_has_zero_angles() {
        let euler = extract_euler_angles(&IDENTITY);
        assert_close(euler.roll, 0.);
        assert_close(euler.pitch, 0.);
        assert_close(euler.yaw, 0.);
    }

    #[test]
    fn single_axis_rotations() {
        let roll = extract_euler_angles(&rotation_to_array(&Rotation3::from_axis_angle(
            &Vector3::x_axis(),
            FRAC_PI_2,
        )));
        assert_close(roll.roll, 90.);
        assert_close(roll.pitch, 0.);
        assert_close(roll.yaw, 0.);

        let yaw = extract_euler_angles(&rotation_to_array(&Rotation3::from_axis_angle(
            &Vector3::z_axis(),
            FRAC_PI_2,
        )));
        assert_close(yaw.roll, 0.);
        assert_close(yaw.pitch, 0.);
        assert_close(yaw.yaw, 90.);

        let pitch = extract_euler_angles(&rotation_to_array(&Rotation3::from_axis_angle(
            &Vector3::y_axis(),
            0.5,
        )));
        assert_close(pitch.roll, 0.);
        assert_close(pitch.pitch, 0.5_f64.to_degrees());
        assert_close(pitch.yaw, 0.);
    }

    #[test]
    fn gimbal_lock_pins_yaw() {
        let locked = extract_euler_angles(&rotation_to_array(&Rotation3::from_axis_angle(
            &Vector3::y_axis(),
            FRAC_PI_2,
        )));
        assert_close(locked.pitch, 90.);
        assert_eq!(locked.yaw, 0.);
        assert_close(locked.roll, 0.);
    }

    #[test]
    fn combined_rotation_roundtrips_through_euler() {
        let rotation = Rotation3::from_euler_angles(0.3, -0.4, 1.1);
        let euler = extract_euler_angles(&rotation_to_array(&rotation));
        assert_close(euler.roll, 0.3_f64.to_degrees());
        assert_close(euler.pitch, (-0.4_f64).to_degrees());
        assert_close(euler.yaw, 1.1_f64.to_degrees());
    }

    #[test]
    fn pose_keeps_position() {
        let pose = Pose3::new([1., 2., 3.], &IDENTITY);
        assert_eq!(pose.position, [1., 2., 3.]);
        assert_eq!(pose.euler, EulerAngles::default());
    }
}
