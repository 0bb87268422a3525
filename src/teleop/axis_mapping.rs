// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Relabels and flips device axes into arm axes.
use std::f64::consts::PI;
use std::fmt;

use log::warn;

use crate::config::ConfigStore;
use crate::exception::{TeleopException, TeleopResult};

/// `out[k] = signs[k] * delta[axis_select[k]]`. Indices are not checked here; an
/// [`AxisMap`] validates them when it is built.
pub fn project(delta: &[f64; 3], axis_select: &[usize; 3], signs: &[i32; 3]) -> [f64; 3] {
    let mut out = [0.; 3];
    for k in 0..3 {
        out[k] = signs[k] as f64 * delta[axis_select[k]];
    }
    out
}

/// Returns the selection and signs that undo [`project`] with `axis_select` and `signs`.
pub fn inverse_projection(axis_select: &[usize; 3], signs: &[i32; 3]) -> ([usize; 3], [i32; 3]) {
    let mut inverse = [0; 3];
    let mut inverse_signs = [1; 3];
    for (k, &source) in axis_select.iter().enumerate() {
        inverse[source] = k;
        inverse_signs[source] = signs[k];
    }
    (inverse, inverse_signs)
}

const POSITION_KEYS: [&str; 3] = [
    "touch_pos_to_arm_x",
    "touch_pos_to_arm_y",
    "touch_pos_to_arm_z",
];
const ROTATION_KEYS: [&str; 3] = [
    "touch_rot_to_arm_rx",
    "touch_rot_to_arm_ry",
    "touch_rot_to_arm_rz",
];
const POSITION_SIGN_KEYS: [&str; 3] = ["arm_x_sign", "arm_y_sign", "arm_z_sign"];
const ROTATION_SIGN_KEYS: [&str; 3] = ["arm_rx_sign", "arm_ry_sign", "arm_rz_sign"];

/// Per-device mapping from device axes to arm axes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AxisMap {
    /// device position axis feeding arm x, y, z
    pub position: [usize; 3],
    /// device rotation axis feeding arm rx, ry, rz
    pub rotation: [usize; 3],
    pub position_signs: [i32; 3],
    pub rotation_signs: [i32; 3],
}

impl Default for AxisMap {
    fn default() -> Self {
        AxisMap {
            position: [2, 0, 1],
            rotation: [2, 0, 1],
            position_signs: [1, 1, 1],
            rotation_signs: [-1, -1, 1],
        }
    }
}

fn check_indices(key: &str, indices: &[usize; 3]) -> TeleopResult<()> {
    if let Some(index) = indices.iter().find(|&&index| index > 2) {
        return Err(TeleopException::ConfigInvalid {
            key: key.to_string(),
            message: format!("axis index {} is outside of 0..=2", index),
        });
    }
    Ok(())
}

fn check_signs(key: &str, signs: &[i32; 3]) -> TeleopResult<()> {
    if let Some(sign) = signs.iter().find(|&&sign| sign != 1 && sign != -1) {
        return Err(TeleopException::ConfigInvalid {
            key: key.to_string(),
            message: format!("sign {} is neither 1 nor -1", sign),
        });
    }
    Ok(())
}

fn is_permutation(indices: &[usize; 3]) -> bool {
    let mut seen = [false; 3];
    indices.iter().all(|&index| !std::mem::replace(&mut seen[index], true))
}

impl AxisMap {
    /// Builds a map, rejecting indices outside of 0..=2 and signs other than ±1.
    pub fn new(
        position: [usize; 3],
        rotation: [usize; 3],
        position_signs: [i32; 3],
        rotation_signs: [i32; 3],
    ) -> TeleopResult<AxisMap> {
        check_indices("position", &position)?;
        check_indices("rotation", &rotation)?;
        check_signs("position_signs", &position_signs)?;
        check_signs("rotation_signs", &rotation_signs)?;
        Ok(AxisMap {
            position,
            rotation,
            position_signs,
            rotation_signs,
        })
    }

    /// Loads the map of `device` from the `<device>_mapping` section.
    ///
    /// # Errors
    /// * [`ConfigInvalid`](`TeleopException::ConfigInvalid`) if an index or sign is out of
    ///   range.
    pub fn load(config: &mut ConfigStore, device: &str) -> TeleopResult<AxisMap> {
        let defaults = AxisMap::default();
        let section = format!("{}_mapping", device);
        let mut read = |keys: &[&str; 3], defaults: [i64; 3]| -> [i64; 3] {
            let mut values = [0; 3];
            for k in 0..3 {
                values[k] = config.get_i64(&format!("{}.{}", section, keys[k]), defaults[k]);
            }
            values
        };
        let to_index = |key: &str, values: [i64; 3]| -> TeleopResult<[usize; 3]> {
            let mut indices = [0; 3];
            for k in 0..3 {
                if !(0..=2).contains(&values[k]) {
                    return Err(TeleopException::ConfigInvalid {
                        key: format!("{}.{}", section, key),
                        message: format!("axis index {} is outside of 0..=2", values[k]),
                    });
                }
                indices[k] = values[k] as usize;
            }
            Ok(indices)
        };
        let position = read(&POSITION_KEYS, to_i64(&defaults.position));
        let rotation = read(&ROTATION_KEYS, to_i64(&defaults.rotation));
        let position_signs = read(&POSITION_SIGN_KEYS, widen(&defaults.position_signs));
        let rotation_signs = read(&ROTATION_SIGN_KEYS, widen(&defaults.rotation_signs));

        let map = AxisMap::new(
            to_index("touch_pos_to_arm_*", position)?,
            to_index("touch_rot_to_arm_*", rotation)?,
            narrow(&position_signs),
            narrow(&rotation_signs),
        )
        .map_err(|e| match e {
            TeleopException::ConfigInvalid { key, message } => TeleopException::ConfigInvalid {
                key: format!("{}.{}", section, key),
                message,
            },
            other => other,
        })?;
        if !is_permutation(&map.position) || !is_permutation(&map.rotation) {
            warn!(
                "[{}] axis mapping repeats an axis, some arm axes follow the same device axis",
                device
            );
        }
        Ok(map)
    }

    /// Writes the map into the `<device>_mapping` section.
    pub fn store(&self, config: &mut ConfigStore, device: &str) {
        let section = format!("{}_mapping", device);
        for k in 0..3 {
            config.set_i64(&format!("{}.{}", section, POSITION_KEYS[k]), self.position[k] as i64);
            config.set_i64(&format!("{}.{}", section, ROTATION_KEYS[k]), self.rotation[k] as i64);
            config.set_i64(
                &format!("{}.{}", section, POSITION_SIGN_KEYS[k]),
                self.position_signs[k] as i64,
            );
            config.set_i64(
                &format!("{}.{}", section, ROTATION_SIGN_KEYS[k]),
                self.rotation_signs[k] as i64,
            );
        }
    }

    /// Maps a device position delta into arm units.
    pub fn map_position(&self, delta: &[f64; 3], scale: f64) -> [f64; 3] {
        let mut mapped = project(delta, &self.position, &self.position_signs);
        mapped.iter_mut().for_each(|value| *value *= scale);
        mapped
    }

    /// Maps a device rotation delta in degrees into arm milliradians.
    pub fn map_rotation(&self, delta_degrees: &[f64; 3], scale: f64) -> [f64; 3] {
        let mut mapped = project(delta_degrees, &self.rotation, &self.rotation_signs);
        mapped
            .iter_mut()
            .for_each(|value| *value *= scale * PI / 180. * 1000.);
        mapped
    }
}

fn to_i64(indices: &[usize; 3]) -> [i64; 3] {
    [indices[0] as i64, indices[1] as i64, indices[2] as i64]
}

fn widen(signs: &[i32; 3]) -> [i64; 3] {
    [signs[0] as i64, signs[1] as i64, signs[2] as i64]
}

fn narrow(signs: &[i64; 3]) -> [i32; 3] {
    let clamp = |value: i64| value.max(i32::MIN as i64).min(i32::MAX as i64) as i32;
    [clamp(signs[0]), clamp(signs[1]), clamp(signs[2])]
}

const AXIS_NAMES: [&str; 3] = ["x", "y", "z"];

impl fmt::Display for AxisMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for k in 0..3 {
            writeln!(
                f,
                "arm {}  <- {}device {}",
                AXIS_NAMES[k],
                if self.position_signs[k] < 0 { "-" } else { "+" },
                AXIS_NAMES[self.position[k]]
            )?;
        }
        for k in 0..3 {
            writeln!(
                f,
                "arm r{} <- {}device r{}",
                AXIS_NAMES[k],
                if self.rotation_signs[k] < 0 { "-" } else { "+" },
                AXIS_NAMES[self.rotation[k]]
            )?;
        }
        Ok(())
    }
}
