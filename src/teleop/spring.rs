// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Virtual spring that pulls the stylus back to its drag anchor.
use nalgebra::Vector3;

/// Scales `force` down to `clamp` if its magnitude exceeds it. Negative clamps count as 0.
pub fn clamp_force(force: Vector3<f64>, clamp: f64) -> Vector3<f64> {
    let clamp = clamp.max(0.);
    let magnitude = force.norm();
    if magnitude > clamp {
        force * (clamp / magnitude)
    } else {
        force
    }
}

/// `stiffness * (anchor - current)`, limited to a magnitude of `clamp`.
pub fn spring_force(anchor: &[f64; 3], current: &[f64; 3], stiffness: f64, clamp: f64) -> [f64; 3] {
    let displacement = Vector3::from_column_slice(anchor) - Vector3::from_column_slice(current);
    let force = clamp_force(displacement * stiffness, clamp);
    [force.x, force.y, force.z]
}
