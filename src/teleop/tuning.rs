// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Tuning scalars shared between the tick context and the control context.
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::ConfigStore;

/// An `f64` that can be shared without locking.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        AtomicF64(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }
}

/// Position and rotation gain applied to device deltas.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Scales {
    pub position: f64,
    pub rotation: f64,
}

/// Live tuning of one device.
#[derive(Debug)]
pub struct Tuning {
    pub position_scale: AtomicF64,
    pub rotation_scale: AtomicF64,
    pub spring_stiffness: AtomicF64,
}

impl Tuning {
    pub fn new(position_scale: f64, rotation_scale: f64, spring_stiffness: f64) -> Self {
        Tuning {
            position_scale: AtomicF64::new(position_scale),
            rotation_scale: AtomicF64::new(rotation_scale),
            spring_stiffness: AtomicF64::new(spring_stiffness),
        }
    }

    /// Reads the `<device>` section.
    pub fn from_config(config: &mut ConfigStore, device: &str) -> Self {
        Tuning::new(
            config.get_f64(&format!("{}.position_scale", device), 1000.),
            config.get_f64(&format!("{}.rotation_scale", device), 1.),
            config.get_f64(&format!("{}.spring_stiffness", device), 0.2),
        )
    }

    pub fn scales(&self) -> Scales {
        Scales {
            position: self.position_scale.load(),
            rotation: self.rotation_scale.load(),
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning::new(1000., 1., 0.2)
    }
}

#[cfg(test)]
mod tests {
    use super::{AtomicF64, Tuning};
    use crate::config::ConfigStore;

    #[test]
    fn atomic_f64_keeps_bits() {
        let value = AtomicF64::new(-0.1);
        assert_eq!(value.load(), -0.1);
        value.store(1e300);
        assert_eq!(value.load(), 1e300);
    }

    #[test]
    fn tuning_reads_device_section() {
        let mut config = ConfigStore::in_memory();
        config.set_f64("device2.position_scale", 500.);
        let tuning = Tuning::from_config(&mut config, "device2");
        assert_eq!(tuning.scales().position, 500.);
        assert_eq!(tuning.scales().rotation, 1.);
        assert_eq!(tuning.spring_stiffness.load(), 0.2);
        assert!(config.has_key("device2.spring_stiffness"));
    }
}
