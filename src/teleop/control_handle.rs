// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Operations of the control context: tuning, queries and configuration of one device.
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use log::{info, warn};

use crate::arm::types::{ArmPose, TeachFrame};
use crate::arm::ArmLink;
use crate::config::SharedConfig;
use crate::exception::{TeleopException, TeleopResult};
use crate::network::{Network, Transport};
use crate::teleop::axis_mapping::AxisMap;
use crate::teleop::control_loop::DragStatus;
use crate::teleop::drag_session::DragAnchor;
use crate::teleop::lock;
use crate::teleop::tuning::Tuning;

/// Step of one position scale adjustment.
pub const POSITION_SCALE_STEP: f64 = 100.;
/// Step of one rotation scale adjustment.
pub const ROTATION_SCALE_STEP: f64 = 0.1;
/// Factor applied when softening the spring.
pub const STIFFNESS_DECREASE: f64 = 0.9;
/// Factor applied when stiffening the spring.
pub const STIFFNESS_INCREASE: f64 = 1.1;

/// Moves `value` by `steps` on the grid of `step`, so repeated steps do not accumulate
/// rounding error.
fn stepped(value: f64, steps: i32, step: f64) -> f64 {
    ((value / step).round() + steps as f64) * step
}

/// Changes handed to the tick context.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    SetAxisMap(AxisMap),
}

/// Snapshot reported by [`ControlHandle::query_arm_state`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ArmStatus {
    pub pose: ArmPose,
    pub dragging: bool,
    pub anchor: Option<DragAnchor>,
}

/// Controls a running [`ControlLoop`](crate::teleop::control_loop::ControlLoop) from another
/// thread.
pub struct ControlHandle<T: Transport = Network> {
    name: String,
    link: Arc<Mutex<ArmLink<T>>>,
    config: SharedConfig,
    tuning: Arc<Tuning>,
    status: Arc<DragStatus>,
    requests: Sender<ControlRequest>,
    axis_map: AxisMap,
    teach_frame: TeachFrame,
}

impl<T: Transport> ControlHandle<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: &str,
        link: Arc<Mutex<ArmLink<T>>>,
        config: SharedConfig,
        tuning: Arc<Tuning>,
        status: Arc<DragStatus>,
        requests: Sender<ControlRequest>,
        axis_map: AxisMap,
        teach_frame: TeachFrame,
    ) -> Self {
        ControlHandle {
            name: name.to_string(),
            link,
            config,
            tuning,
            status,
            requests,
            axis_map,
            teach_frame,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.link).is_connected()
    }

    pub fn is_dragging(&self) -> bool {
        self.status.is_dragging()
    }

    pub fn drag_anchor(&self) -> Option<DragAnchor> {
        self.status.anchor()
    }

    pub fn position_scale(&self) -> f64 {
        self.tuning.position_scale.load()
    }

    pub fn rotation_scale(&self) -> f64 {
        self.tuning.rotation_scale.load()
    }

    pub fn spring_stiffness(&self) -> f64 {
        self.tuning.spring_stiffness.load()
    }

    fn persist_f64(&self, key: &str, value: f64) {
        lock(&self.config).set_f64(&format!("{}.{}", self.name, key), value);
    }

    /// Sets the position scale. Only positive values are accepted.
    pub fn set_position_scale(&self, scale: f64) -> TeleopResult<f64> {
        if !(scale > 0. && scale.is_finite()) {
            return Err(TeleopException::ConfigInvalid {
                key: format!("{}.position_scale", self.name),
                message: format!("{} is not positive", scale),
            });
        }
        self.tuning.position_scale.store(scale);
        self.persist_f64("position_scale", scale);
        info!("[{}] position scale {}", self.name, scale);
        Ok(scale)
    }

    /// Sets the rotation scale. Only positive values are accepted.
    pub fn set_rotation_scale(&self, scale: f64) -> TeleopResult<f64> {
        if !(scale > 0. && scale.is_finite()) {
            return Err(TeleopException::ConfigInvalid {
                key: format!("{}.rotation_scale", self.name),
                message: format!("{} is not positive", scale),
            });
        }
        self.tuning.rotation_scale.store(scale);
        self.persist_f64("rotation_scale", scale);
        info!("[{}] rotation scale {:.2}", self.name, scale);
        Ok(scale)
    }

    /// Sets the spring stiffness. Negative values are rejected.
    pub fn set_spring_stiffness(&self, stiffness: f64) -> TeleopResult<f64> {
        if !(stiffness >= 0. && stiffness.is_finite()) {
            return Err(TeleopException::ConfigInvalid {
                key: format!("{}.spring_stiffness", self.name),
                message: format!("{} is negative", stiffness),
            });
        }
        self.tuning.spring_stiffness.store(stiffness);
        self.persist_f64("spring_stiffness", stiffness);
        info!("[{}] spring stiffness {:.3}", self.name, stiffness);
        Ok(stiffness)
    }

    /// Adds `steps` position scale steps. A result at or below zero leaves the scale
    /// unchanged. Returns the scale in effect.
    pub fn adjust_position_scale(&self, steps: i32) -> f64 {
        let current = self.position_scale();
        self.set_position_scale(stepped(current, steps, POSITION_SCALE_STEP))
            .unwrap_or_else(|e| {
                warn!("[{}] {}", self.name, e);
                current
            })
    }

    /// Adds `steps` rotation scale steps, see [`adjust_position_scale`](Self::adjust_position_scale).
    pub fn adjust_rotation_scale(&self, steps: i32) -> f64 {
        let current = self.rotation_scale();
        self.set_rotation_scale(stepped(current, steps, ROTATION_SCALE_STEP))
            .unwrap_or_else(|e| {
                warn!("[{}] {}", self.name, e);
                current
            })
    }

    pub fn soften_spring(&self) -> f64 {
        self.scale_spring(STIFFNESS_DECREASE)
    }

    pub fn stiffen_spring(&self) -> f64 {
        self.scale_spring(STIFFNESS_INCREASE)
    }

    fn scale_spring(&self, factor: f64) -> f64 {
        let current = self.spring_stiffness();
        self.set_spring_stiffness(current * factor)
            .unwrap_or(current)
    }

    pub fn axis_map(&self) -> AxisMap {
        self.axis_map
    }

    /// Replaces the axis map. It is persisted now and used from the next tick on.
    pub fn set_axis_map(&mut self, map: AxisMap) -> TeleopResult<()> {
        map.store(&mut lock(&self.config), &self.name);
        self.requests
            .send(ControlRequest::SetAxisMap(map))
            .map_err(|_| TeleopException::ConfigInvalid {
                key: format!("{}_mapping", self.name),
                message: "control loop is gone".to_string(),
            })?;
        self.axis_map = map;
        Ok(())
    }

    /// Human readable description of the axis map.
    pub fn describe_mapping(&self) -> String {
        format!("[{}] axis mapping\n{}", self.name, self.axis_map)
    }

    /// Queries the live arm pose and combines it with the drag state.
    pub fn query_arm_state(&self) -> TeleopResult<ArmStatus> {
        let pose = lock(&self.link).query_arm_pose()?;
        Ok(ArmStatus {
            pose,
            dragging: self.is_dragging(),
            anchor: self.drag_anchor(),
        })
    }

    pub fn teach_frame(&self) -> TeachFrame {
        self.teach_frame
    }

    /// Switches between base and tool teach frame and sends the new frame to the arm.
    pub fn toggle_teach_frame(&mut self) -> TeleopResult<TeachFrame> {
        let frame = self.teach_frame.toggled();
        lock(&self.link).set_teach_frame(frame)?;
        self.teach_frame = frame;
        lock(&self.config).set_i64("system.teach_frame_type", frame as i64);
        Ok(frame)
    }

    /// Writes the configuration file.
    pub fn save_config(&self) -> TeleopResult<()> {
        let config = lock(&self.config);
        config.save()?;
        if let Some(path) = config.path() {
            info!("configuration saved to {}", path.display());
        }
        Ok(())
    }
}
