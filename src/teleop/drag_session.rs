// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Drag session: while the drag button is held, arm motion follows stylus motion relative to
//! the anchors captured at the press.
use log::{info, warn};

use crate::arm::types::ArmPose;
use crate::arm::ArmPoseSource;
use crate::exception::TeleopResult;
use crate::teleop::axis_mapping::AxisMap;
use crate::teleop::tuning::Scales;
use crate::utils::Pose3;

/// Poses captured when a drag starts.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DragAnchor {
    pub device: Pose3,
    /// `None` while the arm link is disconnected (haptic-only).
    pub arm: Option<ArmPose>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DragState {
    Idle,
    Dragging(DragAnchor),
}

/// What a press did.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PressOutcome {
    /// Dragging with a live arm anchor.
    Armed,
    /// Dragging without arm, only the spring is active.
    HapticOnly,
    /// A drag was already running.
    AlreadyDragging,
}

#[derive(Debug)]
pub struct DragSession {
    name: String,
    state: DragState,
}

impl DragSession {
    pub fn new(name: &str) -> Self {
        DragSession {
            name: name.to_string(),
            state: DragState::Idle,
        }
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging(_))
    }

    pub fn anchor(&self) -> Option<&DragAnchor> {
        match &self.state {
            DragState::Dragging(anchor) => Some(anchor),
            DragState::Idle => None,
        }
    }

    /// Starts a drag at `device_pose`.
    ///
    /// With a connected arm the current arm pose is queried and becomes the arm anchor. If
    /// the query fails the session stays idle and the error is returned.
    pub fn on_press<S: ArmPoseSource + ?Sized>(
        &mut self,
        device_pose: &Pose3,
        arm: &mut S,
    ) -> TeleopResult<PressOutcome> {
        if self.is_dragging() {
            return Ok(PressOutcome::AlreadyDragging);
        }
        if !arm.is_connected() {
            info!("[{}] drag started without arm, haptic feedback only", self.name);
            self.state = DragState::Dragging(DragAnchor {
                device: *device_pose,
                arm: None,
            });
            return Ok(PressOutcome::HapticOnly);
        }
        let arm_pose = match arm.query_arm_pose() {
            Ok(pose) => pose,
            Err(e) => {
                warn!("[{}] drag not started: {}", self.name, e);
                return Err(e);
            }
        };
        info!(
            "[{}] drag started, device anchor {:?}, arm anchor {}",
            self.name, device_pose.position, arm_pose
        );
        self.state = DragState::Dragging(DragAnchor {
            device: *device_pose,
            arm: Some(arm_pose),
        });
        Ok(PressOutcome::Armed)
    }

    /// Ends the drag. Returns true if a drag was running. No command is sent.
    pub fn on_release(&mut self) -> bool {
        let was_dragging = self.is_dragging();
        if was_dragging {
            info!("[{}] drag ended", self.name);
        }
        self.state = DragState::Idle;
        was_dragging
    }

    /// Computes the arm target for `device_pose`.
    ///
    /// Returns `None` when idle or haptic-only.
    pub fn on_tick(&self, device_pose: &Pose3, map: &AxisMap, scales: Scales) -> Option<ArmPose> {
        let anchor = self.anchor()?;
        let arm_anchor = anchor.arm?;
        let mut position_delta = [0.; 3];
        let mut rotation_delta = [0.; 3];
        let anchor_euler = anchor.device.euler.as_array();
        let euler = device_pose.euler.as_array();
        for k in 0..3 {
            position_delta[k] = device_pose.position[k] - anchor.device.position[k];
            rotation_delta[k] = euler[k] - anchor_euler[k];
        }
        let position = map.map_position(&position_delta, scales.position);
        let rotation = map.map_rotation(&rotation_delta, scales.rotation);

        let mut target = arm_anchor.0;
        for k in 0..3 {
            target[k] = target[k].saturating_add(position[k] as i32);
            target[k + 3] = target[k + 3].saturating_add(rotation[k] as i32);
        }
        Some(ArmPose(target))
    }
}

#[cfg(test)]
mod tests {
    use super::{DragSession, PressOutcome};
    use crate::arm::types::ArmPose;
    use crate::arm::MockArmPoseSource;
    use crate::exception::TeleopException;
    use crate::teleop::axis_mapping::AxisMap;
    use crate::teleop::tuning::Scales;
    use crate::utils::{rotation_to_array, Pose3};
    use nalgebra::{Rotation3, Vector3};

    const IDENTITY: [f64; 16] = [
        1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1.,
    ];
    const ARM_ANCHOR: ArmPose = ArmPose([1000, 2000, 3000, 0, 0, 0]);

    fn connected_arm(times: usize) -> MockArmPoseSource {
        let mut arm = MockArmPoseSource::new();
        arm.expect_is_connected().return_const(true);
        arm.expect_query_arm_pose()
            .returning(|| Ok(ARM_ANCHOR))
            .times(times);
        arm
    }

    fn scales() -> Scales {
        Scales {
            position: 1000.,
            rotation: 1.,
        }
    }

    #[test]
    fn tick_at_press_pose_yields_arm_anchor() {
        let mut session = DragSession::new("device1");
        let mut arm = connected_arm(1);
        let pose = Pose3::new([12.5, -3.25, 40.], &IDENTITY);
        assert_eq!(session.on_press(&pose, &mut arm).unwrap(), PressOutcome::Armed);
        assert_eq!(
            session.on_tick(&pose, &AxisMap::default(), scales()),
            Some(ARM_ANCHOR)
        );
    }

    #[test]
    fn mapped_and_truncated_target() {
        let mut session = DragSession::new("device1");
        let mut arm = connected_arm(1);
        let map = AxisMap::new([2, 0, 1], [2, 0, 1], [-1, -1, 1], [-1, -1, 1]).unwrap();
        session
            .on_press(&Pose3::new([0., 0., 0.], &IDENTITY), &mut arm)
            .unwrap();
        let target = session
            .on_tick(&Pose3::new([0., 0., 0.01], &IDENTITY), &map, scales())
            .unwrap();
        assert_eq!(target, ArmPose([990, 2000, 3000, 0, 0, 0]));
    }

    #[test]
    fn rotation_delta_is_streamed_in_milliradians() {
        let mut session = DragSession::new("device1");
        let mut arm = connected_arm(1);
        let map = AxisMap::new([0, 1, 2], [0, 1, 2], [1, 1, 1], [1, 1, 1]).unwrap();
        session
            .on_press(&Pose3::new([0., 0., 0.], &IDENTITY), &mut arm)
            .unwrap();
        let rolled = rotation_to_array(&Rotation3::from_axis_angle(&Vector3::x_axis(), 0.1));
        let target = session
            .on_tick(&Pose3::new([0., 0., 0.], &rolled), &map, scales())
            .unwrap();
        assert!((target.0[3] - 100).abs() <= 1);
        assert_eq!(&target.0[4..], &[0, 0]);
    }

    #[test]
    fn second_press_is_a_no_op() {
        let mut session = DragSession::new("device1");
        let mut arm = connected_arm(1);
        let first = Pose3::new([1., 1., 1.], &IDENTITY);
        session.on_press(&first, &mut arm).unwrap();
        let outcome = session
            .on_press(&Pose3::new([5., 5., 5.], &IDENTITY), &mut arm)
            .unwrap();
        assert_eq!(outcome, PressOutcome::AlreadyDragging);
        assert_eq!(session.anchor().unwrap().device, first);
    }

    #[test]
    fn exhausted_query_keeps_session_idle() {
        let mut session = DragSession::new("device1");
        let mut arm = MockArmPoseSource::new();
        arm.expect_is_connected().return_const(true);
        arm.expect_query_arm_pose()
            .returning(|| Err(TeleopException::QueryExhausted { attempts: 3 }))
            .times(1);
        let pose = Pose3::new([0., 0., 0.], &IDENTITY);
        assert!(session.on_press(&pose, &mut arm).is_err());
        assert!(!session.is_dragging());
        assert_eq!(session.on_tick(&pose, &AxisMap::default(), scales()), None);
    }

    #[test]
    fn disconnected_arm_drags_haptic_only() {
        let mut session = DragSession::new("device2");
        let mut arm = MockArmPoseSource::new();
        arm.expect_is_connected().return_const(false);
        arm.expect_query_arm_pose().times(0);
        let pose = Pose3::new([0., 0., 0.], &IDENTITY);
        assert_eq!(
            session.on_press(&pose, &mut arm).unwrap(),
            PressOutcome::HapticOnly
        );
        assert!(session.is_dragging());
        assert_eq!(
            session.on_tick(
                &Pose3::new([1., 0., 0.], &IDENTITY),
                &AxisMap::default(),
                scales()
            ),
            None
        );
        assert!(session.on_release());
        assert!(!session.on_release());
    }
}
