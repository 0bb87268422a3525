// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//!  Contains the EndEffector type: the tool mounted on an arm.
pub mod hand;
pub mod types;

use log::{info, warn};

use crate::arm::ArmLink;
use crate::config::ConfigStore;
use crate::end_effector::hand::{select_backend, HandBackend};
use crate::end_effector::types::{
    EndEffectorKind, GripperSafetyConfig, HandAction, RegisterToolConfig,
};
use crate::exception::{TeleopException, TeleopResult};
use crate::network::Transport;

/// The tool variants that can be opened and closed.
pub enum EndEffector {
    /// Parallel gripper driven through the arm controller.
    Gripper(GripperSafetyConfig),
    /// A tool switched by writing one register of the arm controller, e.g. scissors.
    RegisterTool(RegisterToolConfig),
    /// A hand that is driven outside of the arm controller.
    ExternalActuator(Box<dyn HandBackend>),
}

impl EndEffector {
    pub fn kind(&self) -> EndEffectorKind {
        match self {
            EndEffector::Gripper(_) => EndEffectorKind::Gripper,
            EndEffector::RegisterTool(_) => EndEffectorKind::Scissors,
            EndEffector::ExternalActuator(_) => EndEffectorKind::DexterousHand,
        }
    }

    fn needs_arm_link(&self) -> bool {
        !matches!(self, EndEffector::ExternalActuator(_))
    }
}

/// Tracks whether the tool of one device is open or closed and issues the matching commands.
///
/// Every tool starts open.
pub struct EndEffectorController {
    name: String,
    effector: EndEffector,
    closed: bool,
}

impl EndEffectorController {
    pub fn new(name: &str, effector: EndEffector) -> Self {
        EndEffectorController {
            name: name.to_string(),
            effector,
            closed: false,
        }
    }

    /// Builds the end effector configured for `device`.
    ///
    /// An external hand is initialized and opened here. If that fails the device falls back
    /// to the gripper.
    pub fn from_config(device: &str, config: &mut ConfigStore) -> Self {
        let gripper = GripperSafetyConfig::from_config(config);
        let effector = match EndEffectorKind::from_config(config, device) {
            EndEffectorKind::Gripper => EndEffector::Gripper(gripper),
            EndEffectorKind::Scissors => {
                EndEffector::RegisterTool(RegisterToolConfig::from_config(config, device))
            }
            EndEffectorKind::DexterousHand => {
                let hand_config = types::HandConfig::from_config(config, device);
                match EndEffectorController::start_hand(select_backend(&hand_config)) {
                    Ok(backend) => EndEffector::ExternalActuator(backend),
                    Err(e) => {
                        warn!("[{}] {}, falling back to gripper", device, e);
                        EndEffector::Gripper(gripper)
                    }
                }
            }
        };
        info!("[{}] end effector: {}", device, effector.kind());
        EndEffectorController::new(device, effector)
    }

    fn start_hand(mut backend: Box<dyn HandBackend>) -> TeleopResult<Box<dyn HandBackend>> {
        backend.initialize()?;
        backend.execute(HandAction::Release)?;
        Ok(backend)
    }

    pub fn kind(&self) -> EndEffectorKind {
        self.effector.kind()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flips between open and closed and sends the command for the new state.
    ///
    /// The state only changes if the command was delivered.
    ///
    /// # Errors
    /// * [`NotConnected`](`TeleopException::NotConnected`) if the tool is driven through the
    ///   arm and the link is disconnected.
    /// * [`SendFailure`](`TeleopException::SendFailure`) or
    ///   [`ActuatorUnavailable`](`TeleopException::ActuatorUnavailable`) if the command failed.
    /// # Return
    /// True if the tool is closed afterwards.
    pub fn toggle<T: Transport>(&mut self, link: &mut ArmLink<T>) -> TeleopResult<bool> {
        let close = !self.closed;
        if self.effector.needs_arm_link() && !link.is_connected() {
            warn!(
                "[{}] arm link disconnected, skipping {} command",
                self.name,
                self.effector.kind()
            );
            return Err(TeleopException::NotConnected);
        }
        match &mut self.effector {
            EndEffector::Gripper(gripper) => {
                let command = if close {
                    gripper.pick_command()
                } else {
                    gripper.release_command()
                };
                link.send_command(&command)?;
            }
            EndEffector::RegisterTool(tool) => link.send_command(&tool.command(close))?,
            EndEffector::ExternalActuator(backend) => backend.execute(if close {
                HandAction::Grasp
            } else {
                HandAction::Release
            })?,
        }
        self.closed = close;
        info!(
            "[{}] {} {}",
            self.name,
            self.effector.kind(),
            if close { "closed" } else { "opened" }
        );
        Ok(close)
    }
}
