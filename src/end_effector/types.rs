// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Configuration types of the end-effector variants.
use std::fmt;
use std::str::FromStr;

use log::warn;

use crate::arm::types::ArmCommand;
use crate::config::ConfigStore;
use crate::exception::TeleopException;

/// Which tool is mounted on an arm. Parsed once from `<device>_mapping.end_effector_type`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndEffectorKind {
    Gripper,
    Scissors,
    DexterousHand,
}

impl FromStr for EndEffectorKind {
    type Err = TeleopException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gripper" => Ok(EndEffectorKind::Gripper),
            "scissors" => Ok(EndEffectorKind::Scissors),
            "dexterous_hand" => Ok(EndEffectorKind::DexterousHand),
            other => Err(TeleopException::ConfigInvalid {
                key: "end_effector_type".to_string(),
                message: format!("unknown end effector {:?}", other),
            }),
        }
    }
}

impl fmt::Display for EndEffectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndEffectorKind::Gripper => "gripper",
            EndEffectorKind::Scissors => "scissors",
            EndEffectorKind::DexterousHand => "dexterous_hand",
        };
        f.write_str(name)
    }
}

impl EndEffectorKind {
    /// Reads the kind configured for `device`, falling back to the gripper.
    pub fn from_config(config: &mut ConfigStore, device: &str) -> EndEffectorKind {
        let key = format!("{}_mapping.end_effector_type", device);
        let value = config.get_string(&key, "gripper");
        value.parse().unwrap_or_else(|e| {
            warn!("[{}] {}, using gripper", device, e);
            EndEffectorKind::Gripper
        })
    }
}

/// Speeds and force used for the parallel gripper. Shared by all devices.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GripperSafetyConfig {
    pub pick_speed: i32,
    pub release_speed: i32,
    pub force_threshold: i32,
    pub block: bool,
}

impl Default for GripperSafetyConfig {
    fn default() -> Self {
        GripperSafetyConfig {
            pick_speed: 500,
            release_speed: 500,
            force_threshold: 200,
            block: true,
        }
    }
}

impl GripperSafetyConfig {
    pub fn from_config(config: &mut ConfigStore) -> GripperSafetyConfig {
        let defaults = GripperSafetyConfig::default();
        GripperSafetyConfig {
            pick_speed: config.get_i64("gripper.pick_speed", defaults.pick_speed as i64) as i32,
            release_speed: config
                .get_i64("gripper.release_speed", defaults.release_speed as i64)
                as i32,
            force_threshold: config
                .get_i64("gripper.force_threshold", defaults.force_threshold as i64)
                as i32,
            block: config.get_bool("gripper.block_mode", defaults.block),
        }
    }

    pub fn pick_command(&self) -> ArmCommand {
        ArmCommand::SetGripperPick {
            speed: self.pick_speed,
            force: self.force_threshold,
            block: self.block,
        }
    }

    pub fn release_command(&self) -> ArmCommand {
        ArmCommand::SetGripperRelease {
            speed: self.release_speed,
            block: self.block,
        }
    }
}

/// A tool that is opened and closed by writing a single controller register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegisterToolConfig {
    pub port: i32,
    pub address: i32,
    pub device: i32,
    pub open_data: i32,
    pub close_data: i32,
}

impl RegisterToolConfig {
    pub fn from_config(config: &mut ConfigStore, device: &str) -> RegisterToolConfig {
        let section = format!("{}_mapping", device);
        let mut read = |key: &str, default: i64| {
            config.get_i64(&format!("{}.{}", section, key), default) as i32
        };
        RegisterToolConfig {
            port: read("scissors_modbus_port", 1),
            address: read("scissors_modbus_address", 2),
            device: read("scissors_modbus_device", 1),
            open_data: read("scissors_open_data", 0),
            close_data: read("scissors_close_data", 1),
        }
    }

    pub fn command(&self, close: bool) -> ArmCommand {
        ArmCommand::WriteSingleRegister {
            port: self.port,
            address: self.address,
            data: if close { self.close_data } else { self.open_data },
            device: self.device,
        }
    }
}

/// Joint model of a dexterous hand.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandJoint {
    L7,
    L10,
    L20,
    L25,
}

impl FromStr for HandJoint {
    type Err = TeleopException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "L7" => Ok(HandJoint::L7),
            "L10" => Ok(HandJoint::L10),
            "L20" => Ok(HandJoint::L20),
            "L25" => Ok(HandJoint::L25),
            other => Err(TeleopException::ConfigInvalid {
                key: "hand_joint".to_string(),
                message: format!("unknown joint model {:?}", other),
            }),
        }
    }
}

impl fmt::Display for HandJoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.joint_count())
    }
}

impl HandJoint {
    pub fn joint_count(&self) -> usize {
        match self {
            HandJoint::L7 => 7,
            HandJoint::L10 => 10,
            HandJoint::L20 => 20,
            HandJoint::L25 => 25,
        }
    }

    /// Joint targets that close the hand.
    pub fn grasp_pose(&self) -> Vec<u8> {
        match self {
            HandJoint::L7 => vec![125, 170, 149, 150, 0, 0, 44],
            _ => vec![100; self.joint_count()],
        }
    }

    /// Joint targets that open the hand.
    pub fn open_pose(&self) -> Vec<u8> {
        match self {
            HandJoint::L7 => vec![255, 179, 255, 255, 255, 255, 83],
            _ => vec![255; self.joint_count()],
        }
    }
}

/// Grasp or release.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandAction {
    Grasp,
    Release,
}

/// Settings of an externally hosted dexterous hand.
#[derive(Debug, Clone, PartialEq)]
pub struct HandConfig {
    pub hand_type: String,
    pub hand_joint: HandJoint,
    pub can_interface: String,
    pub grasp_action: String,
    pub release_action: String,
    pub use_topic: bool,
    pub topic_name: String,
    pub topic_endpoint: String,
    pub sdk_library: String,
}

impl HandConfig {
    pub fn from_config(config: &mut ConfigStore, device: &str) -> HandConfig {
        let section = format!("{}_mapping", device);
        let key = |name: &str| format!("{}.{}", section, name);
        let joint = config.get_string(&key("hand_joint"), "L10");
        let hand_joint = joint.parse().unwrap_or_else(|e| {
            warn!("[{}] {}, using L10", device, e);
            HandJoint::L10
        });
        HandConfig {
            hand_type: config.get_string(&key("hand_type"), "left"),
            hand_joint,
            can_interface: config.get_string(&key("can_interface"), "can0"),
            grasp_action: config.get_string(&key("grasp_action"), "ZQ"),
            release_action: config.get_string(&key("release_action"), "ZK"),
            use_topic: config.get_bool(&key("use_ros2"), false),
            topic_name: config.get_string(&key("ros2_topic_name"), "/dexterous_hand/command"),
            topic_endpoint: config.get_string(&key("topic_endpoint"), "127.0.0.1:7447"),
            sdk_library: config.get_string(&key("hand_sdk_library"), "liblinker_hand.so"),
        }
    }

    /// The action name published for `action`.
    pub fn action_name(&self, action: HandAction) -> &str {
        match action {
            HandAction::Grasp => &self.grasp_action,
            HandAction::Release => &self.release_action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        EndEffectorKind, GripperSafetyConfig, HandConfig, HandJoint, RegisterToolConfig,
    };
    use crate::arm::types::ArmCommand;
    use crate::config::ConfigStore;

    #[test]
    fn kind_parsing_falls_back_to_gripper() {
        let mut config = ConfigStore::in_memory();
        assert_eq!(
            EndEffectorKind::from_config(&mut config, "device1"),
            EndEffectorKind::Gripper
        );
        config.set_string("device1_mapping.end_effector_type", "Dexterous_Hand");
        assert_eq!(
            EndEffectorKind::from_config(&mut config, "device1"),
            EndEffectorKind::DexterousHand
        );
        config.set_string("device1_mapping.end_effector_type", "hammer");
        assert_eq!(
            EndEffectorKind::from_config(&mut config, "device1"),
            EndEffectorKind::Gripper
        );
    }

    #[test]
    fn gripper_defaults() {
        let mut config = ConfigStore::in_memory();
        let gripper = GripperSafetyConfig::from_config(&mut config);
        assert_eq!(gripper, GripperSafetyConfig::default());
        assert_eq!(
            gripper.pick_command(),
            ArmCommand::SetGripperPick {
                speed: 500,
                force: 200,
                block: true
            }
        );
        assert!(config.has_key("gripper.block_mode"));
    }

    #[test]
    fn register_tool_writes_open_and_close_values() {
        let mut config = ConfigStore::in_memory();
        config.set_i64("device2_mapping.scissors_close_data", 7);
        let scissors = RegisterToolConfig::from_config(&mut config, "device2");
        assert_eq!(
            scissors.command(true),
            ArmCommand::WriteSingleRegister {
                port: 1,
                address: 2,
                data: 7,
                device: 1
            }
        );
        assert_eq!(
            scissors.command(false),
            ArmCommand::WriteSingleRegister {
                port: 1,
                address: 2,
                data: 0,
                device: 1
            }
        );
    }

    #[test]
    fn hand_poses_match_joint_count() {
        for joint in [HandJoint::L7, HandJoint::L10, HandJoint::L20, HandJoint::L25].iter() {
            assert_eq!(joint.grasp_pose().len(), joint.joint_count());
            assert_eq!(joint.open_pose().len(), joint.joint_count());
        }
        assert_eq!(HandJoint::L7.grasp_pose(), vec![125, 170, 149, 150, 0, 0, 44]);
        assert_eq!("l20".parse::<HandJoint>().unwrap(), HandJoint::L20);
        assert!("L11".parse::<HandJoint>().is_err());
    }

    #[test]
    fn hand_config_defaults() {
        let mut config = ConfigStore::in_memory();
        let hand = HandConfig::from_config(&mut config, "device1");
        assert_eq!(hand.hand_joint, HandJoint::L10);
        assert_eq!(hand.grasp_action, "ZQ");
        assert!(!hand.use_topic);
        assert!(config.has_key("device1_mapping.ros2_topic_name"));
    }
}
