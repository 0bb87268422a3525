// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Commands and responses of the JSON line protocol spoken by the arm controller.
use std::fmt;

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::exception::{TeleopException, TeleopResult};

pub const DEFAULT_ARM_PORT: u16 = 8080;
pub const LINE_TERMINATOR: &str = "\r\n";

/// Cartesian arm pose `[x, y, z, rx, ry, rz]` in controller units
/// (micrometres and milliradians).
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ArmPose(pub [i32; 6]);

impl fmt::Display for ArmPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z, rx, ry, rz] = self.0;
        write!(
            f,
            "[x: {}, y: {}, z: {}, rx: {}, ry: {}, rz: {}]",
            x, y, z, rx, ry, rz
        )
    }
}

/// Reference frame used by the arm while being taught.
#[derive(Serialize_repr, Deserialize_repr, FromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum TeachFrame {
    Base = 0,
    Tool = 1,
}

impl TeachFrame {
    pub fn toggled(self) -> TeachFrame {
        match self {
            TeachFrame::Base => TeachFrame::Tool,
            TeachFrame::Tool => TeachFrame::Base,
        }
    }
}

/// Every command the host sends to an arm controller.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ArmCommand {
    GetCurrentArmState,
    MovepFollow {
        pose: ArmPose,
    },
    SetGripperRelease {
        speed: i32,
        block: bool,
    },
    SetGripperPick {
        speed: i32,
        force: i32,
        block: bool,
    },
    WriteSingleRegister {
        port: i32,
        address: i32,
        data: i32,
        device: i32,
    },
    SetArmPower {
        enable: bool,
    },
    SetAngleTransmission {
        state: bool,
    },
    SetRealtimePush {
        cycle: i32,
        port: i32,
        force_coordinate: i32,
        ip: String,
    },
    SetTeachFrame {
        frame_type: TeachFrame,
    },
    SetToolCoordinate {
        tool_name: String,
    },
}

impl ArmCommand {
    /// Encodes the command as one protocol line including the terminator.
    pub fn to_line(&self) -> TeleopResult<String> {
        let mut line =
            serde_json::to_string(self).map_err(|e| TeleopException::ProtocolMalformed {
                message: e.to_string(),
            })?;
        line.push_str(LINE_TERMINATOR);
        Ok(line)
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct ArmStateResponse {
    pub arm_state: ArmState,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ArmState {
    pub pose: Vec<f64>,
}

/// Extracts `arm_state.pose` from a response chunk.
///
/// The chunk may hold several lines, unrelated messages, or a truncated tail. The first
/// message with a six element pose wins. Values are truncated toward zero.
pub fn parse_arm_pose(response: &str) -> TeleopResult<ArmPose> {
    for line in response.lines() {
        let messages = serde_json::Deserializer::from_str(line).into_iter::<serde_json::Value>();
        for message in messages {
            let message = match message {
                Ok(message) => message,
                Err(_) => break,
            };
            if message.get("arm_state").is_none() {
                continue;
            }
            let state: ArmStateResponse = serde_json::from_value(message).map_err(|e| {
                TeleopException::ProtocolMalformed {
                    message: e.to_string(),
                }
            })?;
            if state.arm_state.pose.len() != 6 {
                return Err(TeleopException::ProtocolMalformed {
                    message: format!(
                        "expected 6 pose values, got {}",
                        state.arm_state.pose.len()
                    ),
                });
            }
            let mut pose = [0; 6];
            for (target, value) in pose.iter_mut().zip(state.arm_state.pose.iter()) {
                *target = *value as i32;
            }
            return Ok(ArmPose(pose));
        }
    }
    Err(TeleopException::ProtocolMalformed {
        message: "response contains no arm_state".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_arm_pose, ArmCommand, ArmPose, TeachFrame};
    use crate::exception::TeleopException;
    use num_traits::FromPrimitive;

    #[test]
    fn commands_encode_as_protocol_lines() {
        assert_eq!(
            ArmCommand::GetCurrentArmState.to_line().unwrap(),
            "{\"command\":\"get_current_arm_state\"}\r\n"
        );
        assert_eq!(
            ArmCommand::MovepFollow {
                pose: ArmPose([1, -2, 3, 4, 5, -6])
            }
            .to_line()
            .unwrap(),
            "{\"command\":\"movep_follow\",\"pose\":[1,-2,3,4,5,-6]}\r\n"
        );
        assert_eq!(
            ArmCommand::SetGripperPick {
                speed: 500,
                force: 200,
                block: true
            }
            .to_line()
            .unwrap(),
            "{\"command\":\"set_gripper_pick\",\"speed\":500,\"force\":200,\"block\":true}\r\n"
        );
        assert_eq!(
            ArmCommand::SetTeachFrame {
                frame_type: TeachFrame::Tool
            }
            .to_line()
            .unwrap(),
            "{\"command\":\"set_teach_frame\",\"frame_type\":1}\r\n"
        );
    }

    #[test]
    fn teach_frame_from_config_integer() {
        assert_eq!(TeachFrame::from_i64(0), Some(TeachFrame::Base));
        assert_eq!(TeachFrame::from_i64(1), Some(TeachFrame::Tool));
        assert_eq!(TeachFrame::from_i64(7), None);
        assert_eq!(TeachFrame::Base.toggled(), TeachFrame::Tool);
    }

    #[test]
    fn pose_is_extracted_among_other_fields() {
        let response = "{\"state\":\"current_arm_state\",\"arm_state\":{\"joint\":[1,2,3,4,5,6],\
                        \"pose\":[1000.7,-2000.2,3000,0,10,-20],\"err\":[0]}}\r\n";
        assert_eq!(
            parse_arm_pose(response).unwrap(),
            ArmPose([1000, -2000, 3000, 0, 10, -20])
        );
    }

    #[test]
    fn stale_lines_before_the_answer_are_skipped() {
        let response = "{\"command\":\"movep_follow\",\"trajectory_state\":true}\r\n\
                        {\"arm_state\":{\"pose\":[1,2,3,4,5,6]}}\r\n{\"trunc";
        assert_eq!(parse_arm_pose(response).unwrap(), ArmPose([1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn missing_or_short_pose_is_malformed() {
        for response in [
            "{\"receive_state\":true}",
            "{\"arm_state\":{\"pose\":[1,2,3]}}",
            "{\"arm_state\":{\"joint\":[1,2,3,4,5,6]}}",
            "garbage",
            "",
        ]
        .iter()
        {
            match parse_arm_pose(response) {
                Err(TeleopException::ProtocolMalformed { .. }) => {}
                other => panic!("unexpected result for {:?}: {:?}", response, other),
            }
        }
    }
}
