// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! # haptic-teleop-rs
//! haptic-teleop-rs lets an operator drive robot arms with haptic stylus devices.
//! Two devices are each paired with one arm. While the drag button of a device is held, the
//! arm follows the stylus relative to where both were when the button was pressed, and a
//! spring pulls the stylus back towards its press position.
//!
//! **ALWAYS HAVE THE EMERGENCY STOP OF THE ARMS AT HAND WHILE TELEOPERATING!**
//!
//! ## Design
//! The library is divided into these main modules:
//! * [arm](`crate::arm`) - the line based JSON command channel to one arm controller.
//! * [teleop](`crate::teleop`) - axis mapping, drag sessions, spring feedback and the
//!   per-device [`ControlLoop`](`crate::teleop::ControlLoop`).
//! * [end_effector](`crate::end_effector`) - gripper, register driven tools and external hands.
//! * [config](`crate::config`) - the persistent `section.key` configuration store.
//! * [system](`crate::system`) - wires everything together for two device/arm pairs.
//!
//! Every device has two contexts. The tick context is driven by the device scheduler and calls
//! [`ControlLoop::tick`](`crate::teleop::ControlLoop::tick`) once per device sample. Streaming
//! to the arm never blocks the tick context. The control context owns the
//! [`ControlHandle`](`crate::teleop::ControlHandle`) and changes tuning, mapping or frames
//! while the loop runs.
//!
//! # Example:
//!```no_run
//! use std::thread;
//! use teleop::{DeviceSample, TeleopResult, TeleopSystem};
//! fn main() -> TeleopResult<()> {
//!     let system = TeleopSystem::open(None)?;
//!     let (loops, mut handles) = system.split();
//!     for mut control_loop in loops {
//!         thread::spawn(move || loop {
//!             // replace with the samples of the device scheduler
//!             let sample = DeviceSample {
//!                 position: [0.; 3],
//!                 transform: [
//!                     1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1.,
//!                 ],
//!                 buttons: 0,
//!                 max_continuous_force: 3.,
//!             };
//!             let _force = control_loop.tick(&sample);
//!         });
//!     }
//!     handles[0].adjust_position_scale(1);
//!     handles[0].toggle_teach_frame()?;
//!     handles[0].save_config()
//! }
//!```
//!
//! All fallible operations return a [`TeleopResult`] with a [`TeleopException`] describing
//! what went wrong. A device whose arm cannot be reached keeps its haptic feedback and only
//! stops streaming.
pub mod arm;
pub mod config;
pub mod end_effector;
pub mod exception;
pub mod network;
pub mod system;
pub mod teleop;
pub mod utils;

pub use arm::types::{ArmCommand, ArmPose, TeachFrame};
pub use arm::ArmLink;
pub use config::{ConfigStore, SharedConfig};
pub use end_effector::types::EndEffectorKind;
pub use end_effector::EndEffectorController;
pub use exception::{TeleopException, TeleopResult};
pub use system::TeleopSystem;
pub use teleop::axis_mapping::AxisMap;
pub use teleop::{ControlHandle, ControlLoop, DeviceSample, BUTTON_1, BUTTON_2};
pub use utils::Pose3;
