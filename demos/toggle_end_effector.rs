// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use teleop::arm::types::DEFAULT_ARM_PORT;
use teleop::{ArmLink, ConfigStore, EndEffectorController, EndEffectorKind, TeleopResult};

/// An example showing how to close and open the end effector of an arm.
#[derive(Parser, Debug)]
#[clap(author, version, name = "toggle_end_effector")]
struct CommandLineArguments {
    /// IP-Address or hostname of the arm controller
    pub arm_ip: String,
    /// Port of the arm controller
    #[clap(short, long, default_value_t = DEFAULT_ARM_PORT)]
    pub port: u16,
    /// gripper, scissors or dexterous_hand
    #[clap(short, long, default_value = "gripper")]
    pub kind: EndEffectorKind,
    /// Configuration file with the end-effector parameters of device1
    #[clap(long)]
    pub config: Option<PathBuf>,
}

fn main() -> TeleopResult<()> {
    env_logger::init();
    let args: CommandLineArguments = CommandLineArguments::parse();
    let mut config = match &args.config {
        Some(path) => ConfigStore::open(path, false),
        None => ConfigStore::in_memory(),
    };
    config.set_string("device1_mapping.end_effector_type", &args.kind.to_string());
    let mut controller = EndEffectorController::from_config("device1", &mut config);
    let mut link = ArmLink::connect("robot", args.arm_ip.as_str(), args.port)?;
    controller.toggle(&mut link)?;
    println!("{} closed, will open it again.", controller.kind());
    std::thread::sleep(Duration::from_secs(3));
    controller.toggle(&mut link)?;
    println!("{} open.", controller.kind());
    Ok(())
}
