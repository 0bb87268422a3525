// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::thread;
use std::time::Duration;

use clap::Parser;

use teleop::arm::types::DEFAULT_ARM_PORT;
use teleop::{ArmLink, TeleopResult};

/// An example showing how to continuously query the pose of an arm.
#[derive(Parser, Debug)]
#[clap(author, version, name = "echo_arm_state")]
struct CommandLineArguments {
    /// IP-Address or hostname of the arm controller
    pub arm_ip: String,
    /// Port of the arm controller
    #[clap(short, long, default_value_t = DEFAULT_ARM_PORT)]
    pub port: u16,
    /// Number of queries
    #[clap(short, long, default_value = "100")]
    pub count: usize,
}

fn main() -> TeleopResult<()> {
    env_logger::init();
    let args = CommandLineArguments::parse();
    let mut link = ArmLink::connect("robot", args.arm_ip.as_str(), args.port)?;
    for _ in 0..args.count {
        // Querying blocks for a few hundred milliseconds. This is acceptable for a read loop
        // such as this, but never happens while streaming.
        match link.query_arm_pose() {
            Ok(pose) => println!("{}", pose),
            Err(e) => eprintln!("{}", e),
        }
        if !link.is_connected() {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}
