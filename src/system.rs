// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the [`TeleopSystem`]: two haptic devices, each paired with one arm.
use std::convert::TryFrom;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::arm::types::DEFAULT_ARM_PORT;
use crate::arm::{ArmLink, ArmSetup};
use crate::config::{ConfigStore, SharedConfig};
use crate::exception::{TeleopException, TeleopResult};
use crate::network::{Network, Transport};
use crate::teleop::control_handle::ControlHandle;
use crate::teleop::control_loop::ControlLoop;
use crate::teleop::lock;

/// A device and the arm it drives.
struct Pairing {
    device: &'static str,
    arm: &'static str,
    default_ip: &'static str,
    default_hardware_name: &'static str,
}

const PAIRINGS: [Pairing; 2] = [
    Pairing {
        device: "device1",
        arm: "robot1",
        default_ip: "192.168.10.18",
        default_hardware_name: "PHANToM 1",
    },
    Pairing {
        device: "device2",
        arm: "robot2",
        default_ip: "192.168.10.19",
        default_hardware_name: "PHANToM 2",
    },
];

/// One haptic device with its control loop and handle.
pub struct Device<T: Transport = Network> {
    /// logical name, `device1` or `device2`
    pub name: String,
    /// name of the device hardware as configured in `device_names`
    pub hardware_name: String,
    pub control_loop: ControlLoop<T>,
    pub handle: ControlHandle<T>,
}

/// Owns the configuration and both device/arm pairs.
///
/// # Example
/// ```no_run
/// use teleop::system::TeleopSystem;
/// # fn main() -> teleop::exception::TeleopResult<()> {
/// let system = TeleopSystem::open(None)?;
/// let (loops, handles) = system.split();
/// # Ok(())
/// # }
/// ```
pub struct TeleopSystem<T: Transport = Network> {
    config: SharedConfig,
    devices: Vec<Device<T>>,
}

fn arm_address(config: &mut ConfigStore, pairing: &Pairing) -> TeleopResult<(String, u16)> {
    let ip = config.get_string(&format!("{}.ip", pairing.arm), pairing.default_ip);
    let key = format!("{}.port", pairing.arm);
    let port = config.get_i64(&key, DEFAULT_ARM_PORT as i64);
    let port = u16::try_from(port).map_err(|_| TeleopException::ConfigInvalid {
        key,
        message: format!("{} is not a port number", port),
    })?;
    Ok((ip, port))
}

impl TeleopSystem<Network> {
    /// Loads the configuration and connects both arms.
    ///
    /// An arm that cannot be reached leaves its device haptic-only.
    ///
    /// # Errors
    /// * [`ConfigInvalid`](`TeleopException::ConfigInvalid`) if an arm port or an axis
    ///   mapping is out of range.
    pub fn open(config_path: Option<&Path>) -> TeleopResult<TeleopSystem<Network>> {
        let mut store = ConfigStore::open(ConfigStore::resolve_path(config_path), false);
        let auto_save = store.get_bool("ui.auto_save_config", true);
        store.set_auto_save(auto_save);
        let config = store.into_shared();

        let mut links = Vec::with_capacity(PAIRINGS.len());
        for pairing in PAIRINGS.iter() {
            let (ip, port) = arm_address(&mut lock(&config), pairing)?;
            links.push(ArmLink::connect_or_disconnected(pairing.arm, &ip, port));
        }
        TeleopSystem::from_links(config, links)
    }
}

impl<T: Transport> TeleopSystem<T> {
    /// Builds the system from already created arm links, given in the order `robot1`,
    /// `robot2`. Connected links run the arm setup.
    pub fn from_links(config: SharedConfig, links: Vec<ArmLink<T>>) -> TeleopResult<TeleopSystem<T>> {
        if links.len() != PAIRINGS.len() {
            return Err(TeleopException::ConfigInvalid {
                key: "robot".to_string(),
                message: format!("expected {} arm links, got {}", PAIRINGS.len(), links.len()),
            });
        }
        if links.iter().all(|link| !link.is_connected()) {
            warn!("no arm connected, running haptic-only");
        }
        let setup = ArmSetup::from_config(&mut lock(&config));
        let mut devices = Vec::with_capacity(PAIRINGS.len());
        for (pairing, mut link) in PAIRINGS.iter().zip(links) {
            if link.is_connected() {
                if let Err(e) = link.setup(&setup) {
                    warn!("[{}] arm setup failed: {}", pairing.arm, e);
                }
            }
            let hardware_name = lock(&config).get_string(
                &format!("device_names.{}_primary", pairing.device),
                pairing.default_hardware_name,
            );
            let (control_loop, handle) =
                ControlLoop::from_config(pairing.device, Arc::new(Mutex::new(link)), &config)?;
            info!(
                "[{}] using \"{}\" with {}",
                pairing.device, hardware_name, pairing.arm
            );
            devices.push(Device {
                name: pairing.device.to_string(),
                hardware_name,
                control_loop,
                handle,
            });
        }
        Ok(TeleopSystem { config, devices })
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn devices(&self) -> &[Device<T>] {
        &self.devices
    }

    pub fn device(&self, name: &str) -> Option<&Device<T>> {
        self.devices.iter().find(|device| device.name == name)
    }

    /// Number of devices whose arm is connected.
    pub fn connected_arms(&self) -> usize {
        self.devices
            .iter()
            .filter(|device| device.handle.is_connected())
            .count()
    }

    pub fn save_config(&self) -> TeleopResult<()> {
        lock(&self.config).save()
    }

    /// Separates the loops, which move to the tick contexts, from the handles, which stay
    /// in the control context.
    pub fn split(self) -> (Vec<ControlLoop<T>>, Vec<ControlHandle<T>>) {
        self.devices
            .into_iter()
            .map(|device| (device.control_loop, device.handle))
            .unzip()
    }
}
