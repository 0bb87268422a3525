// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Backends that drive an externally hosted dexterous hand.
use std::ffi::CString;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use libc::{c_char, c_int, c_uchar};
use libloading::os::unix::{Library, Symbol};
use log::{info, warn};
use mio::net::UdpSocket;
use serde::Serialize;

use crate::end_effector::types::{HandAction, HandConfig};
use crate::exception::{TeleopException, TeleopResult};

/// Speed applied to every joint before a finger move.
pub const JOINT_SPEED: u8 = 120;

/// A strategy that turns grasp/release requests into hand motion.
#[cfg_attr(test, mockall::automock)]
pub trait HandBackend: Send {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;
    /// Prepares the backend. A failure makes the controller fall back to the gripper.
    fn initialize(&mut self) -> TeleopResult<()>;
    /// Performs `action`.
    fn execute(&mut self, action: HandAction) -> TeleopResult<()>;
}

fn actuator_exception<E: ToString>(error: E) -> TeleopException {
    TeleopException::ActuatorUnavailable {
        message: error.to_string(),
    }
}

/// Picks the backend configured for a hand.
pub fn select_backend(config: &HandConfig) -> Box<dyn HandBackend> {
    if config.use_topic {
        Box::new(TopicHand::new(config.clone()))
    } else if !config.sdk_library.is_empty() {
        Box::new(SdkHand::new(config.clone()))
    } else {
        Box::new(NullHand {})
    }
}

type HandOpenFn = unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> c_int;
type HandSetSpeedFn = unsafe extern "C" fn(*const c_uchar, usize) -> c_int;
type HandFingerMoveFn = unsafe extern "C" fn(*const c_uchar, usize) -> c_int;

struct HandLibrary {
    _library: Library,
    hand_open: Symbol<HandOpenFn>,
    hand_set_speed: Symbol<HandSetSpeedFn>,
    hand_finger_move: Symbol<HandFingerMoveFn>,
}

impl HandLibrary {
    fn open(path: &Path) -> TeleopResult<HandLibrary> {
        unsafe {
            let library = Library::open(Some(path), libc::RTLD_NOW).map_err(|e| {
                actuator_exception(format!("cannot open {}: {}", path.display(), e))
            })?;
            let hand_open = HandLibrary::get_symbol(&library, "hand_open")?;
            let hand_set_speed = HandLibrary::get_symbol(&library, "hand_set_speed")?;
            let hand_finger_move = HandLibrary::get_symbol(&library, "hand_finger_move")?;
            Ok(HandLibrary {
                _library: library,
                hand_open,
                hand_set_speed,
                hand_finger_move,
            })
        }
    }

    fn get_symbol<T>(library: &Library, symbol: &str) -> TeleopResult<Symbol<T>> {
        unsafe {
            library
                .get(symbol.as_bytes())
                .map_err(|_| actuator_exception(format!("symbol cannot be found: {}", symbol)))
        }
    }
}

/// Drives the hand through the vendor SDK, loaded as a C-ABI shared library.
pub struct SdkHand {
    config: HandConfig,
    library: Option<HandLibrary>,
}

impl SdkHand {
    pub fn new(config: HandConfig) -> Self {
        SdkHand {
            config,
            library: None,
        }
    }
}

fn check_status(call: &str, status: c_int) -> TeleopResult<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(actuator_exception(format!("{} returned {}", call, status)))
    }
}

impl HandBackend for SdkHand {
    fn name(&self) -> &'static str {
        "sdk"
    }

    fn initialize(&mut self) -> TeleopResult<()> {
        let library = HandLibrary::open(Path::new(&self.config.sdk_library))?;
        let hand_type = CString::new(self.config.hand_type.as_str()).map_err(actuator_exception)?;
        let hand_joint =
            CString::new(self.config.hand_joint.to_string()).map_err(actuator_exception)?;
        let can = CString::new(self.config.can_interface.as_str()).map_err(actuator_exception)?;
        let status =
            unsafe { (library.hand_open)(hand_type.as_ptr(), hand_joint.as_ptr(), can.as_ptr()) };
        check_status("hand_open", status)?;
        info!(
            "{} {} hand opened on {}",
            self.config.hand_type, self.config.hand_joint, self.config.can_interface
        );
        self.library = Some(library);
        Ok(())
    }

    fn execute(&mut self, action: HandAction) -> TeleopResult<()> {
        let library = self
            .library
            .as_ref()
            .ok_or_else(|| actuator_exception("hand sdk is not initialized"))?;
        let joint = self.config.hand_joint;
        let speeds = vec![JOINT_SPEED; joint.joint_count()];
        let pose = match action {
            HandAction::Grasp => joint.grasp_pose(),
            HandAction::Release => joint.open_pose(),
        };
        let status = unsafe { (library.hand_set_speed)(speeds.as_ptr(), speeds.len()) };
        check_status("hand_set_speed", status)?;
        let status = unsafe { (library.hand_finger_move)(pose.as_ptr(), pose.len()) };
        check_status("hand_finger_move", status)
    }
}

/// Message published on the hand command topic.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HandTopicMessage {
    pub hand_type: String,
    pub hand_joint: String,
    pub action: String,
    pub timestamp: u64,
}

/// Publishes hand commands as JSON datagrams to a topic bridge.
pub struct TopicHand {
    config: HandConfig,
    socket: Option<UdpSocket>,
    endpoint: Option<SocketAddr>,
}

impl TopicHand {
    pub fn new(config: HandConfig) -> Self {
        TopicHand {
            config,
            socket: None,
            endpoint: None,
        }
    }

    pub fn message(&self, action: HandAction) -> HandTopicMessage {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        HandTopicMessage {
            hand_type: self.config.hand_type.clone(),
            hand_joint: self.config.hand_joint.to_string(),
            action: self.config.action_name(action).to_string(),
            timestamp,
        }
    }
}

impl HandBackend for TopicHand {
    fn name(&self) -> &'static str {
        "topic"
    }

    fn initialize(&mut self) -> TeleopResult<()> {
        let endpoint = self
            .config
            .topic_endpoint
            .to_socket_addrs()
            .map_err(actuator_exception)?
            .next()
            .ok_or_else(|| {
                actuator_exception(format!("cannot resolve {}", self.config.topic_endpoint))
            })?;
        let bind_address: SocketAddr = if endpoint.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0_u16; 8], 0))
        };
        self.socket = Some(UdpSocket::bind(bind_address).map_err(actuator_exception)?);
        self.endpoint = Some(endpoint);
        info!(
            "publishing hand commands on {} via {}",
            self.config.topic_name, endpoint
        );
        Ok(())
    }

    fn execute(&mut self, action: HandAction) -> TeleopResult<()> {
        let message = serde_json::to_vec(&self.message(action)).map_err(actuator_exception)?;
        let (socket, endpoint) = match (&self.socket, self.endpoint) {
            (Some(socket), Some(endpoint)) => (socket, endpoint),
            _ => return Err(actuator_exception("hand topic is not initialized")),
        };
        let sent = socket
            .send_to(&message, endpoint)
            .map_err(actuator_exception)?;
        if sent < message.len() {
            warn!("hand command truncated to {} bytes", sent);
        }
        Ok(())
    }
}

/// Used when no hand backend is available. Never initializes.
pub struct NullHand {}

impl HandBackend for NullHand {
    fn name(&self) -> &'static str {
        "none"
    }

    fn initialize(&mut self) -> TeleopResult<()> {
        Err(actuator_exception("no hand backend configured"))
    }

    fn execute(&mut self, _action: HandAction) -> TeleopResult<()> {
        Err(actuator_exception("no hand backend configured"))
    }
}
