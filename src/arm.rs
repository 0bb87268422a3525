// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the arm link: the command channel to one arm controller.
pub mod types;

use std::io;
use std::thread;
use std::time::Duration;

use log::{debug, info, trace, warn};
use num_traits::FromPrimitive;

use crate::arm::types::{parse_arm_pose, ArmCommand, ArmPose, TeachFrame};
use crate::config::ConfigStore;
use crate::exception::{create_link_exception, create_send_exception, TeleopException, TeleopResult};
use crate::network::{Network, Transport, CONNECT_TIMEOUT};

/// Number of state query attempts before a query is reported as exhausted.
pub const QUERY_ATTEMPTS: usize = 3;
const RECEIVE_BUFFER_SIZE: usize = 4096;
const MAX_RESPONSE_SIZE: usize = 64 * 1024;
const MAX_CLEAR_READS: usize = 64;

/// Timing of the state query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPolicy {
    /// total number of attempts
    pub attempts: usize,
    /// delay between sending the first query and reading the answer
    pub initial_settle: Duration,
    /// delay used for every further attempt
    pub retry_settle: Duration,
    /// how long to wait for the answer after settling
    pub receive_timeout: Duration,
    /// upper bound of reads used to discard stale bytes before querying
    pub drain_reads: usize,
    /// wait per stale read
    pub drain_timeout: Duration,
    /// bound for blocking writes
    pub send_timeout: Duration,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        QueryPolicy {
            attempts: QUERY_ATTEMPTS,
            initial_settle: Duration::from_millis(200),
            retry_settle: Duration::from_millis(300),
            receive_timeout: Duration::from_secs(2),
            drain_reads: 5,
            drain_timeout: Duration::from_millis(10),
            send_timeout: Duration::from_secs(1),
        }
    }
}

impl QueryPolicy {
    fn settle_delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            self.initial_settle
        } else {
            self.retry_settle
        }
    }
}

/// Parameters of the one-time setup run after an arm link connects.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmSetup {
    pub power_settle: Duration,
    pub realtime_push_cycle: i32,
    pub realtime_push_port: i32,
    pub realtime_push_ip: String,
    pub teach_frame: TeachFrame,
    pub tool_name: String,
}

impl ArmSetup {
    /// Reads the setup parameters from the `system` section.
    pub fn from_config(config: &mut ConfigStore) -> ArmSetup {
        let frame = config.get_i64("system.teach_frame_type", TeachFrame::Tool as i64);
        let teach_frame = TeachFrame::from_i64(frame).unwrap_or_else(|| {
            warn!("unknown teach frame {}, using tool frame", frame);
            TeachFrame::Tool
        });
        ArmSetup {
            power_settle: Duration::from_millis(500),
            realtime_push_cycle: config.get_i64("system.realtime_push_cycle", 5) as i32,
            realtime_push_port: config.get_i64("system.realtime_push_port", 8089) as i32,
            realtime_push_ip: config.get_string("system.realtime_push_ip", "192.168.10.100"),
            teach_frame,
            tool_name: config.get_string("system.tool_coordinate_name", "Arm_Tip"),
        }
    }
}

/// Read access to the live arm pose, used when a drag session starts.
#[cfg_attr(test, mockall::automock)]
pub trait ArmPoseSource {
    fn is_connected(&self) -> bool;
    fn query_arm_pose(&mut self) -> TeleopResult<ArmPose>;
}

/// Maintains the stream connection to one arm controller.
///
/// A link without transport is Disconnected: every command that needs the arm fails with
/// [`TeleopException::NotConnected`] and the owning device runs haptic-only.
pub struct ArmLink<T: Transport = Network> {
    name: String,
    transport: Option<T>,
    policy: QueryPolicy,
    /// tail of a line the socket only partly accepted
    unsent: Vec<u8>,
}

impl ArmLink<Network> {
    /// Connects to an arm controller.
    ///
    /// # Errors
    /// * [`LinkUnavailable`](`TeleopException::LinkUnavailable`) if the controller is not
    ///   reachable within three seconds.
    pub fn connect(name: &str, address: &str, port: u16) -> TeleopResult<ArmLink<Network>> {
        let network = Network::new(address, port, CONNECT_TIMEOUT)?;
        info!("[{}] connected to arm at {}:{}", name, address, port);
        Ok(ArmLink::with_transport(name, network))
    }

    /// Connects, or returns a disconnected link and logs why.
    pub fn connect_or_disconnected(name: &str, address: &str, port: u16) -> ArmLink<Network> {
        match ArmLink::connect(name, address, port) {
            Ok(link) => link,
            Err(e) => {
                warn!("[{}] {}, continuing haptic-only", name, e);
                ArmLink::disconnected(name)
            }
        }
    }
}

impl<T: Transport> ArmLink<T> {
    pub fn with_transport(name: &str, transport: T) -> Self {
        ArmLink {
            name: name.to_string(),
            transport: Some(transport),
            policy: QueryPolicy::default(),
            unsent: Vec::new(),
        }
    }

    pub fn disconnected(name: &str) -> Self {
        ArmLink {
            name: name.to_string(),
            transport: None,
            policy: QueryPolicy::default(),
            unsent: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Drops the connection. The link stays usable as a disconnected link.
    pub fn disconnect(&mut self) {
        self.unsent.clear();
        if self.transport.take().is_some() {
            info!("[{}] arm link closed", self.name);
        }
    }

    pub fn set_query_policy(&mut self, policy: QueryPolicy) {
        self.policy = policy;
    }

    pub fn query_policy(&self) -> &QueryPolicy {
        &self.policy
    }

    fn transport(&mut self) -> TeleopResult<&mut T> {
        self.transport.as_mut().ok_or(TeleopException::NotConnected)
    }

    /// Writes a command, waiting at most the send timeout of the query policy.
    pub fn send_command(&mut self, command: &ArmCommand) -> TeleopResult<()> {
        let line = command.to_line()?;
        let timeout = self.policy.send_timeout;
        let transport = self.transport.as_mut().ok_or(TeleopException::NotConnected)?;
        if !self.unsent.is_empty() {
            transport
                .send_all(&self.unsent, timeout)
                .map_err(create_send_exception)?;
            self.unsent.clear();
        }
        transport
            .send_all(line.as_bytes(), timeout)
            .map_err(create_send_exception)?;
        trace!("[{}] sent {}", self.name, line.trim_end());
        Ok(())
    }

    /// Writes a command without blocking.
    ///
    /// Returns true if the socket accepted any bytes of the command. If only part of the line
    /// fits, the rest goes out before the next command; commands are dropped while such a
    /// rest is pending. A hard socket error disconnects the link.
    pub fn send_async(&mut self, command: &ArmCommand) -> bool {
        let line = match command.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!("[{}] {}", self.name, e);
                return false;
            }
        };
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => return false,
        };
        match write_nonblocking(transport, &mut self.unsent, line.as_bytes()) {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!("[{}] socket full, dropping command", self.name);
                false
            }
            Err(e) => {
                warn!("[{}] send failed: {}", self.name, e);
                self.disconnect();
                false
            }
        }
    }

    /// Streams a follow target without blocking.
    pub fn move_follow_async(&mut self, pose: ArmPose) -> bool {
        self.send_async(&ArmCommand::MovepFollow { pose })
    }

    /// Discards everything that is currently buffered on the receive side.
    ///
    /// Returns the number of discarded bytes.
    pub fn clear_receive_buffer(&mut self) -> usize {
        let name = self.name.clone();
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => return 0,
        };
        let mut buffer = [0_u8; RECEIVE_BUFFER_SIZE];
        let mut discarded = 0;
        for _ in 0..MAX_CLEAR_READS {
            match transport.receive(&mut buffer, Duration::from_millis(0)) {
                Ok(Some(num_bytes)) if num_bytes > 0 => discarded += num_bytes,
                _ => break,
            }
        }
        if discarded > 0 {
            debug!("[{}] discarded {} buffered bytes", name, discarded);
        }
        discarded
    }

    fn drain_stale(&mut self) {
        let drain_reads = self.policy.drain_reads;
        let drain_timeout = self.policy.drain_timeout;
        let name = self.name.clone();
        let transport = match self.transport.as_mut() {
            Some(transport) => transport,
            None => return,
        };
        let mut buffer = [0_u8; RECEIVE_BUFFER_SIZE];
        for _ in 0..drain_reads {
            match transport.receive(&mut buffer, drain_timeout) {
                Ok(Some(num_bytes)) if num_bytes > 0 => {
                    debug!("[{}] dropped {} stale bytes", name, num_bytes)
                }
                _ => break,
            }
        }
    }

    /// Reads one response chunk: waits for the first bytes, then takes whatever else is
    /// already buffered.
    fn read_response(&mut self) -> TeleopResult<String> {
        let timeout = self.policy.receive_timeout;
        let transport = self.transport()?;
        let mut buffer = [0_u8; RECEIVE_BUFFER_SIZE];
        let mut response = Vec::new();
        match transport
            .receive(&mut buffer, timeout)
            .map_err(create_link_exception)?
        {
            None => {
                return Err(TeleopException::ProtocolMalformed {
                    message: "no response within timeout".to_string(),
                })
            }
            Some(0) => return Err(create_link_exception("arm closed the connection")),
            Some(num_bytes) => response.extend_from_slice(&buffer[..num_bytes]),
        }
        while response.len() < MAX_RESPONSE_SIZE {
            match transport.receive(&mut buffer, Duration::from_millis(0)) {
                Ok(Some(num_bytes)) if num_bytes > 0 => {
                    response.extend_from_slice(&buffer[..num_bytes])
                }
                _ => break,
            }
        }
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    /// Asks the arm for its current Cartesian pose.
    ///
    /// Stale bytes are discarded first. The query is sent up to three times; after each send
    /// the link waits for the answer to settle and then reads with a timeout.
    ///
    /// # Errors
    /// * [`NotConnected`](`TeleopException::NotConnected`) if the link is disconnected.
    /// * [`SendFailure`](`TeleopException::SendFailure`) if the query cannot be written.
    /// * [`QueryExhausted`](`TeleopException::QueryExhausted`) if no attempt produced a pose.
    pub fn query_arm_pose(&mut self) -> TeleopResult<ArmPose> {
        if !self.is_connected() {
            return Err(TeleopException::NotConnected);
        }
        self.drain_stale();
        let attempts = self.policy.attempts;
        for attempt in 0..attempts {
            self.send_command(&ArmCommand::GetCurrentArmState)?;
            thread::sleep(self.policy.settle_delay(attempt));
            let result = self
                .read_response()
                .and_then(|response| parse_arm_pose(&response));
            match result {
                Ok(pose) => {
                    info!("[{}] arm pose {}", self.name, pose);
                    return Ok(pose);
                }
                Err(TeleopException::LinkUnavailable { message }) => {
                    warn!("[{}] {}", self.name, message);
                    self.disconnect();
                    return Err(TeleopException::LinkUnavailable { message });
                }
                Err(e) => warn!(
                    "[{}] state query attempt {}/{} failed: {}",
                    self.name,
                    attempt + 1,
                    attempts,
                    e
                ),
            }
        }
        Err(TeleopException::QueryExhausted { attempts })
    }

    /// Sets the reference frame used while teaching.
    pub fn set_teach_frame(&mut self, frame: TeachFrame) -> TeleopResult<()> {
        self.send_command(&ArmCommand::SetTeachFrame { frame_type: frame })?;
        info!("[{}] teach frame set to {:?}", self.name, frame);
        Ok(())
    }

    /// Powers the arm and configures streaming, teach frame and tool frame.
    pub fn setup(&mut self, setup: &ArmSetup) -> TeleopResult<()> {
        self.send_command(&ArmCommand::SetArmPower { enable: true })?;
        thread::sleep(setup.power_settle);
        self.send_command(&ArmCommand::SetAngleTransmission { state: true })?;
        self.send_command(&ArmCommand::SetRealtimePush {
            cycle: setup.realtime_push_cycle,
            port: setup.realtime_push_port,
            force_coordinate: 0,
            ip: setup.realtime_push_ip.clone(),
        })?;
        self.set_teach_frame(setup.teach_frame)?;
        self.send_command(&ArmCommand::SetToolCoordinate {
            tool_name: setup.tool_name.clone(),
        })?;
        info!("[{}] arm setup complete", self.name);
        Ok(())
    }
}

/// Flushes `unsent`, then writes `line` if nothing is left over. The part of `line` the
/// socket does not take is kept in `unsent`.
fn write_nonblocking<T: Transport>(
    transport: &mut T,
    unsent: &mut Vec<u8>,
    line: &[u8],
) -> io::Result<bool> {
    if !unsent.is_empty() {
        let written = transport.try_send(unsent)?;
        unsent.drain(..written.min(unsent.len()));
        if !unsent.is_empty() {
            return Ok(false);
        }
    }
    let written = transport.try_send(line)?.min(line.len());
    if written > 0 && written < line.len() {
        unsent.extend_from_slice(&line[written..]);
    }
    Ok(written > 0)
}

impl<T: Transport> ArmPoseSource for ArmLink<T> {
    fn is_connected(&self) -> bool {
        ArmLink::is_connected(self)
    }

    fn query_arm_pose(&mut self) -> TeleopResult<ArmPose> {
        ArmLink::query_arm_pose(self)
    }
}
