// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Per-device tick driver.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use log::{debug, trace, warn};

use crate::arm::types::{ArmPose, TeachFrame};
use crate::arm::ArmLink;
use crate::config::{ConfigStore, SharedConfig};
use crate::end_effector::EndEffectorController;
use crate::exception::TeleopResult;
use crate::network::{Network, Transport};
use crate::teleop::axis_mapping::AxisMap;
use crate::teleop::control_handle::{ControlHandle, ControlRequest};
use crate::teleop::drag_session::{DragAnchor, DragSession, PressOutcome};
use crate::teleop::{lock, try_lock};
use crate::teleop::rate_limiting::{RateGate, SendCadence, DEFAULT_CONTROL_INTERVAL};
use crate::teleop::spring::spring_force;
use crate::teleop::tuning::Tuning;
use crate::utils::Pose3;

/// Drag button.
pub const BUTTON_1: u32 = 1;
/// End-effector button.
pub const BUTTON_2: u32 = 1 << 1;

/// One sample delivered by the device scheduler.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DeviceSample {
    pub position: [f64; 3],
    /// column-major 4x4 stylus transform
    pub transform: [f64; 16],
    pub buttons: u32,
    /// largest continuous force the device can render
    pub max_continuous_force: f64,
}

/// Cadence of the streaming path.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LoopSettings {
    pub control_interval: Duration,
    pub buffer_clear_interval: u64,
    pub debug_interval: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        LoopSettings {
            control_interval: DEFAULT_CONTROL_INTERVAL,
            buffer_clear_interval: 100,
            debug_interval: 50,
        }
    }
}

impl LoopSettings {
    pub fn from_config(config: &mut ConfigStore) -> LoopSettings {
        let interval = config.get_i64("system.control_frequency", 10).max(0) as u64;
        LoopSettings {
            control_interval: Duration::from_millis(interval),
            buffer_clear_interval: config.get_i64("system.buffer_clear_interval", 100).max(1)
                as u64,
            debug_interval: config.get_i64("system.debug_frequency", 50).max(1) as u64,
        }
    }
}

/// Drag state mirrored for the control context.
#[derive(Debug, Default)]
pub struct DragStatus {
    dragging: AtomicBool,
    anchor: Mutex<Option<DragAnchor>>,
}

impl DragStatus {
    pub fn is_dragging(&self) -> bool {
        self.dragging.load(Ordering::Acquire)
    }

    pub fn anchor(&self) -> Option<DragAnchor> {
        *lock(&self.anchor)
    }

    fn publish(&self, anchor: Option<DragAnchor>) {
        *lock(&self.anchor) = anchor;
        self.dragging.store(anchor.is_some(), Ordering::Release);
    }
}

/// Runs the teleoperation of one device/arm pair, one [`tick`](Self::tick) per device sample.
pub struct ControlLoop<T: Transport = Network> {
    name: String,
    link: Arc<Mutex<ArmLink<T>>>,
    session: DragSession,
    axis_map: AxisMap,
    tuning: Arc<Tuning>,
    status: Arc<DragStatus>,
    end_effector: EndEffectorController,
    gate: RateGate,
    cadence: SendCadence,
    requests: Receiver<ControlRequest>,
    last_buttons: u32,
    /// button edges waiting for the arm link
    drag_requested: bool,
    toggle_requested: bool,
}

impl<T: Transport> ControlLoop<T> {
    /// Creates the loop and the handle that controls it from another thread.
    pub fn new(
        name: &str,
        link: Arc<Mutex<ArmLink<T>>>,
        config: SharedConfig,
        axis_map: AxisMap,
        tuning: Tuning,
        end_effector: EndEffectorController,
        settings: LoopSettings,
        teach_frame: TeachFrame,
    ) -> (ControlLoop<T>, ControlHandle<T>) {
        let (sender, receiver) = unbounded();
        let tuning = Arc::new(tuning);
        let status = Arc::new(DragStatus::default());
        let handle = ControlHandle::new(
            name,
            link.clone(),
            config,
            tuning.clone(),
            status.clone(),
            sender,
            axis_map,
            teach_frame,
        );
        let control_loop = ControlLoop {
            name: name.to_string(),
            link,
            session: DragSession::new(name),
            axis_map,
            tuning,
            status,
            end_effector,
            gate: RateGate::new(settings.control_interval),
            cadence: SendCadence::new(settings.buffer_clear_interval, settings.debug_interval),
            requests: receiver,
            last_buttons: 0,
            drag_requested: false,
            toggle_requested: false,
        };
        (control_loop, handle)
    }

    /// Builds the loop of `device` from the configuration.
    ///
    /// # Errors
    /// * [`ConfigInvalid`](`crate::exception::TeleopException::ConfigInvalid`) if the axis
    ///   mapping of the device is out of range.
    pub fn from_config(
        device: &str,
        link: Arc<Mutex<ArmLink<T>>>,
        config: &SharedConfig,
    ) -> TeleopResult<(ControlLoop<T>, ControlHandle<T>)> {
        let (axis_map, tuning, end_effector, settings, teach_frame) = {
            let mut store = lock(config);
            let axis_map = AxisMap::load(&mut store, device)?;
            let tuning = Tuning::from_config(&mut store, device);
            let end_effector = EndEffectorController::from_config(device, &mut store);
            let settings = LoopSettings::from_config(&mut store);
            let teach_frame = crate::arm::ArmSetup::from_config(&mut store).teach_frame;
            (axis_map, tuning, end_effector, settings, teach_frame)
        };
        Ok(ControlLoop::new(
            device,
            link,
            config.clone(),
            axis_map,
            tuning,
            end_effector,
            settings,
            teach_frame,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dragging(&self) -> bool {
        self.session.is_dragging()
    }

    pub fn axis_map(&self) -> &AxisMap {
        &self.axis_map
    }

    pub fn end_effector(&self) -> &EndEffectorController {
        &self.end_effector
    }

    /// Processes one device sample and returns the force to render.
    ///
    /// Never waits for the arm link. A button edge that arrives while the control context
    /// holds the link is served at the first tick that gets it.
    pub fn tick(&mut self, sample: &DeviceSample) -> [f64; 3] {
        self.tick_at(sample, Instant::now())
    }

    /// Like [`tick`](Self::tick) with an explicit sample time.
    pub fn tick_at(&mut self, sample: &DeviceSample, now: Instant) -> [f64; 3] {
        self.apply_requests();
        let pose = Pose3::new(sample.position, &sample.transform);
        let pressed = sample.buttons & !self.last_buttons;
        let released = !sample.buttons & self.last_buttons;
        self.last_buttons = sample.buttons;

        if pressed & BUTTON_1 != 0 {
            self.drag_requested = true;
        } else if released & BUTTON_1 != 0 {
            self.drag_requested = false;
            if self.session.on_release() {
                self.status.publish(None);
            }
        }
        if pressed & BUTTON_2 != 0 {
            self.toggle_requested = true;
        }
        if self.drag_requested || self.toggle_requested {
            self.serve_button_requests(&pose);
        }

        if let Some(target) = self
            .session
            .on_tick(&pose, &self.axis_map, self.tuning.scales())
        {
            if self.gate.try_acquire(now) {
                self.stream(target);
            }
        }

        match self.session.anchor() {
            Some(anchor) => spring_force(
                &anchor.device.position,
                &pose.position,
                self.tuning.spring_stiffness.load(),
                sample.max_continuous_force,
            ),
            None => [0.; 3],
        }
    }

    fn apply_requests(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            match request {
                ControlRequest::SetAxisMap(map) => {
                    debug!("[{}] axis map replaced", self.name);
                    self.axis_map = map;
                }
            }
        }
    }

    fn serve_button_requests(&mut self, pose: &Pose3) {
        let mut link = match try_lock(&self.link) {
            Some(link) => link,
            None => {
                trace!("[{}] arm link busy, button deferred", self.name);
                return;
            }
        };
        if std::mem::take(&mut self.drag_requested) {
            match self.session.on_press(pose, &mut *link) {
                Ok(PressOutcome::AlreadyDragging) | Err(_) => {}
                Ok(_) => {
                    self.gate.reset();
                    self.status.publish(self.session.anchor().copied());
                }
            }
        }
        if std::mem::take(&mut self.toggle_requested) {
            if let Err(e) = self.end_effector.toggle(&mut *link) {
                warn!("[{}] end effector not toggled: {}", self.name, e);
            }
        }
    }

    fn stream(&mut self, target: ArmPose) {
        let mut link = match try_lock(&self.link) {
            Some(link) => link,
            None => {
                trace!("[{}] arm link busy, target dropped", self.name);
                return;
            }
        };
        let accepted = link.move_follow_async(target);
        let (drain, report) = self.cadence.record();
        if drain {
            link.clear_receive_buffer();
        }
        if report {
            debug!(
                "[{}] {} targets streamed every {:?}, last {} {}",
                self.name,
                self.cadence.sends(),
                self.gate.interval(),
                target,
                if accepted { "accepted" } else { "dropped" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlLoop, DeviceSample, LoopSettings, BUTTON_1, BUTTON_2};
    use crate::arm::tests::fast_policy;
    use crate::arm::types::TeachFrame;
    use crate::arm::ArmLink;
    use crate::config::ConfigStore;
    use crate::end_effector::types::GripperSafetyConfig;
    use crate::end_effector::{EndEffector, EndEffectorController};
    use crate::network::MockTransport;
    use crate::teleop::axis_mapping::AxisMap;
    use crate::teleop::control_handle::ControlHandle;
    use crate::teleop::tuning::Tuning;
    use nalgebra::Vector3;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    const IDENTITY: [f64; 16] = [
        1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1.,
    ];
    const ARM_STATE: &str = "{\"arm_state\":{\"pose\":[1000,2000,3000,0,0,0]}}\r\n";

    fn sample(position: [f64; 3], buttons: u32) -> DeviceSample {
        DeviceSample {
            position,
            transform: IDENTITY,
            buttons,
            max_continuous_force: 3.,
        }
    }

    /// A transport that answers every state query and counts streamed targets and gripper
    /// commands.
    fn answering_transport(streamed: Arc<AtomicUsize>, gripper: Arc<AtomicUsize>) -> MockTransport {
        let receive_timeout = fast_policy().receive_timeout;
        let mut transport = MockTransport::new();
        transport.expect_send_all().returning(move |bytes, _| {
            if bytes.starts_with(b"{\"command\":\"set_gripper") {
                gripper.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
        transport.expect_receive().returning(move |buffer, timeout| {
            if timeout != receive_timeout {
                return Ok(None);
            }
            buffer[..ARM_STATE.len()].copy_from_slice(ARM_STATE.as_bytes());
            Ok(Some(ARM_STATE.len()))
        });
        transport.expect_try_send().returning(move |bytes| {
            assert!(bytes.starts_with(b"{\"command\":\"movep_follow\""));
            streamed.fetch_add(1, Ordering::SeqCst);
            Ok(bytes.len())
        });
        transport
    }

    fn control_loop(link: ArmLink<MockTransport>) -> ControlLoop<MockTransport> {
        shared_loop(Arc::new(Mutex::new(link)), LoopSettings::default()).0
    }

    fn shared_loop(
        link: Arc<Mutex<ArmLink<MockTransport>>>,
        settings: LoopSettings,
    ) -> (ControlLoop<MockTransport>, ControlHandle<MockTransport>) {
        ControlLoop::new(
            "device1",
            link,
            ConfigStore::in_memory().into_shared(),
            AxisMap::default(),
            Tuning::default(),
            EndEffectorController::new(
                "device1",
                EndEffector::Gripper(GripperSafetyConfig::default()),
            ),
            settings,
            TeachFrame::Tool,
        )
    }

    fn connected_loop() -> (ControlLoop<MockTransport>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let streamed = Arc::new(AtomicUsize::new(0));
        let gripper = Arc::new(AtomicUsize::new(0));
        let mut link =
            ArmLink::with_transport("robot1", answering_transport(streamed.clone(), gripper.clone()));
        link.set_query_policy(fast_policy());
        (control_loop(link), streamed, gripper)
    }

    #[test]
    fn streaming_is_rate_limited() {
        let (mut control_loop, streamed, _) = connected_loop();
        let start = Instant::now();
        for ms in 0..=100_u64 {
            let position = [ms as f64 * 0.01, 0., 0.];
            control_loop.tick_at(&sample(position, BUTTON_1), start + Duration::from_millis(ms));
        }
        assert!(control_loop.is_dragging());
        let sends = streamed.load(Ordering::SeqCst);
        assert!(sends <= 11, "{} sends", sends);
        assert!(sends >= 10, "{} sends", sends);
    }

    #[test]
    fn release_stops_streaming_and_spring() {
        let (mut control_loop, streamed, _) = connected_loop();
        let start = Instant::now();
        control_loop.tick_at(&sample([0., 0., 0.], BUTTON_1), start);
        let force = control_loop.tick_at(
            &sample([1., 0., 0.], BUTTON_1),
            start + Duration::from_millis(20),
        );
        assert_eq!(force, [-0.2, 0., 0.]);
        let sends = streamed.load(Ordering::SeqCst);
        let force = control_loop.tick_at(&sample([1., 0., 0.], 0), start + Duration::from_millis(40));
        assert_eq!(force, [0., 0., 0.]);
        control_loop.tick_at(&sample([2., 0., 0.], 0), start + Duration::from_millis(60));
        assert_eq!(streamed.load(Ordering::SeqCst), sends);
        assert!(!control_loop.is_dragging());
    }

    #[test]
    fn spring_is_clamped_to_device_limit() {
        let (mut control_loop, _, _) = connected_loop();
        let start = Instant::now();
        control_loop.tick_at(&sample([0., 0., 0.], BUTTON_1), start);
        let force = control_loop.tick_at(&sample([100., 100., 0.], BUTTON_1), start);
        assert!((Vector3::from_column_slice(&force).norm() - 3.).abs() < 1e-9);
    }

    #[test]
    fn end_effector_toggles_on_rising_edge_only() {
        let (mut control_loop, _, gripper) = connected_loop();
        let start = Instant::now();
        for _ in 0..5 {
            control_loop.tick_at(&sample([0., 0., 0.], BUTTON_2), start);
        }
        assert_eq!(gripper.load(Ordering::SeqCst), 1);
        assert!(control_loop.end_effector().is_closed());
        control_loop.tick_at(&sample([0., 0., 0.], 0), start);
        control_loop.tick_at(&sample([0., 0., 0.], BUTTON_2), start);
        assert_eq!(gripper.load(Ordering::SeqCst), 2);
        assert!(!control_loop.end_effector().is_closed());
    }

    #[test]
    fn disconnected_arm_keeps_haptics() {
        let mut control_loop = control_loop(ArmLink::disconnected("robot2"));
        let start = Instant::now();
        control_loop.tick_at(&sample([0., 0., 0.], BUTTON_1), start);
        assert!(control_loop.is_dragging());
        let force = control_loop.tick_at(
            &sample([0., 5., 0.], BUTTON_1),
            start + Duration::from_millis(50),
        );
        assert_eq!(force, [0., -1., 0.]);
    }

    #[test]
    fn axis_map_changes_apply_at_next_tick() {
        let link: ArmLink<MockTransport> = ArmLink::disconnected("robot1");
        let (mut control_loop, mut handle) = ControlLoop::new(
            "device1",
            Arc::new(Mutex::new(link)),
            ConfigStore::in_memory().into_shared(),
            AxisMap::default(),
            Tuning::default(),
            EndEffectorController::new(
                "device1",
                EndEffector::Gripper(GripperSafetyConfig::default()),
            ),
            LoopSettings::default(),
            TeachFrame::Tool,
        );
        let map = AxisMap::new([0, 1, 2], [0, 1, 2], [1, 1, 1], [1, 1, 1]).unwrap();
        handle.set_axis_map(map).unwrap();
        assert_eq!(*control_loop.axis_map(), AxisMap::default());
        control_loop.tick(&sample([0., 0., 0.], 0));
        assert_eq!(*control_loop.axis_map(), map);
    }

    #[test]
    fn busy_link_defers_buttons_without_blocking() {
        let streamed = Arc::new(AtomicUsize::new(0));
        let gripper = Arc::new(AtomicUsize::new(0));
        let mut link =
            ArmLink::with_transport("robot1", answering_transport(streamed, gripper.clone()));
        link.set_query_policy(fast_policy());
        let link = Arc::new(Mutex::new(link));
        let (mut control_loop, _handle) = shared_loop(link.clone(), LoopSettings::default());
        let start = Instant::now();

        let guard = link.lock().unwrap();
        let tick_start = Instant::now();
        control_loop.tick_at(&sample([0., 0., 0.], BUTTON_1 | BUTTON_2), start);
        assert!(tick_start.elapsed() < Duration::from_millis(50));
        assert!(!control_loop.is_dragging());
        assert!(!control_loop.end_effector().is_closed());
        assert_eq!(gripper.load(Ordering::SeqCst), 0);
        drop(guard);

        control_loop.tick_at(
            &sample([0., 0., 0.], BUTTON_1 | BUTTON_2),
            start + Duration::from_millis(1),
        );
        assert!(control_loop.is_dragging());
        assert!(control_loop.end_effector().is_closed());
        assert_eq!(gripper.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drag_released_before_the_link_frees_is_dropped() {
        let link: ArmLink<MockTransport> = ArmLink::disconnected("robot1");
        let link = Arc::new(Mutex::new(link));
        let (mut control_loop, _handle) = shared_loop(link.clone(), LoopSettings::default());
        let start = Instant::now();
        let guard = link.lock().unwrap();
        control_loop.tick_at(&sample([0., 0., 0.], BUTTON_1), start);
        control_loop.tick_at(&sample([0., 0., 0.], 0), start);
        drop(guard);
        let force = control_loop.tick_at(&sample([5., 0., 0.], 0), start);
        assert!(!control_loop.is_dragging());
        assert_eq!(force, [0., 0., 0.]);
    }

    #[test]
    fn tick_stays_fast_while_the_handle_queries() {
        let mut transport = MockTransport::new();
        transport.expect_send_all().returning(|_, _| Ok(()));
        transport.expect_receive().returning(|_, timeout| {
            thread::sleep(timeout);
            Ok(None)
        });
        let mut link = ArmLink::with_transport("robot1", transport);
        link.set_query_policy(fast_policy());
        let (mut control_loop, handle) =
            shared_loop(Arc::new(Mutex::new(link)), LoopSettings::default());

        let query = thread::spawn(move || handle.query_arm_state().is_err());
        thread::sleep(Duration::from_millis(50));
        let tick_start = Instant::now();
        control_loop.tick(&sample([0., 0., 0.], BUTTON_2));
        let tick_duration = tick_start.elapsed();
        assert!(query.join().unwrap());
        assert!(
            tick_duration < Duration::from_millis(50),
            "tick took {:?}",
            tick_duration
        );
        control_loop.tick(&sample([0., 0., 0.], BUTTON_2));
        assert!(control_loop.end_effector().is_closed());
    }

    #[test]
    fn receive_buffer_is_drained_every_clear_interval() {
        let zero_timeout_reads = Arc::new(AtomicUsize::new(0));
        let streamed = Arc::new(AtomicUsize::new(0));
        let receive_timeout = fast_policy().receive_timeout;
        let mut transport = MockTransport::new();
        transport.expect_send_all().returning(|_, _| Ok(()));
        let reads = zero_timeout_reads.clone();
        transport.expect_receive().returning(move |buffer, timeout| {
            if timeout == Duration::from_millis(0) {
                reads.fetch_add(1, Ordering::SeqCst);
            }
            if timeout != receive_timeout {
                return Ok(None);
            }
            buffer[..ARM_STATE.len()].copy_from_slice(ARM_STATE.as_bytes());
            Ok(Some(ARM_STATE.len()))
        });
        let sends = streamed.clone();
        transport.expect_try_send().returning(move |bytes| {
            sends.fetch_add(1, Ordering::SeqCst);
            Ok(bytes.len())
        });
        let mut link = ArmLink::with_transport("robot1", transport);
        link.set_query_policy(fast_policy());
        let settings = LoopSettings {
            buffer_clear_interval: 3,
            ..LoopSettings::default()
        };
        let (mut control_loop, _handle) = shared_loop(Arc::new(Mutex::new(link)), settings);

        let start = Instant::now();
        control_loop.tick_at(&sample([0., 0., 0.], BUTTON_1), start);
        assert_eq!(streamed.load(Ordering::SeqCst), 1);
        let reads_after_press = zero_timeout_reads.load(Ordering::SeqCst);
        for k in 1..9_u64 {
            control_loop.tick_at(
                &sample([k as f64, 0., 0.], BUTTON_1),
                start + Duration::from_millis(10 * k),
            );
        }
        assert_eq!(streamed.load(Ordering::SeqCst), 9);
        assert_eq!(
            zero_timeout_reads.load(Ordering::SeqCst) - reads_after_press,
            3
        );
    }

    #[test]
    fn loop_settings_from_config() {
        let mut config = ConfigStore::in_memory();
        config.set_i64("system.control_frequency", 20);
        let settings = LoopSettings::from_config(&mut config);
        assert_eq!(settings.control_interval, Duration::from_millis(20));
        assert_eq!(settings.buffer_clear_interval, 100);
        assert_eq!(settings.debug_interval, 50);
    }
}
