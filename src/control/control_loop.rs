//! Fixed-rate pilot loop: input → velocity axes → vehicle

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::keymap::{binding, Action, Binding};
use super::velocity::VelocityState;
use crate::input::{InputEvent, InputSource, Key};
use crate::session::{SessionState, StopReason};
use crate::vehicle::{MotionCommand, Vehicle, VehicleError};

/// Whether velocity is forwarded to the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSession {
    Grounded,
    Airborne,
}

pub struct ControlLoop<I> {
    input: I,
    vehicle: Arc<dyn Vehicle>,
    session: Arc<SessionState>,
    velocity: VelocityState,
    state: ControlSession,
    magnitude: i32,
    period: Duration,
    /// Discrete keys already fired since their last key-down
    fired: HashSet<Key>,
    motion_failing: bool,
}

impl<I: InputSource> ControlLoop<I> {
    pub fn new(
        input: I,
        vehicle: Arc<dyn Vehicle>,
        session: Arc<SessionState>,
        magnitude: i32,
        period: Duration,
    ) -> Self {
        Self {
            input,
            vehicle,
            session,
            velocity: VelocityState::default(),
            state: ControlSession::Grounded,
            magnitude,
            period,
            fired: HashSet::new(),
            motion_failing: false,
        }
    }

    pub fn state(&self) -> ControlSession {
        self.state
    }

    pub fn velocity(&self) -> &VelocityState {
        &self.velocity
    }

    /// Tick until the session stop flag is set
    pub fn run(&mut self) -> ControlSession {
        info!("Control loop started ({:?} per tick)", self.period);

        while !self.session.should_stop() {
            let started = Instant::now();
            self.tick();
            thread::sleep(self.period.saturating_sub(started.elapsed()));
        }

        info!("Control loop exiting in state {:?}", self.state);
        self.state
    }

    /// One tick: drain pending input, then forward velocity if airborne.
    /// Returns the motion command that was sent, if any.
    pub fn tick(&mut self) -> Option<MotionCommand> {
        for event in self.input.poll_events() {
            self.handle(event);
        }

        if self.state != ControlSession::Airborne {
            return None;
        }

        let motion = self.velocity.command();
        match self.vehicle.send_motion(motion) {
            Ok(()) => {
                if self.motion_failing {
                    info!("Motion commands accepted again");
                    self.motion_failing = false;
                }
            }
            Err(e) => {
                if !self.motion_failing {
                    warn!("Motion command failed: {}", e);
                    self.motion_failing = true;
                }
                metrics::counter!("control_commands_failed").increment(1);
            }
        }
        Some(motion)
    }

    fn handle(&mut self, event: InputEvent) {
        match event {
            InputEvent::Quit => self.session.request_stop(StopReason::Operator),
            InputEvent::KeyDown(key) => {
                self.fired.remove(&key);
                match binding(key) {
                    Some(Binding::Axis { axis, sign }) => {
                        self.velocity.set(axis, sign * self.magnitude)
                    }
                    Some(Binding::Stop) => self.session.request_stop(StopReason::Operator),
                    Some(Binding::Discrete(_)) | None => {}
                }
            }
            InputEvent::KeyUp(key) => match binding(key) {
                Some(Binding::Axis { axis, .. }) => self.velocity.reset(axis),
                Some(Binding::Discrete(action)) => {
                    if self.fired.insert(key) {
                        self.perform(action);
                    } else {
                        debug!("Ignoring repeated release of {:?}", key);
                    }
                }
                Some(Binding::Stop) | None => {}
            },
        }
    }

    /// Discrete commands. Failures are logged and never end the loop.
    fn perform(&mut self, action: Action) {
        let result = match action {
            Action::Takeoff => {
                if self.state == ControlSession::Airborne {
                    debug!("Already airborne, takeoff ignored");
                    return;
                }
                self.vehicle.takeoff().map(|()| {
                    info!("Takeoff");
                    self.state = ControlSession::Airborne;
                })
            }
            Action::Land => self.vehicle.land().map(|()| {
                info!("Landed");
                self.state = ControlSession::Grounded;
            }),
            Action::QueryTemperature => self
                .vehicle
                .temperature()
                .map(|celsius| info!("Temperature: {}°C", celsius)),
            Action::QueryBattery => self
                .vehicle
                .battery()
                .map(|percent| info!("Battery: {}%", percent)),
        };

        if let Err(e) = result {
            command_failed(action, &e);
        }
    }
}

fn command_failed(action: Action, error: &VehicleError) {
    warn!("{:?} failed: {}", action, error);
    metrics::counter!("control_commands_failed").increment(1);
}
