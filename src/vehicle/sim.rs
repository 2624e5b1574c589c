//! In-process vehicle for headless runs and tests

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use super::{MotionCommand, Vehicle, VehicleError};
use crate::capture::{FrameFeed, PatternFeed};

/// Vehicle operations, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Connect,
    SetSpeed,
    StreamOn,
    StreamOff,
    Takeoff,
    Land,
    Motion,
    Temperature,
    Battery,
}

/// Everything the simulator was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Connect,
    SetSpeed(u32),
    StreamOn,
    StreamOff,
    Takeoff,
    Land,
    Motion(MotionCommand),
    Temperature,
    Battery,
    End,
}

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    airborne: bool,
    streaming: bool,
    events: Vec<SimEvent>,
    failing: HashSet<Op>,
}

/// Simulated vehicle with a synthetic video feed
#[derive(Debug)]
pub struct Simulator {
    state: Mutex<SimState>,
    width: u32,
    height: u32,
    fps: u32,
    frame_limit: Option<u64>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(320, 240, 30)
    }
}

impl Simulator {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            width,
            height,
            fps,
            frame_limit: None,
        }
    }

    /// The video feed ends after `frames` frames
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Make every future call of `op` fail
    pub fn fail(&self, op: Op) {
        self.lock().failing.insert(op);
    }

    pub fn recover(&self, op: Op) {
        self.lock().failing.remove(&op);
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.lock().events.clone()
    }

    pub fn motions(&self) -> Vec<MotionCommand> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                SimEvent::Motion(motion) => Some(*motion),
                _ => None,
            })
            .collect()
    }

    pub fn is_airborne(&self) -> bool {
        self.lock().airborne
    }

    pub fn end_calls(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|event| **event == SimEvent::End)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the log from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and apply the failure and connection rules
    fn call(&self, op: Op, event: SimEvent) -> Result<MutexGuard<'_, SimState>, VehicleError> {
        let mut state = self.lock();
        debug!("sim <- {:?}", event);
        state.events.push(event);
        if op != Op::Connect && !state.connected {
            return Err(VehicleError::NotConnected);
        }
        if state.failing.contains(&op) {
            return Err(VehicleError::Rejected {
                command: format!("{op:?}").to_lowercase(),
                reply: "error".into(),
            });
        }
        Ok(state)
    }
}

impl Vehicle for Simulator {
    fn connect(&self) -> Result<(), VehicleError> {
        self.call(Op::Connect, SimEvent::Connect)?.connected = true;
        info!("Simulator connected");
        Ok(())
    }

    fn set_speed(&self, speed: u32) -> Result<(), VehicleError> {
        self.call(Op::SetSpeed, SimEvent::SetSpeed(speed)).map(drop)
    }

    fn stream_on(&self) -> Result<(), VehicleError> {
        self.call(Op::StreamOn, SimEvent::StreamOn)?.streaming = true;
        Ok(())
    }

    fn stream_off(&self) -> Result<(), VehicleError> {
        self.call(Op::StreamOff, SimEvent::StreamOff)?.streaming = false;
        Ok(())
    }

    fn frame_feed(&self) -> Result<Box<dyn FrameFeed>, VehicleError> {
        if !self.lock().streaming {
            return Err(VehicleError::Feed("stream is off".into()));
        }
        let feed = PatternFeed::new(self.width, self.height, self.fps);
        let feed = match self.frame_limit {
            Some(limit) => feed.with_limit(limit),
            None => feed,
        };
        Ok(Box::new(feed))
    }

    fn takeoff(&self) -> Result<(), VehicleError> {
        self.call(Op::Takeoff, SimEvent::Takeoff)?.airborne = true;
        Ok(())
    }

    fn land(&self) -> Result<(), VehicleError> {
        self.call(Op::Land, SimEvent::Land)?.airborne = false;
        Ok(())
    }

    fn send_motion(&self, motion: MotionCommand) -> Result<(), VehicleError> {
        self.call(Op::Motion, SimEvent::Motion(motion)).map(drop)
    }

    fn temperature(&self) -> Result<i32, VehicleError> {
        self.call(Op::Temperature, SimEvent::Temperature).map(|_| 42)
    }

    fn battery(&self) -> Result<u8, VehicleError> {
        self.call(Op::Battery, SimEvent::Battery).map(|_| 87)
    }

    fn end(&self) {
        let mut state = self.lock();
        state.events.push(SimEvent::End);
        state.airborne = false;
        state.streaming = false;
        state.connected = false;
    }
}
