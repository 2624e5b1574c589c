//! Vehicle collaborator interface and adapters

pub mod sim;
pub mod tello;

use std::fmt;

use thiserror::Error;

use crate::capture::FrameFeed;

pub use sim::Simulator;
pub use tello::Tello;

/// Runtime failure of a single vehicle command
#[derive(Debug, Error)]
pub enum VehicleError {
    #[error("vehicle not connected")]
    NotConnected,

    #[error("command `{command}` rejected: {reply}")]
    Rejected { command: String, reply: String },

    #[error("no reply to `{0}`")]
    Timeout(String),

    #[error("unexpected reply to `{command}`: {reply}")]
    BadReply { command: String, reply: String },

    #[error("video feed unavailable: {0}")]
    Feed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One combined rc command, every axis in `-100..=100`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionCommand {
    pub left_right: i32,
    pub forward_back: i32,
    pub up_down: i32,
    pub yaw: i32,
}

impl MotionCommand {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rc {} {} {} {}",
            self.left_right, self.forward_back, self.up_down, self.yaw
        )
    }
}

/// Remote vehicle. Shared between the control loop and the supervisor, so
/// every call takes `&self`.
pub trait Vehicle: Send + Sync {
    fn connect(&self) -> Result<(), VehicleError>;

    /// Speed in cm/s
    fn set_speed(&self, speed: u32) -> Result<(), VehicleError>;

    fn stream_on(&self) -> Result<(), VehicleError>;

    fn stream_off(&self) -> Result<(), VehicleError>;

    /// Handle to the decoded video feed. Call after `stream_on`.
    fn frame_feed(&self) -> Result<Box<dyn FrameFeed>, VehicleError>;

    fn takeoff(&self) -> Result<(), VehicleError>;

    fn land(&self) -> Result<(), VehicleError>;

    fn send_motion(&self, motion: MotionCommand) -> Result<(), VehicleError>;

    /// Degrees Celsius
    fn temperature(&self) -> Result<i32, VehicleError>;

    /// Percent
    fn battery(&self) -> Result<u8, VehicleError>;

    /// Release every resource. Must be safe to call more than once.
    fn end(&self);
}
