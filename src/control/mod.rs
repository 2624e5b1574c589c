pub mod control_loop;
pub mod keymap;
pub mod velocity;

pub use control_loop::{ControlLoop, ControlSession};
pub use velocity::{Axis, VelocityState};
