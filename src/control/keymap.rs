//! Static key table

use crate::input::Key;

use super::velocity::Axis;

/// What a key does when pressed / released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Sets `axis` to `sign * magnitude` on key-down, zero on key-up
    Axis { axis: Axis, sign: i32 },
    /// Fires on key-up
    Discrete(Action),
    /// Ends the session on key-down
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Takeoff,
    Land,
    QueryTemperature,
    QueryBattery,
}

pub fn binding(key: Key) -> Option<Binding> {
    use Axis::*;
    let axis = |axis, sign| Some(Binding::Axis { axis, sign });
    match key {
        Key::Up => axis(ForwardBack, 1),
        Key::Down => axis(ForwardBack, -1),
        Key::Left => axis(LeftRight, -1),
        Key::Right => axis(LeftRight, 1),
        Key::W => axis(UpDown, 1),
        Key::S => axis(UpDown, -1),
        Key::A => axis(Yaw, -1),
        Key::D => axis(Yaw, 1),
        Key::T => Some(Binding::Discrete(Action::Takeoff)),
        Key::L => Some(Binding::Discrete(Action::Land)),
        Key::Y => Some(Binding::Discrete(Action::QueryTemperature)),
        Key::B => Some(Binding::Discrete(Action::QueryBattery)),
        Key::Escape => Some(Binding::Stop),
        Key::Other => None,
    }
}
