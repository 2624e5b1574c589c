use crate::vehicle::MotionCommand;

/// Largest magnitude the vehicle accepts on any axis
pub const AXIS_LIMIT: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    ForwardBack,
    LeftRight,
    UpDown,
    Yaw,
}

/// Four independent velocity axes, each clamped to `-AXIS_LIMIT..=AXIS_LIMIT`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VelocityState {
    forward_back: i32,
    left_right: i32,
    up_down: i32,
    yaw: i32,
}

impl VelocityState {
    pub fn set(&mut self, axis: Axis, value: i32) {
        *self.axis_mut(axis) = value.clamp(-AXIS_LIMIT, AXIS_LIMIT);
    }

    pub fn reset(&mut self, axis: Axis) {
        *self.axis_mut(axis) = 0;
    }

    pub fn get(&self, axis: Axis) -> i32 {
        match axis {
            Axis::ForwardBack => self.forward_back,
            Axis::LeftRight => self.left_right,
            Axis::UpDown => self.up_down,
            Axis::Yaw => self.yaw,
        }
    }

    fn axis_mut(&mut self, axis: Axis) -> &mut i32 {
        match axis {
            Axis::ForwardBack => &mut self.forward_back,
            Axis::LeftRight => &mut self.left_right,
            Axis::UpDown => &mut self.up_down,
            Axis::Yaw => &mut self.yaw,
        }
    }

    pub fn command(&self) -> MotionCommand {
        MotionCommand {
            left_right: self.left_right,
            forward_back: self.forward_back,
            up_down: self.up_down,
            yaw: self.yaw,
        }
    }
}
