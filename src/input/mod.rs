//! Operator input sources

#[cfg(feature = "sdl")]
pub mod sdl;

use std::collections::VecDeque;

#[cfg(feature = "sdl")]
pub use sdl::SdlConsole;

/// Keys the pilot console cares about. Everything else maps to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    W,
    S,
    A,
    D,
    T,
    L,
    Y,
    B,
    Escape,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(Key),
    KeyUp(Key),
    /// Window closed by the operator
    Quit,
}

/// Non-blocking source of operator input, polled once per control tick
pub trait InputSource {
    /// Every event that arrived since the previous poll
    fn poll_events(&mut self) -> Vec<InputEvent>;
}

/// Headless operation: no operator, never any input
#[derive(Debug, Default)]
pub struct NoInput;

impl InputSource for NoInput {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        Vec::new()
    }
}

/// Replays prepared batches, one batch per poll, then stays silent
#[derive(Debug, Default)]
pub struct ScriptedInput {
    batches: VecDeque<Vec<InputEvent>>,
}

impl ScriptedInput {
    pub fn new<I>(batches: I) -> Self
    where
        I: IntoIterator<Item = Vec<InputEvent>>,
    {
        Self {
            batches: batches.into_iter().collect(),
        }
    }

    pub fn push(&mut self, batch: Vec<InputEvent>) {
        self.batches.push_back(batch);
    }

    pub fn is_drained(&self) -> bool {
        self.batches.is_empty()
    }
}

impl InputSource for ScriptedInput {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        self.batches.pop_front().unwrap_or_default()
    }
}

impl<T: InputSource + ?Sized> InputSource for Box<T> {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        (**self).poll_events()
    }
}
