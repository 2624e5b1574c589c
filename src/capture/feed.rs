//! Frame feed collaborator interface

use thiserror::Error;

use super::Frame;

/// Terminal conditions reported by a feed. None of them is retried.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed stopped")]
    Stopped,

    #[error("capture device error: {0}")]
    Device(#[from] std::io::Error),
}

/// A source of decoded frames, pulled one at a time.
///
/// `next_frame` may block until the next frame is available; that wait is what
/// paces the acquisition loop. Any error ends the feed for the session.
pub trait FrameFeed: Send {
    fn next_frame(&mut self) -> Result<Frame, FeedError>;

    /// True once the feed can no longer produce frames.
    fn is_stopped(&self) -> bool;
}
