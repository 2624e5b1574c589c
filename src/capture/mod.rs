pub mod decoder;
pub mod feed;
pub mod frame;
pub mod pattern;
pub mod v4l2;

pub use feed::{FeedError, FrameFeed};
pub use frame::Frame;
pub use frame::PixelFormat;
pub use pattern::PatternFeed;
pub use v4l2::V4l2Feed;
