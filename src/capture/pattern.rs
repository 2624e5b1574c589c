//! Synthetic test-pattern feed

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::feed::{FeedError, FrameFeed};
use super::frame::{Frame, PixelFormat};

/// Moving vertical bar over a colour gradient, RGB24, paced at a fixed rate.
pub struct PatternFeed {
    width: u32,
    height: u32,
    period: Duration,
    next_due: Instant,
    sequence: u64,
    limit: Option<u64>,
    stopped: bool,
}

impl PatternFeed {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            period: Duration::from_secs(1) / fps.max(1),
            next_due: Instant::now(),
            sequence: 0,
            limit: None,
            stopped: false,
        }
    }

    /// End the feed after `frames` frames
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let bar = (self.sequence as usize * 4) % w.max(1);
        let mut pixels = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                if x.abs_diff(bar) < 4 {
                    pixels.extend_from_slice(&[255, 255, 255]);
                } else {
                    let r = (x * 255 / w.max(1)) as u8;
                    let g = (y * 255 / h.max(1)) as u8;
                    pixels.extend_from_slice(&[r, g, (self.sequence % 256) as u8]);
                }
            }
        }
        pixels
    }
}

impl FrameFeed for PatternFeed {
    fn next_frame(&mut self) -> Result<Frame, FeedError> {
        if self.stopped || self.limit.is_some_and(|limit| self.sequence >= limit) {
            self.stopped = true;
            return Err(FeedError::Stopped);
        }

        let now = Instant::now();
        if self.next_due > now {
            thread::sleep(self.next_due - now);
        }
        self.next_due = self.next_due.max(now) + self.period;

        self.sequence += 1;
        Ok(Frame::new(
            self.sequence,
            self.width,
            self.height,
            PixelFormat::Rgb24,
            Bytes::from(self.render()),
        ))
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_sized_frames_until_limit() {
        let mut feed = PatternFeed::new(16, 8, 1000).with_limit(3);
        for expected in 1..=3 {
            let frame = feed.next_frame().unwrap();
            assert_eq!(frame.sequence(), expected);
            assert_eq!(Some(frame.data.len()), frame.expected_len());
        }
        assert!(matches!(feed.next_frame(), Err(FeedError::Stopped)));
        assert!(feed.is_stopped());
    }
}
