//! Feed → FrameBox producer loop

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::capture::{FeedError, FrameFeed};
use crate::pipeline::FrameBox;
use crate::session::{SessionState, StopReason};

/// Frame rate over the last N frame arrivals
#[derive(Debug)]
pub struct RateWindow {
    arrivals: VecDeque<Instant>,
    capacity: usize,
}

impl RateWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            arrivals: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, at: Instant) {
        if self.arrivals.len() == self.capacity {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(at);
    }

    /// Frames per second across the window, once two arrivals are known
    pub fn fps(&self) -> Option<f64> {
        let (first, last) = (self.arrivals.front()?, self.arrivals.back()?);
        let span = last.duration_since(*first).as_secs_f64();
        (span > 0.0).then(|| (self.arrivals.len() - 1) as f64 / span)
    }

    pub fn is_full(&self) -> bool {
        self.arrivals.len() == self.capacity
    }
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionExit {
    /// The session stop flag was observed
    Stopped,
    /// The feed ended; the session was asked to stop
    FeedTerminated,
}

pub struct AcquisitionLoop {
    feed: Box<dyn FrameFeed>,
    frames: Arc<FrameBox>,
    session: Arc<SessionState>,
    window: RateWindow,
}

impl AcquisitionLoop {
    pub fn new(
        feed: Box<dyn FrameFeed>,
        frames: Arc<FrameBox>,
        session: Arc<SessionState>,
        window: usize,
    ) -> Self {
        Self {
            feed,
            frames,
            session,
            window: RateWindow::new(window),
        }
    }

    /// Run on a dedicated thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<AcquisitionExit>> {
        thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || self.run())
    }

    /// Pull and publish until the session stops or the feed ends
    pub fn run(mut self) -> AcquisitionExit {
        info!("Acquisition loop started");
        let mut last_report = Instant::now();

        let exit = loop {
            if self.session.should_stop() {
                break AcquisitionExit::Stopped;
            }

            match self.feed.next_frame() {
                Ok(frame) => {
                    self.window.record(frame.timestamp);
                    self.frames.publish(frame);
                }
                Err(e) => {
                    match e {
                        FeedError::Stopped => info!("Video feed stopped"),
                        FeedError::Device(e) => error!("Video feed failed: {}", e),
                    }
                    self.session.request_stop(StopReason::FeedTerminated);
                    break AcquisitionExit::FeedTerminated;
                }
            }

            if self.feed.is_stopped() {
                info!("Video feed reports stopped");
                self.session.request_stop(StopReason::FeedTerminated);
                break AcquisitionExit::FeedTerminated;
            }

            if let Some(fps) = self.window.fps() {
                metrics::gauge!("acquisition_fps").set(fps);
                if self.window.is_full() && last_report.elapsed() >= Duration::from_secs(5) {
                    debug!("Acquisition at {:.1} fps", fps);
                    last_report = Instant::now();
                }
            }
        };

        info!(
            "Acquisition loop exiting ({:?}) after {} frames",
            exit,
            self.frames.published()
        );
        exit
    }
}
