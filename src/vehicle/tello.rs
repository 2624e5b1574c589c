//! Tello text SDK over UDP
//!
//! Commands go to the vehicle's command port and most of them are answered
//! with `ok` or an error string. The drone's H.264 video is expected to be
//! decoded outside this process into a V4L2 loopback device, e.g.
//! `ffmpeg -i udp://0.0.0.0:11111 -f v4l2 -pix_fmt yuyv422 /dev/video10`.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::{MotionCommand, Vehicle, VehicleError};
use crate::capture::{FrameFeed, V4l2Feed};
use crate::{CaptureConfig, VehicleConfig};

const MAX_REPLY: usize = 1518;

pub struct Tello {
    config: VehicleConfig,
    capture: CaptureConfig,
    socket: Mutex<Option<UdpSocket>>,
    airborne: AtomicBool,
    streaming: AtomicBool,
}

impl Tello {
    pub fn new(config: VehicleConfig, capture: CaptureConfig) -> Self {
        Self {
            config,
            capture,
            socket: Mutex::new(None),
            airborne: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
        }
    }

    fn socket(&self) -> MutexGuard<'_, Option<UdpSocket>> {
        self.socket.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send a command and wait for its reply. The socket lock is held for the
    /// whole exchange so replies can't be paired with the wrong command.
    #[instrument(skip(self), level = "debug")]
    fn request(&self, command: &str) -> Result<String, VehicleError> {
        let guard = self.socket();
        let socket = guard.as_ref().ok_or(VehicleError::NotConnected)?;

        socket.send(command.as_bytes())?;
        let mut buf = [0u8; MAX_REPLY];
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(VehicleError::Timeout(command.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let reply = String::from_utf8_lossy(&buf[..len]).trim().to_string();
        debug!("{} -> {}", command, reply);
        Ok(reply)
    }

    fn expect_ok(&self, command: &str) -> Result<(), VehicleError> {
        let reply = self.request(command)?;
        if reply.eq_ignore_ascii_case("ok") {
            Ok(())
        } else {
            Err(VehicleError::Rejected {
                command: command.to_string(),
                reply,
            })
        }
    }

    /// Commands the SDK doesn't acknowledge
    fn send_only(&self, command: &str) -> Result<(), VehicleError> {
        let guard = self.socket();
        let socket = guard.as_ref().ok_or(VehicleError::NotConnected)?;
        socket.send(command.as_bytes())?;
        Ok(())
    }
}

impl Vehicle for Tello {
    fn connect(&self) -> Result<(), VehicleError> {
        let socket = UdpSocket::bind(&self.config.local_bind)?;
        socket.connect(&self.config.address)?;
        socket.set_read_timeout(Some(Duration::from_millis(self.config.response_timeout_ms)))?;
        *self.socket() = Some(socket);

        info!("Entering SDK mode on {}", self.config.address);
        self.expect_ok("command")
    }

    fn set_speed(&self, speed: u32) -> Result<(), VehicleError> {
        self.expect_ok(&format!("speed {speed}"))
    }

    fn stream_on(&self) -> Result<(), VehicleError> {
        self.expect_ok("streamon")?;
        self.streaming.store(true, Ordering::Release);
        Ok(())
    }

    fn stream_off(&self) -> Result<(), VehicleError> {
        self.expect_ok("streamoff")?;
        self.streaming.store(false, Ordering::Release);
        Ok(())
    }

    fn frame_feed(&self) -> Result<Box<dyn FrameFeed>, VehicleError> {
        let feed = V4l2Feed::open(self.capture.clone())
            .map_err(|e| VehicleError::Feed(format!("{}: {}", self.capture.device, e)))?;
        Ok(Box::new(feed))
    }

    fn takeoff(&self) -> Result<(), VehicleError> {
        self.expect_ok("takeoff")?;
        self.airborne.store(true, Ordering::Release);
        Ok(())
    }

    fn land(&self) -> Result<(), VehicleError> {
        self.expect_ok("land")?;
        self.airborne.store(false, Ordering::Release);
        Ok(())
    }

    fn send_motion(&self, motion: MotionCommand) -> Result<(), VehicleError> {
        self.send_only(&motion.to_string())
    }

    fn temperature(&self) -> Result<i32, VehicleError> {
        let reply = self.request("temp?")?;
        parse_temperature(&reply).ok_or(VehicleError::BadReply {
            command: "temp?".into(),
            reply,
        })
    }

    fn battery(&self) -> Result<u8, VehicleError> {
        let reply = self.request("battery?")?;
        reply.parse().map_err(|_| VehicleError::BadReply {
            command: "battery?".into(),
            reply,
        })
    }

    fn end(&self) {
        if self.socket().is_none() {
            return;
        }
        if self.airborne.load(Ordering::Acquire) {
            if let Err(e) = self.land() {
                warn!("Landing during teardown failed: {}", e);
            }
        }
        if self.streaming.load(Ordering::Acquire) {
            if let Err(e) = self.stream_off() {
                warn!("Stopping video stream during teardown failed: {}", e);
            }
        }
        *self.socket() = None;
        info!("Tello connection closed");
    }
}

/// `temp?` answers with a range such as `60~62C`; report its mean
fn parse_temperature(reply: &str) -> Option<i32> {
    let range = reply.trim().trim_end_matches(['C', 'c']);
    match range.split_once('~') {
        Some((low, high)) => {
            let (low, high): (i32, i32) = (low.trim().parse().ok()?, high.trim().parse().ok()?);
            Some((low + high) / 2)
        }
        None => range.trim().parse().ok(),
    }
}
