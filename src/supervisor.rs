//! Process lifetime: vehicle setup, the three concurrent units, shutdown
//!
//! Threads: acquisition runs on its own OS thread, the HTTP listener and its
//! viewer tasks on a tokio runtime, and the control loop on the calling thread
//! (SDL input must stay on the thread that created the window).

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::control::ControlLoop;
use crate::input::InputSource;
use crate::pipeline::{AcquisitionExit, AcquisitionLoop, Encoder, FrameBox};
use crate::session::{SessionState, StopReason};
use crate::stream::{StreamServer, StreamState};
use crate::vehicle::{Vehicle, VehicleError};
use crate::Config;

/// Failures before the concurrent phase starts
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("{step} failed: {source}")]
    Vehicle {
        step: &'static str,
        #[source]
        source: VehicleError,
    },

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("failed to start acquisition thread: {0}")]
    Thread(#[source] io::Error),
}

/// Calls `Vehicle::end` however `run` exits
struct Teardown(Arc<dyn Vehicle>);

impl Drop for Teardown {
    fn drop(&mut self) {
        info!("Releasing vehicle");
        self.0.end();
    }
}

pub struct Supervisor {
    config: Config,
    vehicle: Arc<dyn Vehicle>,
    frames: Arc<FrameBox>,
    session: Arc<SessionState>,
}

impl Supervisor {
    pub fn new(config: Config, vehicle: Arc<dyn Vehicle>) -> Self {
        Self {
            config,
            vehicle,
            frames: Arc::new(FrameBox::new()),
            session: Arc::new(SessionState::new()),
        }
    }

    /// The frame box shared by acquisition and viewers (e.g. for a local preview)
    pub fn frames(&self) -> Arc<FrameBox> {
        self.frames.clone()
    }

    pub fn session(&self) -> Arc<SessionState> {
        self.session.clone()
    }

    /// Run the whole session. Blocks the calling thread in the control loop
    /// and returns why the session ended.
    pub fn run<I: InputSource>(self, input: I) -> Result<StopReason, SetupError> {
        let _teardown = Teardown(self.vehicle.clone());

        self.setup()?;
        let feed = self
            .vehicle
            .frame_feed()
            .map_err(|source| SetupError::Vehicle {
                step: "opening video feed",
                source,
            })?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("aerocast-io")
            .build()
            .map_err(SetupError::Runtime)?;

        let stream = &self.config.stream;
        let state = StreamState::new(
            self.frames.clone(),
            Encoder::new(stream.jpeg_quality),
            stream.period(),
        )
        .with_stall_timeout(stream.stall_timeout());
        let server = runtime
            .block_on(StreamServer::bind((stream.host.as_str(), stream.port), state))
            .map_err(|source| SetupError::Bind {
                addr: format!("{}, port {}", stream.host, stream.port),
                source,
            })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_task = runtime.spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = server.serve(shutdown).await {
                error!("Stream server failed: {}", e);
            }
        });

        let session = self.session.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                session.request_stop(StopReason::Interrupt);
            }
        });

        let acquisition = AcquisitionLoop::new(
            feed,
            self.frames.clone(),
            self.session.clone(),
            self.config.acquisition.window,
        )
        .spawn()
        .map_err(SetupError::Thread)?;

        let control = &self.config.control;
        let final_state = ControlLoop::new(
            input,
            self.vehicle.clone(),
            self.session.clone(),
            control.velocity,
            control.tick(),
        )
        .run();
        info!("Pilot finished in state {:?}", final_state);

        // The control loop only returns once a stop was requested
        let grace = self.config.stream.shutdown_grace();
        join_acquisition(acquisition, grace);

        let _ = shutdown_tx.send(());
        runtime.block_on(async {
            if tokio::time::timeout(grace, server_task).await.is_err() {
                warn!("Viewers still connected after {:?}, closing them", grace);
            }
        });
        runtime.shutdown_timeout(grace);

        let reason = self.session.reason().unwrap_or(StopReason::Operator);
        info!("Session ended: {}", reason);
        Ok(reason)
    }

    fn setup(&self) -> Result<(), SetupError> {
        let vehicle = &self.vehicle;
        let step = |step: &'static str, result: Result<(), VehicleError>| {
            result.map_err(|source| SetupError::Vehicle { step, source })
        };

        step("connecting to vehicle", vehicle.connect())?;
        step(
            "setting speed",
            vehicle.set_speed(self.config.vehicle.speed),
        )?;
        // Streaming may still be on from a previous run that didn't exit cleanly
        step("stopping video stream", vehicle.stream_off())?;
        step("starting video stream", vehicle.stream_on())?;

        info!("Vehicle ready");
        Ok(())
    }
}

/// Wait up to `grace` for the acquisition thread. A feed stuck in a blocking
/// read is left behind rather than hanging shutdown.
fn join_acquisition(handle: JoinHandle<AcquisitionExit>, grace: Duration) {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("Acquisition thread did not stop within {:?}", grace);
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    match handle.join() {
        Ok(exit) => info!("Acquisition finished: {:?}", exit),
        Err(_) => error!("Acquisition thread panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputEvent, Key, NoInput, ScriptedInput};
    use crate::vehicle::sim::{Op, SimEvent};
    use crate::vehicle::Simulator;

    fn config() -> Config {
        let mut config = Config::default();
        config.stream.host = "127.0.0.1".into();
        config.stream.port = 0;
        config.stream.shutdown_grace_ms = 500;
        config.control.tick_ms = 5;
        config
    }

    #[test]
    fn setup_failure_aborts_and_still_tears_down() {
        let sim = Arc::new(Simulator::default());
        sim.fail(Op::StreamOn);

        let err = Supervisor::new(config(), sim.clone())
            .run(NoInput)
            .unwrap_err();

        assert!(matches!(
            err,
            SetupError::Vehicle {
                step: "starting video stream",
                ..
            }
        ));
        assert_eq!(sim.end_calls(), 1);
        assert!(sim.motions().is_empty());
    }

    #[test]
    fn ipv6_host_binds() {
        // Hosts without an IPv6 loopback can't run this
        if std::net::TcpListener::bind("[::1]:0").is_err() {
            return;
        }
        let mut config = config();
        config.stream.host = "::1".into();
        let sim = Arc::new(Simulator::new(8, 8, 200).with_frame_limit(1));

        let reason = Supervisor::new(config, sim).run(NoInput).unwrap();
        assert_eq!(reason, StopReason::FeedTerminated);
    }

    #[test]
    fn unassigned_address_is_a_bind_error() {
        let mut config = config();
        // TEST-NET-1, never assigned to a local interface
        config.stream.host = "192.0.2.1".into();
        let sim = Arc::new(Simulator::default());

        let err = Supervisor::new(config, sim.clone()).run(NoInput).unwrap_err();
        assert!(matches!(err, SetupError::Bind { .. }));
        assert_eq!(sim.end_calls(), 1);
    }

    #[test]
    fn setup_runs_in_order() {
        let sim = Arc::new(Simulator::new(8, 8, 200).with_frame_limit(1));
        Supervisor::new(config(), sim.clone()).run(NoInput).unwrap();

        let events = sim.events();
        assert_eq!(
            &events[..4],
            &[
                SimEvent::Connect,
                SimEvent::SetSpeed(10),
                SimEvent::StreamOff,
                SimEvent::StreamOn
            ]
        );
        assert_eq!(events.last(), Some(&SimEvent::End));
    }

    #[test]
    fn feed_end_stops_the_session() {
        let sim = Arc::new(Simulator::new(16, 16, 200).with_frame_limit(10));
        let supervisor = Supervisor::new(config(), sim.clone());
        let frames = supervisor.frames();

        let reason = supervisor.run(NoInput).unwrap();

        assert_eq!(reason, StopReason::FeedTerminated);
        assert_eq!(frames.published(), 10);
        assert_eq!(sim.end_calls(), 1);
    }

    #[test]
    fn escape_ends_a_flight() {
        let sim = Arc::new(Simulator::new(16, 16, 100));
        let input = ScriptedInput::new([
            vec![InputEvent::KeyUp(Key::T)],
            vec![InputEvent::KeyDown(Key::W)],
            vec![],
            vec![InputEvent::KeyDown(Key::Escape)],
        ]);

        let reason = Supervisor::new(config(), sim.clone()).run(input).unwrap();

        assert_eq!(reason, StopReason::Operator);
        assert!(sim.events().contains(&SimEvent::Takeoff));
        assert!(sim.motions().iter().any(|motion| motion.up_down == 60));
        assert_eq!(sim.end_calls(), 1);
        assert!(!sim.is_airborne());
    }
}
