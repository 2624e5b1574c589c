//! HTTP viewer endpoint
//!
//! Every connection pulls from the shared `FrameBox` on its own interval and
//! encodes its own copy. Nothing is shared between viewers; a client that
//! stops reading is dropped after the stall timeout without touching the rest.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::stream::{self, Stream};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::multipart;
use crate::pipeline::{Encoder, FrameBox};
use crate::Frame;

const INDEX_HTML: &str = include_str!("index.html");

/// Periods a viewer may go without accepting a part before it is dropped
const STALL_PERIODS: u32 = 60;

/// Shared by every handler; cloning is cheap
#[derive(Clone)]
pub struct StreamState {
    frames: Arc<FrameBox>,
    encoder: Encoder,
    period: Duration,
    stall_timeout: Duration,
    clients: Arc<AtomicUsize>,
    next_viewer: Arc<AtomicUsize>,
}

impl StreamState {
    pub fn new(frames: Arc<FrameBox>, encoder: Encoder, period: Duration) -> Self {
        Self {
            frames,
            encoder,
            period,
            stall_timeout: period * STALL_PERIODS,
            clients: Arc::new(AtomicUsize::new(0)),
            next_viewer: Arc::new(AtomicUsize::new(1)),
        }
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Viewers currently connected to the stream
    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

pub struct StreamServer {
    listener: TcpListener,
    state: StreamState,
}

impl StreamServer {
    pub async fn bind(addr: impl ToSocketAddrs, state: StreamState) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Serve until `shutdown` resolves, then stop accepting. Open streams keep
    /// running until their clients leave; the caller bounds that wait.
    pub async fn serve<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!("Streaming on http://{}/ (feed at /video_feed)", addr);

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
    }
}

pub fn router(state: StreamState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/video_feed.mjpg", get(video_feed))
        .route("/health", get(health))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(state): State<StreamState>) -> String {
    match state.frames.sequence() {
        Some(sequence) => format!("ok frame={} viewers={}\n", sequence, state.clients()),
        None => format!("ok frame=none viewers={}\n", state.clients()),
    }
}

async fn video_feed(State(state): State<StreamState>) -> impl IntoResponse {
    let headers = [
        (header::CONTENT_TYPE, multipart::content_type()),
        (
            header::CACHE_CONTROL,
            "no-cache, no-store, must-revalidate".to_string(),
        ),
        (header::PRAGMA, "no-cache".to_string()),
    ];
    (headers, Body::from_stream(mjpeg_stream(state)))
}

/// Body of one viewer's response. The parts come from a producer task through
/// a one-slot channel; if the client stops draining it for longer than the
/// stall timeout the producer gives up and the body ends with an error, which
/// makes hyper drop the connection.
pub fn mjpeg_stream(state: StreamState) -> impl Stream<Item = Result<Bytes, io::Error>> {
    let (parts, rx) = mpsc::channel::<Bytes>(1);
    tokio::spawn(Viewer::new(state).run(parts));

    stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(part) => Some((Ok(part), Some(rx))),
            None => Some((
                Err(io::Error::new(io::ErrorKind::TimedOut, "viewer stalled")),
                None,
            )),
        }
    })
}

struct Viewer {
    id: usize,
    state: StreamState,
    sent: u64,
    last: Option<(Arc<Frame>, Bytes)>,
    last_failed: Option<Arc<Frame>>,
}

impl Viewer {
    fn new(state: StreamState) -> Self {
        let id = state.next_viewer.fetch_add(1, Ordering::Relaxed);
        let watching = state.clients.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("stream_clients").increment(1.0);
        debug!("Viewer {} connected ({} watching)", id, watching);
        Self {
            id,
            state,
            sent: 0,
            last: None,
            last_failed: None,
        }
    }

    async fn run(mut self, parts: mpsc::Sender<Bytes>) {
        let mut ticker = tokio::time::interval(self.state.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let part = tokio::select! {
                part = self.next_part(&mut ticker) => part,
                _ = parts.closed() => return,
            };
            match parts.send_timeout(part, self.state.stall_timeout).await {
                Ok(()) => {
                    self.sent += 1;
                    metrics::counter!("stream_chunks_sent").increment(1);
                }
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(
                        "Viewer {} stopped reading for {:?}, dropping it",
                        self.id, self.state.stall_timeout
                    );
                    metrics::counter!("stream_viewers_stalled").increment(1);
                    return;
                }
                Err(SendTimeoutError::Closed(_)) => return,
            }
        }
    }

    /// Wait for the next tick with an encodable frame. An empty box or a frame
    /// that fails to encode just waits for the next tick. An unchanged frame
    /// reuses the part built for it.
    async fn next_part(&mut self, ticker: &mut Interval) -> Bytes {
        loop {
            ticker.tick().await;

            let Some(frame) = self.state.frames.snapshot() else {
                continue;
            };
            if let Some((cached, part)) = &self.last {
                if Arc::ptr_eq(cached, &frame) {
                    return part.clone();
                }
            }
            if matches!(&self.last_failed, Some(failed) if Arc::ptr_eq(failed, &frame)) {
                continue;
            }

            let encoder = self.state.encoder;
            let job = frame.clone();
            match tokio::task::spawn_blocking(move || encoder.encode(&job)).await {
                Ok(Ok(jpeg)) => {
                    let part = multipart::part(&jpeg);
                    self.last = Some((frame, part.clone()));
                    return part;
                }
                Ok(Err(e)) => {
                    metrics::counter!("stream_encode_failures").increment(1);
                    warn!("Skipping frame: {}", e);
                    self.last_failed = Some(frame);
                }
                Err(e) => {
                    metrics::counter!("stream_encode_failures").increment(1);
                    warn!("Encoder task failed, skipping frame: {}", e);
                    self.last_failed = Some(frame);
                }
            }
        }
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        let left = self.state.clients.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::gauge!("stream_clients").decrement(1.0);
        debug!(
            "Viewer {} disconnected after {} chunks ({} watching)",
            self.id, self.sent, left
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Frame, PixelFormat};
    use futures::StreamExt;

    fn jpeg(sequence: u64, tag: &str) -> Frame {
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(tag.as_bytes());
        data.extend_from_slice(&[0xFF, 0xD9]);
        Frame::new(sequence, 1, 1, PixelFormat::Mjpeg, Bytes::from(data))
    }

    async fn wait_for_clients(state: &StreamState, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while state.clients() != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "{} viewers still counted, expected {}",
                state.clients(),
                expected
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn state(frames: Arc<FrameBox>) -> StreamState {
        StreamState::new(frames, Encoder::default(), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn stream_waits_for_first_frame() {
        let frames = Arc::new(FrameBox::new());
        let state = state(frames.clone());
        let mut chunks = Box::pin(mjpeg_stream(state.clone()));

        let pending = tokio::time::timeout(Duration::from_millis(50), chunks.next()).await;
        assert!(pending.is_err(), "no chunk before the first publish");
        assert_eq!(state.clients(), 1);

        frames.publish(jpeg(1, "hello"));
        let chunk = chunks.next().await.unwrap().unwrap();
        assert!(chunk.ends_with(b"\xFF\xD8hello\xFF\xD9\r\n"));

        drop(chunks);
        wait_for_clients(&state, 0).await;
    }

    #[tokio::test]
    async fn unencodable_frame_is_skipped() {
        let frames = Arc::new(FrameBox::new());
        frames.publish(Frame::new(
            1,
            4,
            4,
            PixelFormat::Rgb24,
            Bytes::from_static(b"short"),
        ));
        let mut chunks = Box::pin(mjpeg_stream(state(frames.clone())));

        let skipped = tokio::time::timeout(Duration::from_millis(50), chunks.next()).await;
        assert!(skipped.is_err());

        frames.publish(jpeg(2, "good"));
        let chunk = chunks.next().await.unwrap().unwrap();
        assert!(chunk.windows(4).any(|w| w == b"good"));
    }

    #[tokio::test]
    async fn unchanged_frame_resends_the_same_part() {
        let frames = Arc::new(FrameBox::new());
        frames.publish(jpeg(1, "same"));
        let mut chunks = Box::pin(mjpeg_stream(state(frames.clone())));

        let first = chunks.next().await.unwrap().unwrap();
        let second = chunks.next().await.unwrap().unwrap();
        assert_eq!(first, second);
        // Both parts share one buffer: the frame was encoded once
        assert_eq!(first.as_ptr(), second.as_ptr());

        // Parts of the old frame may already be queued
        frames.publish(jpeg(2, "next"));
        let mut updated = false;
        for _ in 0..4 {
            let part = chunks.next().await.unwrap().unwrap();
            if part.windows(4).any(|w| w == b"next") {
                updated = true;
                break;
            }
        }
        assert!(updated);
    }

    #[tokio::test]
    async fn viewer_that_stops_reading_is_released() {
        let frames = Arc::new(FrameBox::new());
        frames.publish(jpeg(1, "idle"));
        let state = state(frames).with_stall_timeout(Duration::from_millis(50));
        let mut chunks = Box::pin(mjpeg_stream(state.clone()));

        // Take one part, then stop polling the body
        chunks.next().await.unwrap().unwrap();
        wait_for_clients(&state, 0).await;

        // The body reports the stall once the queued part is drained
        let mut ended_with_error = false;
        while let Some(item) = chunks.next().await {
            ended_with_error = item.is_err();
        }
        assert!(ended_with_error);
    }
}
