//! Viewers over real loopback TCP against a running StreamServer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aerocast::pipeline::{Encoder, FrameBox};
use aerocast::stream::{StreamServer, StreamState};
use aerocast::{Frame, PixelFormat};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::oneshot;

const PERIOD: Duration = Duration::from_millis(10);

/// A tiny "jpeg" the encoder passes through untouched, tagged for searching
fn tagged(sequence: u64, tag: &str) -> Frame {
    let mut data = vec![0xFF, 0xD8];
    data.extend_from_slice(tag.as_bytes());
    data.extend_from_slice(&[0xFF, 0xD9]);
    Frame::new(sequence, 1, 1, PixelFormat::Mjpeg, Bytes::from(data))
}

/// A tagged "jpeg" padded to `size` bytes
fn large(sequence: u64, tag: &str, size: usize) -> Frame {
    let mut data = vec![0xFF, 0xD8];
    data.extend_from_slice(tag.as_bytes());
    data.resize(size - 2, 0);
    data.extend_from_slice(&[0xFF, 0xD9]);
    Frame::new(sequence, 1, 1, PixelFormat::Mjpeg, Bytes::from(data))
}

async fn start(frames: Arc<FrameBox>) -> (SocketAddr, oneshot::Sender<()>) {
    let state = StreamState::new(frames, Encoder::default(), PERIOD);
    let (addr, _, shutdown) = start_with(state).await;
    (addr, shutdown)
}

async fn start_with(state: StreamState) -> (SocketAddr, StreamState, oneshot::Sender<()>) {
    let server = StreamServer::bind("127.0.0.1:0", state).await.unwrap();
    let addr = server.local_addr().unwrap();
    let state = server.state().clone();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.serve(async {
        let _ = rx.await;
    }));
    (addr, state, tx)
}

/// Connect with a tiny receive window and request the feed without ever reading
async fn stalled_viewer(addr: SocketAddr) -> TcpStream {
    let socket = TcpSocket::new_v4().unwrap();
    socket.set_recv_buffer_size(4096).unwrap();
    let mut stream = socket.connect(addr).await.unwrap();
    let request = format!("GET /video_feed HTTP/1.1\r\nHost: {addr}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

/// Count part boundaries arriving during `window` without keeping the data
async fn parts_during(stream: &mut TcpStream, window: Duration) -> usize {
    const NEEDLE: &[u8] = b"--frame\r\n";
    let deadline = Instant::now() + window;
    let mut buf = vec![0u8; 64 * 1024];
    let mut tail: Vec<u8> = Vec::new();
    let mut parts = 0;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return parts;
        }
        let read = match tokio::time::timeout(left, stream.read(&mut buf)).await {
            Ok(Ok(0)) => panic!("server closed the stream"),
            Ok(Ok(read)) => read,
            Ok(Err(e)) => panic!("read failed: {e}"),
            Err(_) => return parts,
        };
        // Keep a short tail so a boundary split across reads still counts once
        tail.extend_from_slice(&buf[..read]);
        parts += count(&tail, NEEDLE);
        let keep = tail.len().min(NEEDLE.len() - 1);
        tail.drain(..tail.len() - keep);
    }
}

async fn wait_for_clients(state: &StreamState, expected: usize, limit: Duration) {
    let deadline = Instant::now() + limit;
    while state.clients() != expected {
        assert!(
            Instant::now() < deadline,
            "{} viewers still counted, expected {}",
            state.clients(),
            expected
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

struct Viewer {
    stream: TcpStream,
    received: Vec<u8>,
}

impl Viewer {
    async fn connect(addr: SocketAddr, path: &str) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        Self {
            stream,
            received: Vec::new(),
        }
    }

    /// Read until `done` holds for the received bytes, or panic after `limit`
    async fn read_until(&mut self, limit: Duration, done: impl Fn(&[u8]) -> bool) {
        let deadline = Instant::now() + limit;
        let mut buf = [0u8; 4096];
        while !done(&self.received) {
            let left = deadline.saturating_duration_since(Instant::now());
            let read = tokio::time::timeout(left, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for stream data")
                .unwrap();
            assert!(read > 0, "server closed the stream");
            self.received.extend_from_slice(&buf[..read]);
        }
    }

    /// Read whatever arrives during `window`
    async fn read_for(&mut self, window: Duration) {
        let deadline = Instant::now() + window;
        let mut buf = [0u8; 4096];
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return;
            }
            match tokio::time::timeout(left, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) => panic!("server closed the stream"),
                Ok(Ok(read)) => self.received.extend_from_slice(&buf[..read]),
                Ok(Err(e)) => panic!("read failed: {e}"),
                Err(_) => return,
            }
        }
    }

    fn parts(&self) -> usize {
        count(&self.received, b"--frame\r\n")
    }
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn index_embeds_the_stream() {
    let (addr, _shutdown) = start(Arc::new(FrameBox::new())).await;
    let mut viewer = Viewer::connect(addr, "/").await;
    viewer
        .read_until(Duration::from_secs(5), |bytes| find(bytes, b"</html>").is_some())
        .await;

    assert!(find(&viewer.received, b"200 OK").is_some());
    assert!(find(&viewer.received, b"src=\"/video_feed\"").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn feed_headers_and_part_framing() {
    let frames = Arc::new(FrameBox::new());
    frames.publish(tagged(1, "HEAD"));
    let (addr, _shutdown) = start(frames).await;

    let mut viewer = Viewer::connect(addr, "/video_feed").await;
    viewer
        .read_until(Duration::from_secs(5), |bytes| count(bytes, b"HEAD") >= 1)
        .await;

    let text = String::from_utf8_lossy(&viewer.received).to_lowercase();
    assert!(text.contains("content-type: multipart/x-mixed-replace; boundary=frame"));
    assert!(find(
        &viewer.received,
        b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 8\r\n\r\n\xFF\xD8HEAD\xFF\xD9\r\n"
    )
    .is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn viewers_wait_for_the_first_frame() {
    let frames = Arc::new(FrameBox::new());
    let (addr, _shutdown) = start(frames.clone()).await;

    let mut viewer = Viewer::connect(addr, "/video_feed").await;
    viewer.read_for(Duration::from_millis(150)).await;
    assert_eq!(viewer.parts(), 0);

    frames.publish(tagged(1, "LATE"));
    viewer
        .read_until(Duration::from_secs(5), |bytes| count(bytes, b"LATE") >= 1)
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn viewers_never_go_back_to_an_older_frame() {
    let frames = Arc::new(FrameBox::new());
    frames.publish(tagged(1, "F1-frame"));
    let (addr, _shutdown) = start(frames.clone()).await;

    let mut first = Viewer::connect(addr, "/video_feed").await;
    let mut second = Viewer::connect(addr, "/video_feed").await;
    for viewer in [&mut first, &mut second] {
        viewer
            .read_until(Duration::from_secs(5), |bytes| count(bytes, b"F1-frame") >= 2)
            .await;
    }

    frames.publish(tagged(2, "F2-frame"));

    for viewer in [&mut first, &mut second] {
        viewer
            .read_until(Duration::from_secs(5), |bytes| count(bytes, b"F2-frame") >= 3)
            .await;
        let first_f2 = find(&viewer.received, b"F2-frame").unwrap();
        let last_f1 = rfind(&viewer.received, b"F1-frame").unwrap();
        assert!(last_f1 < first_f2, "F1 delivered after F2");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broken_and_stalled_viewers_do_not_slow_others() {
    let frames = Arc::new(FrameBox::new());
    frames.publish(large(1, "SHARED", 64 * 1024));
    let state = StreamState::new(frames.clone(), Encoder::default(), PERIOD)
        .with_stall_timeout(Duration::from_millis(500));
    let (addr, state, _shutdown) = start_with(state).await;

    // Baseline rate with a single viewer
    let mut alone = Viewer::connect(addr, "/video_feed").await;
    parts_during(&mut alone.stream, Duration::from_millis(200)).await;
    let baseline = parts_during(&mut alone.stream, Duration::from_millis(500)).await;
    drop(alone);
    wait_for_clients(&state, 0, Duration::from_secs(5)).await;

    let mut fast = Viewer::connect(addr, "/video_feed").await;
    parts_during(&mut fast.stream, Duration::from_millis(200)).await;

    // One viewer that never reads, one that disconnects mid-stream
    let stalled = stalled_viewer(addr).await;
    let mut leaving = Viewer::connect(addr, "/video_feed").await;
    parts_during(&mut leaving.stream, Duration::from_millis(100)).await;
    drop(leaving);

    let with_others = parts_during(&mut fast.stream, Duration::from_millis(500)).await;

    assert!(baseline >= 10, "baseline too low: {baseline}");
    assert!(
        with_others * 2 >= baseline,
        "fast viewer slowed from {baseline} to {with_others} chunks"
    );

    // The stalled viewer is released while its socket is still open
    let fast_keeps_reading = tokio::spawn(async move {
        parts_during(&mut fast.stream, Duration::from_secs(10)).await;
        fast
    });
    wait_for_clients(&state, 1, Duration::from_secs(10)).await;
    drop(stalled);
    fast_keeps_reading.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn encode_failure_keeps_the_connection_open() {
    let frames = Arc::new(FrameBox::new());
    frames.publish(Frame::new(
        1,
        64,
        64,
        PixelFormat::Rgb24,
        Bytes::from_static(b"not enough pixels"),
    ));
    let (addr, _shutdown) = start(frames.clone()).await;

    let mut viewer = Viewer::connect(addr, "/video_feed").await;
    viewer.read_for(Duration::from_millis(150)).await;
    assert_eq!(viewer.parts(), 0);

    frames.publish(tagged(2, "RECOVERED"));
    viewer
        .read_until(Duration::from_secs(5), |bytes| count(bytes, b"RECOVERED") >= 1)
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_reports_the_latest_frame() {
    let frames = Arc::new(FrameBox::new());
    frames.publish(tagged(41, "x"));
    frames.publish(tagged(42, "y"));
    let (addr, _shutdown) = start(frames).await;

    let mut viewer = Viewer::connect(addr, "/health").await;
    viewer
        .read_until(Duration::from_secs(5), |bytes| find(bytes, b"frame=42").is_some())
        .await;
}
