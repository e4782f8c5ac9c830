//! # Stream Server
//!
//! Serves the camera to any number of viewers over TCP. Each frame is sent as a 4 byte
//! little-endian length followed by the encoded image.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io::{self, ErrorKind},
    net::{SocketAddr, TcpListener, TcpStream},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::Utc;
use comms_if::{eqpt::cam::VideoMode, net::write_frame};
use log::{debug, info, warn};
use thiserror::Error;

use super::{FrameBuffer, VideoError, VideoSource};
use crate::params::TankExecParams;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Time the producer waits before retrying after a source error.
const PRODUCER_RETRY: Duration = Duration::from_millis(100);

/// A chrono format string used to name recordings.
const REC_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct StreamServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    buffer: Arc<FrameBuffer>,
    control: StreamControl,
    shutdown: Arc<AtomicBool>,

    poll: Duration,
    write_timeout: Duration,

    acceptor: Option<JoinHandle<()>>,
}

/// Cloneable handle used to switch the camera between live streaming and recording.
#[derive(Clone)]
pub struct StreamControl {
    inner: Arc<Mutex<ModeController>>,
}

struct ModeController {
    source: Arc<Mutex<Box<dyn VideoSource>>>,
    buffer: Arc<FrameBuffer>,
    rec_dir: PathBuf,
    producer: Option<Producer>,
}

struct Producer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct Viewer {
    done: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StreamServerError {
    #[error("Couldn't bind the video endpoint {0}: {1}")]
    BindError(String, io::Error),

    #[error("Video source error: {0}")]
    VideoError(#[from] VideoError),

    #[error("Couldn't start a stream thread: {0}")]
    ThreadError(io::Error),

    #[error("The stream server has already been started")]
    AlreadyStarted,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StreamServer {
    /// Bind the video endpoint. Nothing is streamed until [`StreamServer::start`] is called.
    ///
    /// Recordings are written into `rec_dir`.
    pub fn new(
        params: &TankExecParams,
        source: Box<dyn VideoSource>,
        rec_dir: PathBuf,
    ) -> Result<Self, StreamServerError> {
        let bind_err = |e| StreamServerError::BindError(params.video_endpoint.clone(), e);

        let listener = TcpListener::bind(&params.video_endpoint).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let buffer = Arc::new(FrameBuffer::new());

        let control = StreamControl {
            inner: Arc::new(Mutex::new(ModeController {
                source: Arc::new(Mutex::new(source)),
                buffer: buffer.clone(),
                rec_dir,
                producer: None,
            })),
        };

        info!("Video stream server listening on {}", local_addr);

        Ok(Self {
            listener: Some(listener),
            local_addr,
            buffer,
            control,
            shutdown: Arc::new(AtomicBool::new(false)),
            poll: Duration::from_millis(params.poll_timeout_ms.max(1)),
            write_timeout: Duration::from_millis(params.video.viewer_write_timeout_ms.max(1)),
            acceptor: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn control(&self) -> StreamControl {
        self.control.clone()
    }

    pub fn frame_buffer(&self) -> Arc<FrameBuffer> {
        self.buffer.clone()
    }

    /// Start producing frames in live mode and accepting viewers.
    pub fn start(&mut self) -> Result<(), StreamServerError> {
        let listener = self
            .listener
            .take()
            .ok_or(StreamServerError::AlreadyStarted)?;

        self.control.set_mode(VideoMode::Live)?;

        let buffer = self.buffer.clone();
        let shutdown = self.shutdown.clone();
        let (poll, write_timeout) = (self.poll, self.write_timeout);

        self.acceptor = Some(
            thread::Builder::new()
                .name("viewer_acceptor".into())
                .spawn(move || acceptor_thread(listener, buffer, shutdown, poll, write_timeout))
                .map_err(StreamServerError::ThreadError)?,
        );

        Ok(())
    }

    /// Stop accepting viewers, disconnect all current viewers and stop the producer.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(jh) = self.acceptor.take() {
            jh.join().ok();
        }

        self.control.lock().stop_producer();
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.stop()
    }
}

impl StreamControl {
    /// Switch the camera mode.
    ///
    /// The producer is always stopped before the source changes mode, and restarted afterwards if
    /// the source ends up live.
    pub fn set_mode(&self, mode: VideoMode) -> Result<(), StreamServerError> {
        let mut ctrl = self.lock();

        ctrl.stop_producer();

        let result = ctrl.lock_source().set_mode(mode.clone());
        let now_live = ctrl.lock_source().mode() == VideoMode::Live;

        if now_live {
            ctrl.start_producer()?;
        }

        match result {
            Ok(_) => {
                info!("Video mode is now {:?}", mode);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start recording into a new file in the recordings directory, or go back to live streaming.
    pub fn set_recording(&self, on: bool) -> Result<(), StreamServerError> {
        let current = self.mode();

        match (on, current) {
            (true, VideoMode::Record(_)) | (false, VideoMode::Live) => Ok(()),
            (true, VideoMode::Live) => {
                let path = self.lock().rec_dir.join(format!(
                    "rec_{}.mjpg",
                    Utc::now().format(REC_TIMESTAMP_FORMAT)
                ));
                self.set_mode(VideoMode::Record(path))
            }
            (false, VideoMode::Record(_)) => self.set_mode(VideoMode::Live),
        }
    }

    pub fn mode(&self) -> VideoMode {
        self.lock().lock_source().mode()
    }

    fn lock(&self) -> MutexGuard<'_, ModeController> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ModeController {
    fn lock_source(&self) -> MutexGuard<'_, Box<dyn VideoSource>> {
        self.source.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_producer(&mut self) -> Result<(), StreamServerError> {
        if self.producer.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let source = self.source.clone();
        let buffer = self.buffer.clone();
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name("video_producer".into())
            .spawn(move || producer_thread(source, buffer, thread_stop))
            .map_err(StreamServerError::ThreadError)?;

        self.producer = Some(Producer { stop, handle });
        debug!("Video producer started");

        Ok(())
    }

    fn stop_producer(&mut self) {
        if let Some(p) = self.producer.take() {
            p.stop.store(true, Ordering::Relaxed);
            if p.handle.join().is_err() {
                warn!("Video producer panicked");
            }
            debug!("Video producer stopped");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn producer_thread(
    source: Arc<Mutex<Box<dyn VideoSource>>>,
    buffer: Arc<FrameBuffer>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let frame = source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_frame();

        match frame {
            Ok(f) => {
                buffer.publish(f);
            }
            Err(VideoError::NotLive) => break,
            Err(e) => {
                warn!("Couldn't get a frame from the camera: {}", e);
                thread::sleep(PRODUCER_RETRY);
            }
        }
    }
}

fn acceptor_thread(
    listener: TcpListener,
    buffer: Arc<FrameBuffer>,
    shutdown: Arc<AtomicBool>,
    poll: Duration,
    write_timeout: Duration,
) {
    let mut viewers: Vec<Viewer> = Vec::new();

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = setup_viewer_stream(&stream, write_timeout) {
                    warn!("Couldn't configure viewer {}: {}", peer, e);
                    continue;
                }

                info!("Viewer connected from {}", peer);

                let done = Arc::new(AtomicBool::new(false));
                let thread_done = done.clone();
                let buffer = buffer.clone();
                let shutdown = shutdown.clone();

                match thread::Builder::new()
                    .name(format!("viewer_{}", peer))
                    .spawn(move || {
                        viewer_thread(stream, peer, buffer, shutdown, poll);
                        thread_done.store(true, Ordering::Relaxed);
                    }) {
                    Ok(handle) => viewers.push(Viewer { done, handle }),
                    Err(e) => warn!("Couldn't start thread for viewer {}: {}", peer, e),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(poll),
            Err(e) => {
                warn!("Error accepting viewer: {}", e);
                thread::sleep(poll);
            }
        }

        // Forget viewers which have already gone
        viewers.retain(|v| !v.done.load(Ordering::Relaxed));
    }

    for v in viewers {
        v.handle.join().ok();
    }
}

fn setup_viewer_stream(stream: &TcpStream, write_timeout: Duration) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(write_timeout))?;
    stream.set_nodelay(true)?;
    Ok(())
}

fn viewer_thread(
    mut stream: TcpStream,
    peer: SocketAddr,
    buffer: Arc<FrameBuffer>,
    shutdown: Arc<AtomicBool>,
    poll: Duration,
) {
    // Start from the frame already in the buffer, if there is one
    let mut last_seq = buffer
        .latest()
        .map(|f| f.seq.saturating_sub(1))
        .unwrap_or(0);

    while !shutdown.load(Ordering::Relaxed) {
        let frame = match buffer.wait_newer(last_seq, poll) {
            Some(f) => f,
            None => continue,
        };

        if let Err(e) = write_frame(&mut stream, &frame.data) {
            info!("Viewer {} dropped: {}", peer, e);
            return;
        }

        if frame.seq > last_seq + 1 {
            debug!("Viewer {} skipped {} frames", peer, frame.seq - last_seq - 1);
        }
        last_seq = frame.seq;
    }

    debug!("Viewer {} closed on shutdown", peer);
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::stream::SimVideoSource;
    use comms_if::{eqpt::cam::is_complete_jpeg, net::FrameReader};
    use std::time::Instant;

    /// Source producing frames of a fixed size quickly, logging what it's asked to do.
    struct FakeSource {
        mode: VideoMode,
        frame_len: usize,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl VideoSource for FakeSource {
        fn next_frame(&mut self) -> Result<Vec<u8>, VideoError> {
            if self.mode != VideoMode::Live {
                return Err(VideoError::NotLive);
            }
            thread::sleep(Duration::from_millis(2));
            self.events.lock().unwrap().push("frame".into());
            Ok(vec![0x55; self.frame_len])
        }

        fn set_mode(&mut self, mode: VideoMode) -> Result<(), VideoError> {
            self.events.lock().unwrap().push(format!("mode {:?}", mode));
            self.mode = mode;
            Ok(())
        }

        fn mode(&self) -> VideoMode {
            self.mode.clone()
        }
    }

    fn params() -> TankExecParams {
        let mut p = TankExecParams {
            video_endpoint: "127.0.0.1:0".into(),
            poll_timeout_ms: 10,
            ..Default::default()
        };
        p.video.viewer_write_timeout_ms = 200;
        p
    }

    fn fake_server(frame_len: usize) -> (StreamServer, Arc<Mutex<Vec<String>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let source = FakeSource {
            mode: VideoMode::Live,
            frame_len,
            events: events.clone(),
        };
        let server =
            StreamServer::new(&params(), Box::new(source), std::env::temp_dir()).unwrap();
        (server, events)
    }

    #[test]
    fn test_viewer_receives_jpeg_frames() {
        let mut p = params();
        p.video.width = 64;
        p.video.height = 48;
        p.video.fps = 30;

        let mut server = StreamServer::new(
            &p,
            Box::new(SimVideoSource::new(&p.video)),
            std::env::temp_dir(),
        )
        .unwrap();
        server.start().unwrap();

        let stream = TcpStream::connect(server.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let mut reader = FrameReader::new(stream, 1 << 20);

        let mut frames = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        while frames < 3 && Instant::now() < deadline {
            if let Some(f) = reader.read_frame().unwrap() {
                assert!(is_complete_jpeg(&f));
                frames += 1;
            }
        }
        assert_eq!(frames, 3);

        server.stop();
    }

    #[test]
    fn test_slow_viewer_does_not_block_others() {
        let (mut server, _) = fake_server(256 * 1024);
        server.start().unwrap();
        let buffer = server.frame_buffer();

        // Never reads
        let _slow = TcpStream::connect(server.local_addr()).unwrap();

        let fast = TcpStream::connect(server.local_addr()).unwrap();
        fast.set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let mut reader = FrameReader::new(fast, 1 << 20);

        let mut frames = 0;
        let deadline = Instant::now() + Duration::from_secs(10);
        while frames < 40 && Instant::now() < deadline {
            if reader.read_frame().unwrap().is_some() {
                frames += 1;
            }
        }
        assert_eq!(frames, 40);

        // The producer kept going too
        let before = buffer.latest().unwrap().seq;
        thread::sleep(Duration::from_millis(100));
        assert!(buffer.latest().unwrap().seq > before);

        server.stop();
    }

    #[test]
    fn test_mode_switch_stops_producer_first() {
        let (mut server, events) = fake_server(16);
        server.start().unwrap();
        let control = server.control();

        thread::sleep(Duration::from_millis(30));
        control.set_recording(true).unwrap();
        assert!(matches!(control.mode(), VideoMode::Record(_)));

        // No frames are pulled once the source has been switched
        thread::sleep(Duration::from_millis(50));
        {
            let ev = events.lock().unwrap();
            let switch = ev.iter().rposition(|e| e.starts_with("mode Record")).unwrap();
            assert_eq!(switch, ev.len() - 1);
        }

        // Asking again is a no-op
        control.set_recording(true).unwrap();

        control.set_recording(false).unwrap();
        thread::sleep(Duration::from_millis(50));
        {
            let ev = events.lock().unwrap();
            assert_eq!(ev.iter().filter(|e| e.starts_with("mode Record")).count(), 1);
            assert_eq!(ev.last().map(String::as_str), Some("frame"));
        }

        server.stop();
    }
}
