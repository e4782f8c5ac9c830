//! # Video client
//!
//! Receives the tank's camera stream. Frames arrive with a length prefix; each one is checked
//! for complete JPEG markers and decoded before it replaces the latest frame. A corrupt frame is
//! counted and skipped without dropping the connection, but a frame longer than the configured
//! maximum ends the connection since the stream can't be trusted after that.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use image::{GenericImageView, ImageFormat};
use log::{debug, info, warn};
use std::{
    fs,
    io,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use thiserror::Error;

use comms_if::{
    eqpt::cam::is_complete_jpeg,
    net::{FrameReader, NetError},
};

use crate::params::VideoClientParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A running connection to the video stream.
pub struct VideoClient {
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<VideoStats>>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Default)]
pub struct VideoStats {
    pub connected: bool,

    /// Frames received and decoded
    pub frames: u64,

    /// Frames skipped because they weren't valid JPEGs
    pub corrupt: u64,

    /// Width and height of the latest frame
    pub resolution: Option<(u32, u32)>,

    /// The latest good frame, still encoded
    pub latest: Option<Arc<Vec<u8>>>,

    /// Why the stream ended, if it ended on its own
    pub last_error: Option<String>,
}

/// Shared on/off switch for the video client, for use from the console and the controller.
#[derive(Clone)]
pub struct VideoToggle {
    endpoint: String,
    params: VideoClientParams,
    client: Arc<Mutex<Option<VideoClient>>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum VideoClientError {
    #[error("Could not resolve the video endpoint {0}")]
    BadEndpoint(String),

    #[error("Could not start the video client thread: {0}")]
    ThreadError(io::Error),

    #[error("No video frame has been received yet")]
    NoFrame,

    #[error("Could not save the frame: {0}")]
    SaveError(io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VideoClient {
    /// Start receiving from the given endpoint.
    ///
    /// Connection happens on the client thread, failures are reported through `stats`.
    pub fn start(endpoint: &str, params: &VideoClientParams) -> Result<Self, VideoClientError> {
        let addr = endpoint
            .to_socket_addrs()
            .ok()
            .and_then(|mut a| a.next())
            .ok_or_else(|| VideoClientError::BadEndpoint(endpoint.into()))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(VideoStats::default()));
        let params = params.clone();

        let thread_shutdown = shutdown.clone();
        let thread_stats = stats.clone();
        let handle = thread::Builder::new()
            .name("video_client".into())
            .spawn(move || {
                let result = receive(addr, &params, &thread_shutdown, &thread_stats);

                if let Ok(mut s) = thread_stats.lock() {
                    s.connected = false;
                    if let Err(ref e) = result {
                        s.last_error = Some(e.to_string());
                    }
                }

                match result {
                    Ok(()) => info!("Video client stopped"),
                    Err(e) => warn!("Video stream ended: {}", e),
                }
            })
            .map_err(VideoClientError::ThreadError)?;

        Ok(Self {
            shutdown,
            stats,
            handle: Some(handle),
        })
    }

    pub fn stats(&self) -> VideoStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                warn!("Video client thread panicked");
            }
        }
    }
}

impl Drop for VideoClient {
    fn drop(&mut self) {
        self.stop();
    }
}

impl VideoToggle {
    pub fn new(endpoint: &str, params: VideoClientParams) -> Self {
        Self {
            endpoint: endpoint.into(),
            params,
            client: Arc::new(Mutex::new(None)),
        }
    }

    /// Stop the client if it's running, otherwise start it. Returns true if video is now on.
    pub fn toggle(&self) -> Result<bool, VideoClientError> {
        let mut client = self.lock();

        match client.take() {
            Some(mut c) => {
                c.stop();
                info!("Video off");
                Ok(false)
            }
            None => {
                *client = Some(VideoClient::start(&self.endpoint, &self.params)?);
                info!("Video on");
                Ok(true)
            }
        }
    }

    pub fn start(&self) -> Result<(), VideoClientError> {
        let mut client = self.lock();
        if client.is_none() {
            *client = Some(VideoClient::start(&self.endpoint, &self.params)?);
        }
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(mut c) = self.lock().take() {
            c.stop();
        }
    }

    /// Stats of the running client, if there is one.
    pub fn stats(&self) -> Option<VideoStats> {
        self.lock().as_ref().map(|c| c.stats())
    }

    /// Write the latest frame to a file as a JPEG, returning its size.
    pub fn snapshot<P: AsRef<Path>>(&self, path: P) -> Result<usize, VideoClientError> {
        let frame = self
            .stats()
            .and_then(|s| s.latest)
            .ok_or(VideoClientError::NoFrame)?;

        fs::write(path, frame.as_slice()).map_err(VideoClientError::SaveError)?;

        Ok(frame.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<VideoClient>> {
        // A poisoned lock only means a panic elsewhere, the option itself is still usable
        self.client.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Check a received frame, returning its size if it's a usable JPEG.
pub fn check_frame(data: &[u8]) -> Option<(u32, u32)> {
    if !is_complete_jpeg(data) {
        return None;
    }

    image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .ok()
        .map(|img| img.dimensions())
}

/// Body of the client thread.
fn receive(
    addr: SocketAddr,
    params: &VideoClientParams,
    shutdown: &AtomicBool,
    stats: &Mutex<VideoStats>,
) -> Result<(), NetError> {
    let stream = TcpStream::connect_timeout(&addr, Duration::from_millis(params.connect_timeout_ms))?;
    stream.set_read_timeout(Some(Duration::from_millis(params.poll_ms.max(1))))?;

    info!("Video connected to {}", addr);
    if let Ok(mut s) = stats.lock() {
        s.connected = true;
    }

    let mut reader = FrameReader::new(stream, params.max_frame_len);

    while !shutdown.load(Ordering::Relaxed) {
        let frame = match reader.read_frame()? {
            Some(f) => f,
            None => continue,
        };

        let checked = check_frame(&frame);

        let mut s = match stats.lock() {
            Ok(s) => s,
            Err(_) => break,
        };
        match checked {
            Some(res) => {
                s.frames += 1;
                s.resolution = Some(res);
                s.latest = Some(Arc::new(frame));
            }
            None => {
                s.corrupt += 1;
                debug!("Skipping corrupt frame of {} bytes", frame.len());
            }
        }
    }

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::net::write_frame;
    use image::{codecs::jpeg::JpegEncoder, ColorType};
    use std::{io::Write, net::TcpListener, time::Instant};

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let raw = vec![128u8; (width * height * 3) as usize];
        let mut buf = Vec::new();
        JpegEncoder::new(&mut buf)
            .encode(&raw, width, height, ColorType::Rgb8)
            .unwrap();
        buf
    }

    fn wait_until<F: Fn() -> bool>(pred: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_check_frame() {
        assert_eq!(check_frame(&jpeg(16, 8)), Some((16, 8)));

        let mut truncated = jpeg(16, 8);
        truncated.truncate(truncated.len() - 2);
        assert_eq!(check_frame(&truncated), None);

        // Right markers, garbage in between
        let mut fake = vec![0xFF, 0xD8];
        fake.extend_from_slice(&[0u8; 32]);
        fake.extend_from_slice(&[0xFF, 0xD9]);
        assert_eq!(check_frame(&fake), None);
    }

    #[test]
    fn test_corrupt_frames_skipped_oversized_ends_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let good = jpeg(32, 24);

        let params = VideoClientParams {
            max_frame_len: 64 * 1024,
            poll_ms: 10,
            ..Default::default()
        };

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            write_frame(&mut stream, &good).unwrap();
            write_frame(&mut stream, b"not a jpeg at all").unwrap();
            write_frame(&mut stream, &good).unwrap();

            // Header for a frame far over the limit
            stream.write_all(&(1024u32 * 1024).to_le_bytes()).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(500));
        });

        let client = VideoClient::start(&addr.to_string(), &params).unwrap();

        assert!(wait_until(|| client.stats().last_error.is_some()));
        let stats = client.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.corrupt, 1);
        assert_eq!(stats.resolution, Some((32, 24)));
        assert!(!stats.connected);
        assert!(stats.last_error.unwrap().contains("exceeded"));

        server.join().unwrap();
    }

    #[test]
    fn test_toggle_and_snapshot() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let frame = jpeg(8, 8);
        let sent = frame.clone();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            write_frame(&mut stream, &sent).unwrap();
            thread::sleep(Duration::from_millis(200));
        });

        let toggle = VideoToggle::new(&addr.to_string(), VideoClientParams::default());
        assert!(matches!(
            toggle.snapshot("unused.jpg"),
            Err(VideoClientError::NoFrame)
        ));

        assert!(toggle.toggle().unwrap());
        assert!(wait_until(|| toggle
            .stats()
            .map(|s| s.frames == 1)
            .unwrap_or(false)));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.jpg");
        assert_eq!(toggle.snapshot(&path).unwrap(), frame.len());
        assert_eq!(fs::read(&path).unwrap(), frame);

        assert!(!toggle.toggle().unwrap());
        assert!(toggle.stats().is_none());

        server.join().unwrap();
    }
}
