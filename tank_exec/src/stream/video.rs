//! # Video Source

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fs::File,
    io::{BufWriter, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use comms_if::{eqpt::cam::VideoMode, net::write_frame};
use image::{codecs::jpeg::JpegEncoder, ColorType, ImageBuffer, Rgb, RgbImage};
use log::{info, warn};
use thiserror::Error;

use crate::params::VideoParams;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A camera producing encoded frames.
pub trait VideoSource: Send {
    /// Block until the next frame is available and return it.
    ///
    /// Only valid in [`VideoMode::Live`], returns `NotLive` otherwise.
    fn next_frame(&mut self) -> Result<Vec<u8>, VideoError>;

    /// Switch between live streaming and recording.
    fn set_mode(&mut self, mode: VideoMode) -> Result<(), VideoError>;

    fn mode(&self) -> VideoMode;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Camera drawing a moving test pattern, encoded as JPEG.
pub struct SimVideoSource {
    width: u32,
    height: u32,
    quality: u8,
    period: Duration,

    frame_count: u64,
    next_due: Option<Instant>,
    mode: VideoMode,
    recorder: Option<Recorder>,
}

/// Background thread writing frames into a recording file.
struct Recorder {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<u64, VideoError>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("The camera is recording, live frames are unavailable")]
    NotLive,

    #[error("Couldn't encode the frame: {0}")]
    EncodeError(#[from] image::ImageError),

    #[error("Recording IO error: {0}")]
    RecordingIo(#[from] std::io::Error),

    #[error("Couldn't write a recorded frame: {0}")]
    RecordingFrame(#[from] comms_if::net::NetError),

    #[error("The recording thread panicked")]
    RecorderPanicked,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimVideoSource {
    pub fn new(params: &VideoParams) -> Self {
        Self {
            width: params.width.max(1),
            height: params.height.max(1),
            quality: params.jpeg_quality.max(1).min(100),
            period: Duration::from_secs(1) / params.fps.max(1),
            frame_count: 0,
            next_due: None,
            mode: VideoMode::Live,
            recorder: None,
        }
    }

    fn stop_recorder(&mut self) -> Result<(), VideoError> {
        if let Some(rec) = self.recorder.take() {
            rec.stop.store(true, Ordering::Relaxed);
            let frames = rec
                .handle
                .join()
                .map_err(|_| VideoError::RecorderPanicked)??;
            info!("Recording stopped after {} frames", frames);
        }
        Ok(())
    }
}

impl VideoSource for SimVideoSource {
    fn next_frame(&mut self) -> Result<Vec<u8>, VideoError> {
        if self.mode != VideoMode::Live {
            return Err(VideoError::NotLive);
        }

        // Pace to the frame rate
        let now = Instant::now();
        match self.next_due {
            Some(due) if due > now => {
                thread::sleep(due - now);
                self.next_due = Some(due + self.period);
            }
            _ => self.next_due = Some(now + self.period),
        }

        self.frame_count += 1;
        render_frame(self.width, self.height, self.frame_count, self.quality)
    }

    fn set_mode(&mut self, mode: VideoMode) -> Result<(), VideoError> {
        self.stop_recorder()?;

        if let VideoMode::Record(ref path) = mode {
            let file = BufWriter::new(File::create(path)?);
            let stop = Arc::new(AtomicBool::new(false));

            let (w, h, q, period) = (self.width, self.height, self.quality, self.period);
            let start_count = self.frame_count;
            let thread_stop = stop.clone();

            let handle = thread::Builder::new()
                .name("sim_recorder".into())
                .spawn(move || record_thread(file, w, h, q, period, start_count, thread_stop))?;

            info!("Recording to {:?}", path);
            self.recorder = Some(Recorder { stop, handle });
        }

        self.next_due = None;
        self.mode = mode;
        Ok(())
    }

    fn mode(&self) -> VideoMode {
        self.mode.clone()
    }
}

impl Drop for SimVideoSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop_recorder() {
            warn!("Recording did not finish cleanly: {}", e);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Draw frame `n` of the test pattern, a diagonal gradient scrolling with a bar sweeping across.
fn render_frame(width: u32, height: u32, n: u64, quality: u8) -> Result<Vec<u8>, VideoError> {
    let shift = (n * 4 % 256) as u32;
    let bar_x = (n * 8 % width as u64) as u32;

    let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
        if x >= bar_x && x < bar_x + 8 {
            Rgb([255, 255, 255])
        } else {
            Rgb([((x + shift) % 256) as u8, ((y + shift) % 256) as u8, 96])
        }
    });

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode(
        &img,
        width,
        height,
        ColorType::Rgb8,
    )?;

    Ok(buf)
}

fn record_thread(
    mut file: BufWriter<File>,
    width: u32,
    height: u32,
    quality: u8,
    period: Duration,
    mut frame_count: u64,
    stop: Arc<AtomicBool>,
) -> Result<u64, VideoError> {
    let mut written = 0;
    let mut next_due = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now < next_due {
            thread::sleep((next_due - now).min(Duration::from_millis(20)));
            continue;
        }
        next_due += period;

        frame_count += 1;
        let frame = render_frame(width, height, frame_count, quality)?;
        write_frame(&mut file, &frame)?;
        written += 1;
    }

    file.flush()?;
    Ok(written)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::{eqpt::cam::is_complete_jpeg, net::read_frame_blocking};

    fn params() -> VideoParams {
        VideoParams {
            width: 64,
            height: 48,
            fps: 50,
            ..Default::default()
        }
    }

    #[test]
    fn test_live_frames_are_jpeg() {
        let mut src = SimVideoSource::new(&params());
        let a = src.next_frame().unwrap();
        let b = src.next_frame().unwrap();

        assert!(is_complete_jpeg(&a));
        assert!(is_complete_jpeg(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.mjpg");
        let mut src = SimVideoSource::new(&params());

        src.set_mode(VideoMode::Record(path.clone())).unwrap();
        assert!(matches!(src.next_frame(), Err(VideoError::NotLive)));
        thread::sleep(Duration::from_millis(150));
        src.set_mode(VideoMode::Live).unwrap();
        assert!(src.next_frame().is_ok());

        // The file holds whole length-prefixed frames
        let mut file = File::open(&path).unwrap();
        let mut count = 0;
        while let Some(frame) = read_frame_blocking(&mut file, 1 << 20).unwrap() {
            assert!(is_complete_jpeg(&frame));
            count += 1;
        }
        assert!(count >= 2);
    }
}
