//! # Sensors
//!
//! The tank's sensors are read through a [`SensorWorker`], a thread which owns the
//! [`TelemetrySource`]. Hardware reads can stall, so every read made through the worker is bounded
//! by a timeout and a stalled sensor never holds up the caller for longer than that.
//!
//! Only one read is ever in flight. While a stalled read is still running on the worker, further
//! reads fail straight away with [`SensorError::Stalled`] rather than queueing behind it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    f64::consts::PI,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use comms_if::eqpt::SensorId;
use log::{debug, warn};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Input side of the tank hardware.
pub trait TelemetrySource: Send {
    /// Read the current value of a sensor, in the units given by [`SensorId`].
    fn read(&mut self, sensor: SensorId) -> Result<f64, SensorError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Handle to the sensor worker thread.
///
/// Dropping the handle stops the worker once any read in progress completes.
pub struct SensorWorker {
    sender: Sender<SensorRequest>,
    timeout: Duration,

    /// Set while the worker is reading, cleared before it replies
    busy: Arc<AtomicBool>,
}

/// Sensors giving slowly varying plausible values, for running without hardware.
pub struct SimTelemetrySource {
    start: Instant,
}

struct SensorRequest {
    sensor: SensorId,
    reply: Sender<Result<f64, SensorError>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("The sensor reported a fault: {0}")]
    Fault(String),

    #[error("The sensor read timed out after {0:?}")]
    Timeout(Duration),

    #[error("An earlier sensor read is still stalled")]
    Stalled,

    #[error("The sensor worker has stopped")]
    WorkerStopped,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SensorWorker {
    /// Start the worker thread, which takes ownership of the source.
    pub fn spawn(
        mut source: Box<dyn TelemetrySource>,
        timeout: Duration,
    ) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<SensorRequest>();
        let busy = Arc::new(AtomicBool::new(false));
        let worker_busy = busy.clone();

        thread::Builder::new()
            .name("sensor_worker".into())
            .spawn(move || {
                while let Ok(req) = receiver.recv() {
                    let result = source.read(req.sensor);
                    worker_busy.store(false, Ordering::Release);

                    // The requester may have timed out and gone away, which is fine
                    if req.reply.send(result).is_err() {
                        debug!("Late {:?} reading discarded", req.sensor);
                    }
                }
                debug!("Sensor worker stopped");
            })?;

        Ok(Self {
            sender,
            timeout,
            busy,
        })
    }

    /// The longest a single read will wait.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read a sensor, waiting at most the worker's timeout.
    pub fn read(&self, sensor: SensorId) -> Result<f64, SensorError> {
        self.read_within(sensor, self.timeout)
    }

    /// Read a sensor, waiting at most `timeout`, which is capped at the worker's timeout.
    pub fn read_within(&self, sensor: SensorId, timeout: Duration) -> Result<f64, SensorError> {
        let timeout = timeout.min(self.timeout);

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("{:?} not read, the worker is still stalled", sensor);
            return Err(SensorError::Stalled);
        }

        let (reply, receiver) = mpsc::channel();

        if self.sender.send(SensorRequest { sensor, reply }).is_err() {
            self.busy.store(false, Ordering::Release);
            return Err(SensorError::WorkerStopped);
        }

        match receiver.recv_timeout(timeout) {
            Ok(r) => r,
            Err(RecvTimeoutError::Timeout) => {
                warn!("{:?} read timed out", sensor);
                Err(SensorError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SensorError::WorkerStopped),
        }
    }
}

impl SimTelemetrySource {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SimTelemetrySource {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySource for SimTelemetrySource {
    fn read(&mut self, sensor: SensorId) -> Result<f64, SensorError> {
        let t = self.start.elapsed().as_secs_f64();

        Ok(match sensor {
            // Something approaching and receding over 10 seconds
            SensorId::Sonic => 70.0 + 50.0 * (2.0 * PI * t / 10.0).sin(),

            // Walk the IR mask through each pattern, one per second
            SensorId::Line => ((t as u64) % 8) as f64,

            // Battery draining slowly from full
            SensorId::Power => (8.4 - t / 3600.0).max(6.0),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    /// Source which takes a fixed time to answer every read.
    struct SlowSource(Duration);

    impl TelemetrySource for SlowSource {
        fn read(&mut self, _: SensorId) -> Result<f64, SensorError> {
            thread::sleep(self.0);
            Ok(1.0)
        }
    }

    struct FaultySource;

    impl TelemetrySource for FaultySource {
        fn read(&mut self, _: SensorId) -> Result<f64, SensorError> {
            Err(SensorError::Fault("no echo".into()))
        }
    }

    #[test]
    fn test_sim_values_in_range() {
        let mut sim = SimTelemetrySource::new();
        let sonic = sim.read(SensorId::Sonic).unwrap();
        assert!(sonic >= 20.0 && sonic <= 120.0);
        let line = sim.read(SensorId::Line).unwrap();
        assert!(line >= 0.0 && line < 8.0);
    }

    #[test]
    fn test_worker_read() {
        let worker =
            SensorWorker::spawn(Box::new(SlowSource(Duration::ZERO)), Duration::from_millis(500))
                .unwrap();
        assert_eq!(worker.read(SensorId::Power), Ok(1.0));

        let worker =
            SensorWorker::spawn(Box::new(FaultySource), Duration::from_millis(500)).unwrap();
        assert_eq!(
            worker.read(SensorId::Sonic),
            Err(SensorError::Fault("no echo".into()))
        );
    }

    #[test]
    fn test_worker_timeout() {
        let timeout = Duration::from_millis(50);
        let worker =
            SensorWorker::spawn(Box::new(SlowSource(Duration::from_millis(300))), timeout)
                .unwrap();

        let start = Instant::now();
        assert_eq!(worker.read(SensorId::Sonic), Err(SensorError::Timeout(timeout)));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn test_reads_fail_fast_while_stalled() {
        let timeout = Duration::from_millis(50);
        let worker =
            SensorWorker::spawn(Box::new(SlowSource(Duration::from_millis(300))), timeout)
                .unwrap();

        assert_eq!(worker.read(SensorId::Sonic), Err(SensorError::Timeout(timeout)));

        let start = Instant::now();
        for _ in 0..10 {
            assert_eq!(worker.read(SensorId::Line), Err(SensorError::Stalled));
        }
        assert!(start.elapsed() < Duration::from_millis(20));

        // Once the stalled read completes the worker takes reads again
        thread::sleep(Duration::from_millis(300));
        assert_eq!(worker.read(SensorId::Power), Err(SensorError::Timeout(timeout)));
    }

    #[test]
    fn test_read_within_shorter_timeout() {
        let worker = SensorWorker::spawn(
            Box::new(SlowSource(Duration::from_millis(100))),
            Duration::from_secs(1),
        )
        .unwrap();

        let start = Instant::now();
        assert_eq!(
            worker.read_within(SensorId::Sonic, Duration::from_millis(20)),
            Err(SensorError::Timeout(Duration::from_millis(20)))
        );
        assert!(start.elapsed() < Duration::from_millis(90));
    }
}
