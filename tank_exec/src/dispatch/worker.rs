//! # Dispatch Loop
//!
//! Thread which owns the [`HardwareDispatch`]. Commands reach it from the command server through a
//! [`DispatchHandle`], and a ticker thread asks it to sample the sensors so telemetry can be
//! pushed to the connected client through the [`OutboundSlot`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender, SyncSender, TrySendError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use comms_if::tc::{CommandRecord, ResponseRecord};
use log::{debug, info, trace, warn};

use super::{DispatchError, HardwareDispatch};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Granularity of the ticker's sleep, sets how quickly it notices shutdown.
const TICKER_POLL: Duration = Duration::from_millis(20);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The running dispatch thread and its telemetry ticker.
pub struct DispatchLoop {
    handle: DispatchHandle,
    outbound: OutboundSlot,
    shutdown: Arc<AtomicBool>,
    loop_jh: Option<JoinHandle<()>>,
    ticker_jh: Option<JoinHandle<()>>,
}

/// Cloneable handle used to send commands to the dispatch loop.
#[derive(Clone)]
pub struct DispatchHandle {
    sender: Sender<DispatchMsg>,
}

/// Queue of the active control session, if there is one.
///
/// Sessions attach themselves with their ID, and only the session which is currently attached can
/// detach, so an evicted session tidying up late can't remove its successor.
#[derive(Clone, Default)]
pub struct OutboundSlot {
    inner: Arc<Mutex<Option<(u64, SyncSender<Vec<u8>>)>>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

enum DispatchMsg {
    Execute {
        record: CommandRecord,
        reply: Sender<ResponseRecord>,
    },
    Sample,
    Shutdown,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DispatchLoop {
    /// Start the dispatch thread, and the ticker if a telemetry period is given.
    pub fn spawn(
        dispatch: HardwareDispatch,
        telemetry_period: Option<Duration>,
    ) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let outbound = OutboundSlot::default();
        let shutdown = Arc::new(AtomicBool::new(false));
        let sample_pending = Arc::new(AtomicBool::new(false));

        let loop_outbound = outbound.clone();
        let loop_pending = sample_pending.clone();
        let loop_jh = thread::Builder::new()
            .name("dispatch".into())
            .spawn(move || dispatch_thread(dispatch, receiver, loop_outbound, loop_pending))?;

        let ticker_jh = match telemetry_period {
            Some(period) => {
                let sender = sender.clone();
                let shutdown = shutdown.clone();
                Some(
                    thread::Builder::new()
                        .name("telemetry_ticker".into())
                        .spawn(move || ticker_thread(period, sender, sample_pending, shutdown))?,
                )
            }
            None => None,
        };

        Ok(Self {
            handle: DispatchHandle { sender },
            outbound,
            shutdown,
            loop_jh: Some(loop_jh),
            ticker_jh,
        })
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    pub fn outbound(&self) -> OutboundSlot {
        self.outbound.clone()
    }

    /// Stop the ticker and the dispatch loop, waiting for both to finish.
    pub fn stop(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(jh) = self.ticker_jh.take() {
            jh.join().ok();
        }

        if let Some(jh) = self.loop_jh.take() {
            self.handle.sender.send(DispatchMsg::Shutdown).ok();
            jh.join().ok();
            info!("Dispatch loop stopped");
        }
    }
}

impl Drop for DispatchLoop {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

impl DispatchHandle {
    /// Execute a record on the dispatch loop, blocking until its response is ready.
    pub fn execute(&self, record: CommandRecord) -> Result<ResponseRecord, DispatchError> {
        let (reply, receiver) = mpsc::channel();

        self.sender
            .send(DispatchMsg::Execute { record, reply })
            .map_err(|_| DispatchError::LoopStopped)?;

        receiver.recv().map_err(|_| DispatchError::LoopStopped)
    }
}

impl OutboundSlot {
    pub fn attach(&self, id: u64, sender: SyncSender<Vec<u8>>) {
        *self.lock() = Some((id, sender));
    }

    pub fn detach(&self, id: u64) {
        let mut slot = self.lock();
        if matches!(*slot, Some((current, _)) if current == id) {
            *slot = None;
        }
    }

    /// Queue bytes for the attached session without blocking.
    ///
    /// Returns false if they were dropped because there's no session or its queue is full.
    pub fn push(&self, bytes: Vec<u8>) -> bool {
        match &*self.lock() {
            Some((_, sender)) => match sender.try_send(bytes) {
                Ok(_) => true,
                Err(TrySendError::Full(_)) => {
                    trace!("Session queue full, telemetry dropped");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(u64, SyncSender<Vec<u8>>)>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn dispatch_thread(
    mut dispatch: HardwareDispatch,
    receiver: Receiver<DispatchMsg>,
    outbound: OutboundSlot,
    sample_pending: Arc<AtomicBool>,
) {
    while let Ok(msg) = receiver.recv() {
        match msg {
            DispatchMsg::Execute { record, reply } => {
                let response = dispatch.execute(&record);
                if reply.send(response).is_err() {
                    warn!("Response to {} had no one to go to", record.name);
                }
            }
            DispatchMsg::Sample => {
                sample_pending.store(false, Ordering::Relaxed);

                for record in dispatch.sample_telemetry() {
                    match record.encode() {
                        Ok(bytes) => {
                            outbound.push(bytes);
                        }
                        Err(e) => warn!("Couldn't encode telemetry: {}", e),
                    }
                }
            }
            DispatchMsg::Shutdown => break,
        }
    }

    // Leave the tank stationary whatever happens
    if let Err(e) = dispatch.execute_cmd(&comms_if::tc::Command::Stop) {
        warn!("Couldn't stop the motors on exit: {}", e);
    }

    debug!("Dispatch thread exited");
}

fn ticker_thread(
    period: Duration,
    sender: Sender<DispatchMsg>,
    sample_pending: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) {
    let mut next = Instant::now() + period;

    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now < next {
            thread::sleep((next - now).min(TICKER_POLL));
            continue;
        }
        next += period;

        // Don't pile samples up behind a slow sensor
        if sample_pending.swap(true, Ordering::Relaxed) {
            continue;
        }

        if sender.send(DispatchMsg::Sample).is_err() {
            break;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dispatch::test::{test_params, StallingSonic},
        eqpt::{SensorWorker, SimActuators},
    };
    use comms_if::tc::Status;

    fn spawn_loop(period: Option<Duration>) -> DispatchLoop {
        let params = test_params();
        let sensors = SensorWorker::spawn(
            Box::new(StallingSonic(Duration::ZERO)),
            Duration::from_millis(params.sensor_timeout_ms),
        )
        .unwrap();
        let dispatch =
            HardwareDispatch::new(&params, Box::new(SimActuators::new()), sensors, None).unwrap();

        DispatchLoop::spawn(dispatch, period).unwrap()
    }

    #[test]
    fn test_execute_through_handle() {
        let dl = spawn_loop(None);
        let handle = dl.handle();

        let resp = handle
            .execute(CommandRecord::new(
                "CMD_MOTOR",
                vec!["3000".into(), "-10".into()],
            ))
            .unwrap();
        assert_eq!(resp.payload, vec!["2000".to_string(), "-10".to_string()]);

        dl.stop();
        assert!(matches!(
            handle.execute(CommandRecord::new("CMD_STOP", vec![])),
            Err(DispatchError::LoopStopped)
        ));
    }

    #[test]
    fn test_telemetry_pushed_to_attached_session() {
        let dl = spawn_loop(Some(Duration::from_millis(20)));
        let (tx, rx) = mpsc::sync_channel(16);
        dl.outbound().attach(1, tx);

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let first = String::from_utf8(first).unwrap();
        assert!(first.starts_with("CMD_SONIC#OK#") || first.starts_with("CMD_LINE#OK#"));

        dl.stop();
    }

    #[test]
    fn test_stalled_sensor_does_not_hold_up_commands() {
        let params = test_params();
        let sensors = SensorWorker::spawn(
            Box::new(StallingSonic(Duration::from_secs(2))),
            Duration::from_millis(params.sensor_timeout_ms),
        )
        .unwrap();
        let dispatch =
            HardwareDispatch::new(&params, Box::new(SimActuators::new()), sensors, None).unwrap();
        let dl = DispatchLoop::spawn(dispatch, Some(Duration::from_millis(20))).unwrap();
        let handle = dl.handle();

        let mut worst = Duration::ZERO;
        for _ in 0..10 {
            let start = Instant::now();
            let resp = handle
                .execute(CommandRecord::new("CMD_STOP", vec![]))
                .unwrap();
            assert_eq!(resp.status, Status::Ok);
            worst = worst.max(start.elapsed());
            thread::sleep(Duration::from_millis(15));
        }

        // Never more than a single sensor timeout behind a telemetry sample
        assert!(worst < Duration::from_millis(150), "worst wait {:?}", worst);

        dl.stop();
    }

    #[test]
    fn test_outbound_detach_only_by_owner() {
        let slot = OutboundSlot::default();
        let (tx_a, _rx_a) = mpsc::sync_channel(1);
        let (tx_b, rx_b) = mpsc::sync_channel(1);

        slot.attach(1, tx_a);
        slot.attach(2, tx_b);
        slot.detach(1);
        assert!(slot.push(b"x".to_vec()));
        assert_eq!(rx_b.try_recv().unwrap(), b"x".to_vec());

        // Full queue drops rather than blocks
        assert!(slot.push(b"y".to_vec()));
        assert!(!slot.push(b"z".to_vec()));

        slot.detach(2);
        assert!(!slot.push(b"w".to_vec()));
    }
}
