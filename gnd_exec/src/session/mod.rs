//! # Client Session
//!
//! The session owns the command connection to the tank. It runs on its own thread, taking
//! commands from a channel and reporting what happens on another. Commands which arrive while
//! the link is down are dropped rather than queued, so that a motion demand is never replayed
//! long after it was made. That includes commands made while a connection attempt is still in
//! progress.
//!
//! Responses are matched to requests by name. The tank answers strictly in order, so the oldest
//! pending request with a matching name is the one being answered.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod backoff;
mod transport;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, trace, warn};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thiserror::Error;

use comms_if::tc::{CmdName, Command, CommandRecord, ResponseRecord, Status};
use util::time::millis_or_disabled;

use crate::params::SessionParams;

pub use backoff::Backoff;
pub use transport::{Connection, TcpConnection, TcpTransport, Transport};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Handle to the session thread.
pub struct ClientSession {
    sender: CommandSender,
    status: Arc<Mutex<SessionStatus>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Cloneable handle used to push commands into the session from other threads.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<SessionRequest>,
}

#[derive(Debug, Default)]
struct SessionStatus {
    state: SessionState,
    last_error: Option<SessionError>,
}

/// A request sent but not yet answered.
struct Pending {
    name: String,
    sent: Instant,

    /// Requests made by the session itself, whose responses aren't reported
    internal: bool,
}

/// State owned by the session thread.
struct Worker {
    params: SessionParams,
    transport: Box<dyn Transport>,
    req_rx: Receiver<SessionRequest>,
    event_tx: Sender<SessionEvent>,
    status: Arc<Mutex<SessionStatus>>,
    shutdown: Arc<AtomicBool>,
    backoff: Backoff,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Something the presentation layer should know about.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),

    /// The answer to a request sent through this session
    Response(ResponseRecord),

    /// A record pushed by the tank without being asked for
    Telemetry(ResponseRecord),

    Error(SessionError),
}

enum SessionRequest {
    /// A command and the time it was made
    Command(CommandRecord, Instant),
    Reconnect,
}

/// Why a connected period ended.
enum Ended {
    Lost(SessionError),
    Reconnect,
    Shutdown,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("Could not start the session thread: {0}")]
    ThreadError(String),

    #[error("The session thread has stopped")]
    Stopped,

    #[error("Could not connect to the tank: {0}")]
    ConnectFailed(String),

    #[error("Lost the connection to the tank: {0}")]
    ConnectionLost(String),

    #[error("{0} was dropped because the tank is not connected")]
    NotConnected(String),

    #[error("No response to {name} within {timeout:?}")]
    ResponseTimeout { name: String, timeout: Duration },

    #[error("Could not encode {name}: {reason}")]
    EncodeFailed { name: String, reason: String },

    #[error("Received a line which could not be decoded: {0}")]
    BadResponse(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Disconnected
    }
}

impl ClientSession {
    /// Start the session thread.
    ///
    /// Events are delivered on the returned receiver. If `auto_connect` is off the session stays
    /// disconnected until `reconnect` is called.
    pub fn spawn(
        params: SessionParams,
        transport: Box<dyn Transport>,
    ) -> Result<(Self, Receiver<SessionEvent>), SessionError> {
        let (req_tx, req_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let status = Arc::new(Mutex::new(SessionStatus::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let backoff = Backoff::new(
            Duration::from_millis(params.backoff_initial_ms),
            Duration::from_millis(params.backoff_max_ms),
        );

        let worker = Worker {
            params,
            transport,
            req_rx,
            event_tx,
            status: status.clone(),
            shutdown: shutdown.clone(),
            backoff,
        };

        let handle = thread::Builder::new()
            .name("client_session".into())
            .spawn(move || worker.run())
            .map_err(|e| SessionError::ThreadError(e.to_string()))?;

        Ok((
            Self {
                sender: CommandSender { tx: req_tx },
                status,
                shutdown,
                handle: Some(handle),
            },
            event_rx,
        ))
    }

    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    pub fn send(&self, cmd: &Command) -> Result<(), SessionError> {
        self.sender.send(cmd)
    }

    pub fn send_record(&self, record: CommandRecord) -> Result<(), SessionError> {
        self.sender.send_record(record)
    }

    pub fn reconnect(&self) -> Result<(), SessionError> {
        self.sender.reconnect()
    }

    pub fn state(&self) -> SessionState {
        self.status.lock().map(|s| s.state).unwrap_or_default()
    }

    /// The most recent error reported by the session.
    pub fn last_error(&self) -> Option<SessionError> {
        self.status.lock().ok().and_then(|s| s.last_error.clone())
    }

    /// Stop the session thread, closing the connection.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                warn!("Client session thread panicked");
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl CommandSender {
    pub fn send(&self, cmd: &Command) -> Result<(), SessionError> {
        self.send_record(cmd.to_record())
    }

    /// Send a record without checking it against the vocabulary.
    pub fn send_record(&self, record: CommandRecord) -> Result<(), SessionError> {
        self.tx
            .send(SessionRequest::Command(record, Instant::now()))
            .map_err(|_| SessionError::Stopped)
    }

    /// Drop the current connection, if any, and connect again straight away.
    pub fn reconnect(&self) -> Result<(), SessionError> {
        self.tx
            .send(SessionRequest::Reconnect)
            .map_err(|_| SessionError::Stopped)
    }
}

impl Worker {
    fn run(mut self) {
        let poll = Duration::from_millis(self.params.poll_ms.max(1));
        let mut want_connect = self.params.auto_connect;

        info!("Client session started");

        while !self.shutdown.load(Ordering::Relaxed) {
            if !want_connect {
                match self.req_rx.recv_timeout(poll) {
                    Ok(SessionRequest::Reconnect) => want_connect = true,
                    Ok(SessionRequest::Command(r, _)) => self.drop_request(&r),
                    Err(RecvTimeoutError::Timeout) => (),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                continue;
            }

            self.set_state(SessionState::Connecting);

            match self.transport.connect() {
                Ok(mut conn) => {
                    let connected_at = Instant::now();
                    info!("Connected to the tank");
                    self.backoff.reset();
                    self.set_state(SessionState::Connected);

                    let ended = self.run_connected(conn.as_mut(), connected_at);
                    drop(conn);

                    match ended {
                        Ended::Shutdown => break,
                        Ended::Reconnect => {
                            info!("Reconnecting on request");
                            self.set_state(SessionState::Reconnecting);
                            continue;
                        }
                        Ended::Lost(e) => {
                            self.report(e);
                            self.set_state(SessionState::Reconnecting);
                        }
                    }
                }
                Err(e) => {
                    self.report(SessionError::ConnectFailed(e.to_string()));
                    self.set_state(SessionState::Reconnecting);
                }
            }

            let delay = self.backoff.next_delay();
            debug!(
                "Waiting {:?} before reconnecting, {:?} after that if it fails",
                delay,
                self.backoff.peek()
            );
            if !self.wait(delay) {
                break;
            }
        }

        self.set_state(SessionState::Disconnected);
        info!("Client session stopped");
    }

    /// Serve an open connection until it fails or the session is asked to leave it.
    ///
    /// Commands made before `connected_at` were waiting on the connection attempt and are dropped.
    fn run_connected(&mut self, conn: &mut dyn Connection, connected_at: Instant) -> Ended {
        let heartbeat = millis_or_disabled(self.params.heartbeat_ms);
        let response_timeout = Duration::from_millis(self.params.response_timeout_ms);
        let mut pending: VecDeque<Pending> = VecDeque::new();
        let mut last_heartbeat = Instant::now();

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ended::Shutdown;
            }

            loop {
                match self.req_rx.try_recv() {
                    Ok(SessionRequest::Command(r, made)) if made < connected_at => {
                        self.drop_request(&r)
                    }
                    Ok(SessionRequest::Command(r, _)) => {
                        if let Err(e) = self.send(conn, r, false, &mut pending) {
                            return Ended::Lost(e);
                        }
                    }
                    Ok(SessionRequest::Reconnect) => return Ended::Reconnect,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return Ended::Shutdown,
                }
            }

            if let Some(period) = heartbeat {
                if last_heartbeat.elapsed() >= period {
                    last_heartbeat = Instant::now();
                    if let Err(e) = self.send(conn, Command::Heartbeat.to_record(), true, &mut pending)
                    {
                        return Ended::Lost(e);
                    }
                }
            }

            match conn.recv_line() {
                Ok(Some(line)) => self.handle_line(&line, &mut pending),
                Ok(None) => (),
                Err(e) => return Ended::Lost(SessionError::ConnectionLost(e.to_string())),
            }

            while let Some(p) = pending.front() {
                if p.sent.elapsed() < response_timeout {
                    break;
                }
                let p = match pending.pop_front() {
                    Some(p) => p,
                    None => break,
                };

                // An unanswered heartbeat means the link is dead even if the socket hasn't noticed
                if p.internal {
                    return Ended::Lost(SessionError::ConnectionLost(format!(
                        "no response to {} within {:?}",
                        p.name, response_timeout
                    )));
                }

                self.report(SessionError::ResponseTimeout {
                    name: p.name,
                    timeout: response_timeout,
                });
            }
        }
    }

    fn send(
        &mut self,
        conn: &mut dyn Connection,
        record: CommandRecord,
        internal: bool,
        pending: &mut VecDeque<Pending>,
    ) -> Result<(), SessionError> {
        let bytes = match record.encode() {
            Ok(b) => b,
            Err(e) => {
                self.report(SessionError::EncodeFailed {
                    name: record.name,
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        trace!("Sending {}", String::from_utf8_lossy(&bytes).trim_end());

        conn.send(&bytes)
            .map_err(|e| SessionError::ConnectionLost(e.to_string()))?;

        pending.push_back(Pending {
            name: record.name,
            sent: Instant::now(),
            internal,
        });

        Ok(())
    }

    fn handle_line(&mut self, line: &[u8], pending: &mut VecDeque<Pending>) {
        let record = match ResponseRecord::decode(line, self.params.max_line_len) {
            Ok(r) => r,
            Err(e) => {
                self.report(SessionError::BadResponse(format!(
                    "{:?} ({})",
                    String::from_utf8_lossy(line),
                    e
                )));
                return;
            }
        };

        // A bare protocol error can't name its request, it belongs to the oldest one
        let matched = if record.is_protocol_error() {
            pending.pop_front()
        } else {
            pending
                .iter()
                .position(|p| p.name == record.name)
                .and_then(|i| pending.remove(i))
        };

        match matched {
            Some(p) if p.internal => {
                if record.status == Status::Err {
                    warn!("{} was refused: {:?}", p.name, record.reason());
                }
            }
            Some(_) => self.emit(SessionEvent::Response(record)),
            None if record.is_protocol_error() => self.emit(SessionEvent::Response(record)),
            None => match CmdName::from_wire(&record.name) {
                Some(n) if n.is_telemetry() => self.emit(SessionEvent::Telemetry(record)),
                _ => warn!("Discarding unexpected record {:?}", record),
            },
        }
    }

    /// Wait out a backoff delay, dropping any commands sent in the meantime.
    ///
    /// Returns false if the session should stop.
    fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let poll = Duration::from_millis(self.params.poll_ms.max(1));

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return false;
            }

            let now = Instant::now();
            if now >= deadline {
                return true;
            }

            match self.req_rx.recv_timeout((deadline - now).min(poll)) {
                Ok(SessionRequest::Command(r, _)) => self.drop_request(&r),
                Ok(SessionRequest::Reconnect) => return true,
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn drop_request(&mut self, record: &CommandRecord) {
        self.report(SessionError::NotConnected(record.name.clone()));
    }

    fn set_state(&mut self, state: SessionState) {
        if let Ok(mut s) = self.status.lock() {
            if s.state == state {
                return;
            }
            s.state = state;
        }
        debug!("Session state is now {:?}", state);
        self.emit(SessionEvent::StateChanged(state));
    }

    fn report(&mut self, error: SessionError) {
        warn!("{}", error);
        if let Ok(mut s) = self.status.lock() {
            s.last_error = Some(error.clone());
        }
        self.emit(SessionEvent::Error(error));
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is not an error
        self.event_tx.send(event).ok();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
