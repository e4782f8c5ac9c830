//! # Command Server
//!
//! Accepts the control session from the ground and answers its commands. Only one session is
//! active at a time. What happens when a second client connects is set by the
//! [`SecondClientPolicy`].
//!
//! Each session has a reader thread, which decodes lines and executes them in arrival order
//! through the dispatch loop, and a writer thread which sends responses and telemetry from a
//! bounded queue. However the session ends the motors are stopped.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io::{self, ErrorKind, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, SyncSender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use comms_if::{
    net::{LineReader, NetError},
    tc::{CmdName, CommandRecord, DecodeError, ErrReason, ResponseRecord},
};
use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::{
    dispatch::{DispatchError, DispatchHandle, OutboundSlot},
    params::{SecondClientPolicy, TankExecParams},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct CmdServer {
    listener: TcpListener,
    local_addr: SocketAddr,

    dispatch: DispatchHandle,
    outbound: OutboundSlot,
    shutdown: Arc<AtomicBool>,

    policy: SecondClientPolicy,
    session_params: SessionParams,

    next_id: u64,
    active: Option<ActiveSession>,
}

#[derive(Debug, Clone)]
struct SessionParams {
    max_line_len: usize,
    idle_timeout: Option<Duration>,
    poll: Duration,
    write_timeout: Duration,
    queue_len: usize,
}

struct ActiveSession {
    id: u64,
    peer: SocketAddr,

    /// Clone of the session socket, used to unblock the session when it's ended from outside
    stream: TcpStream,

    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CmdServerError {
    #[error("Couldn't bind the command endpoint {0}: {1}")]
    BindError(String, io::Error),

    #[error("Couldn't set up the session socket: {0}")]
    SocketError(io::Error),

    #[error("Couldn't start a session thread: {0}")]
    ThreadError(io::Error),
}

/// Reasons a session ends.
#[derive(Debug, Error)]
enum SessionEnd {
    #[error("the client closed the connection")]
    Closed,

    #[error("the session was stopped by the server")]
    Stopped,

    #[error("no traffic for {0:?}")]
    Idle(Duration),

    #[error("a line exceeded {0} bytes")]
    Overflow(usize),

    #[error("the writer failed")]
    WriterFailed,

    #[error("network error: {0}")]
    Net(NetError),

    #[error("dispatch error: {0}")]
    Dispatch(DispatchError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CmdServer {
    /// Bind the command endpoint. No connections are accepted until the server is run.
    pub fn new(
        params: &TankExecParams,
        dispatch: DispatchHandle,
        outbound: OutboundSlot,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, CmdServerError> {
        let bind_err = |e| CmdServerError::BindError(params.cmd_endpoint.clone(), e);

        let listener = TcpListener::bind(&params.cmd_endpoint).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!("Command server listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            dispatch,
            outbound,
            shutdown,
            policy: params.second_client_policy,
            session_params: SessionParams {
                max_line_len: params.max_line_len,
                idle_timeout: util::time::millis_or_disabled(params.idle_timeout_ms),
                poll: Duration::from_millis(params.poll_timeout_ms.max(1)),
                write_timeout: Duration::from_millis(params.write_timeout_ms.max(1)),
                queue_len: params.outbound_queue_len.max(1),
            },
            next_id: 0,
            active: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the server on a new thread.
    pub fn spawn(self) -> Result<JoinHandle<()>, CmdServerError> {
        thread::Builder::new()
            .name("cmd_server".into())
            .spawn(move || self.run())
            .map_err(CmdServerError::ThreadError)
    }

    /// Accept and serve clients until the shutdown flag is set.
    pub fn run(mut self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.reap_session();

            match self.listener.accept() {
                Ok((stream, peer)) => self.handle_connection(stream, peer),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(self.session_params.poll)
                }
                Err(e) => {
                    warn!("Error accepting client: {}", e);
                    thread::sleep(self.session_params.poll);
                }
            }
        }

        self.end_session();
        info!("Command server stopped");
    }

    fn handle_connection(&mut self, stream: TcpStream, peer: SocketAddr) {
        info!("Client connected from {}", peer);

        if let Some(active_peer) = self.active.as_ref().map(|s| s.peer) {
            match self.policy {
                SecondClientPolicy::Reject => {
                    info!(
                        "Rejecting {}, a session with {} is already active",
                        peer, active_peer
                    );
                    reject(stream, self.session_params.write_timeout);
                    return;
                }
                SecondClientPolicy::Evict => {
                    info!("Evicting {} in favour of {}", active_peer, peer);
                    self.end_session();
                }
            }
        }

        match self.start_session(stream, peer) {
            Ok(s) => self.active = Some(s),
            Err(e) => warn!("Couldn't start session with {}: {}", peer, e),
        }
    }

    fn start_session(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<ActiveSession, CmdServerError> {
        let p = &self.session_params;

        stream
            .set_nonblocking(false)
            .and_then(|_| stream.set_read_timeout(Some(p.poll)))
            .and_then(|_| stream.set_write_timeout(Some(p.write_timeout)))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(CmdServerError::SocketError)?;
        let control = stream.try_clone().map_err(CmdServerError::SocketError)?;

        let id = self.next_id;
        self.next_id += 1;

        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        let ctx = SessionContext {
            id,
            peer,
            params: p.clone(),
            dispatch: self.dispatch.clone(),
            outbound: self.outbound.clone(),
            stop: stop.clone(),
            shutdown: self.shutdown.clone(),
        };
        let thread_done = done.clone();

        let handle = thread::Builder::new()
            .name(format!("cmd_session_{}", id))
            .spawn(move || {
                session_thread(ctx, stream);
                thread_done.store(true, Ordering::Relaxed);
            })
            .map_err(CmdServerError::ThreadError)?;

        Ok(ActiveSession {
            id,
            peer,
            stream: control,
            stop,
            done,
            handle,
        })
    }

    /// End the active session if there is one, waiting until its motors have been stopped.
    fn end_session(&mut self) {
        if let Some(s) = self.active.take() {
            s.stop.store(true, Ordering::Relaxed);
            s.stream.shutdown(Shutdown::Both).ok();
            if s.handle.join().is_err() {
                warn!("Session {} panicked", s.id);
            }
        }
    }

    /// Clear the active session if it has ended by itself.
    fn reap_session(&mut self) {
        if self
            .active
            .as_ref()
            .map(|s| s.done.load(Ordering::Relaxed))
            .unwrap_or(false)
        {
            self.end_session();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// SESSION
// ------------------------------------------------------------------------------------------------

/// Everything a session thread needs.
struct SessionContext {
    id: u64,
    peer: SocketAddr,
    params: SessionParams,
    dispatch: DispatchHandle,
    outbound: OutboundSlot,
    stop: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl SessionContext {
    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || self.shutdown.load(Ordering::Relaxed)
    }
}

fn session_thread(ctx: SessionContext, stream: TcpStream) {
    let (sender, receiver) = mpsc::sync_channel(ctx.params.queue_len);

    let peer = ctx.peer;
    let writer = match stream.try_clone().and_then(|write_stream| {
        thread::Builder::new()
            .name(format!("cmd_writer_{}", ctx.id))
            .spawn(move || writer_thread(write_stream, receiver, peer))
    }) {
        Ok(jh) => jh,
        Err(e) => {
            warn!("Couldn't start the writer for session {}: {}", ctx.id, e);
            stream.shutdown(Shutdown::Both).ok();
            return;
        }
    };

    ctx.outbound.attach(ctx.id, sender.clone());

    let end = match stream.try_clone() {
        Ok(s) => read_loop(&ctx, s, &sender),
        Err(e) => SessionEnd::Net(NetError::Io(e)),
    };

    info!("Session {} with {} ended: {}", ctx.id, ctx.peer, end);

    ctx.outbound.detach(ctx.id);

    // Zero the motors whatever ended the session
    match ctx
        .dispatch
        .execute(CommandRecord::new(CmdName::Stop.as_wire(), vec![]))
    {
        Ok(r) => debug!("Motors stopped after session {}: {:?}", ctx.id, r.status),
        Err(e) => warn!("Couldn't stop the motors after session {}: {}", ctx.id, e),
    }

    // Let the writer flush whatever is queued, then close the socket
    drop(sender);
    writer.join().ok();
    stream.shutdown(Shutdown::Both).ok();
}

fn read_loop(ctx: &SessionContext, stream: TcpStream, sender: &SyncSender<Vec<u8>>) -> SessionEnd {
    let mut reader = LineReader::new(stream, ctx.params.max_line_len);
    let mut last_rx = Instant::now();

    loop {
        if ctx.should_stop() {
            return SessionEnd::Stopped;
        }

        let line = match reader.read_line() {
            Ok(Some(l)) => l,
            Ok(None) => match ctx.params.idle_timeout {
                Some(idle) if last_rx.elapsed() >= idle => return SessionEnd::Idle(idle),
                _ => continue,
            },
            Err(_) if ctx.should_stop() => return SessionEnd::Stopped,
            Err(NetError::Closed) => return SessionEnd::Closed,
            Err(NetError::Overflow { max }) => return SessionEnd::Overflow(max),
            Err(e) => return SessionEnd::Net(e),
        };
        last_rx = Instant::now();

        let response = match handle_line(&line, ctx.params.max_line_len, &ctx.dispatch) {
            Ok(Some(r)) => r,
            Ok(None) => continue,
            Err(e) => return SessionEnd::Dispatch(e),
        };

        let bytes = match response.encode() {
            Ok(b) => b,
            Err(e) => {
                warn!("Couldn't encode response {:?}: {}", response, e);
                continue;
            }
        };

        // Blocks if the queue is full so responses are never lost or reordered
        if sender.send(bytes).is_err() {
            return SessionEnd::WriterFailed;
        }
    }
}

/// Decode and execute one line. Blank lines are ignored.
fn handle_line(
    line: &[u8],
    max_len: usize,
    dispatch: &DispatchHandle,
) -> Result<Option<ResponseRecord>, DispatchError> {
    let record = match CommandRecord::decode(line, max_len) {
        Ok(r) => r,
        Err(DecodeError::Empty) => return Ok(None),
        Err(e) => {
            warn!(
                "Undecodable line {:?}: {}",
                String::from_utf8_lossy(line),
                e
            );
            return Ok(Some(ResponseRecord::protocol_error(ErrReason::DecodeError)));
        }
    };

    trace!("Received {:?}", record);

    dispatch.execute(record).map(Some)
}

fn writer_thread(mut stream: TcpStream, receiver: Receiver<Vec<u8>>, peer: SocketAddr) {
    for bytes in receiver.iter() {
        if let Err(e) = stream.write_all(&bytes) {
            warn!("Couldn't write to {}: {}", peer, e);

            // Wake the reader so the session ends
            stream.shutdown(Shutdown::Both).ok();
            return;
        }
    }
}

/// Tell a client the server is busy and close the connection.
fn reject(mut stream: TcpStream, write_timeout: Duration) {
    let result = ResponseRecord::protocol_error(ErrReason::Busy)
        .encode()
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
        .and_then(|bytes| {
            stream.set_nonblocking(false)?;
            stream.set_write_timeout(Some(write_timeout))?;
            stream.write_all(&bytes)
        });

    if let Err(e) = result {
        debug!("Couldn't send busy response: {}", e);
    }

    stream.shutdown(Shutdown::Both).ok();
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dispatch::{
            test::{test_params, StallingSonic},
            DispatchLoop, HardwareDispatch,
        },
        eqpt::{mech::SimActuatorOutputs, SensorWorker, SimActuators},
    };
    use std::{
        io::{BufRead, BufReader, Read},
        sync::Mutex,
    };

    struct TestServer {
        addr: SocketAddr,
        shutdown: Arc<AtomicBool>,
        outputs: Arc<Mutex<SimActuatorOutputs>>,
        server_jh: Option<JoinHandle<()>>,
        _dispatch: DispatchLoop,
    }

    struct TestClient {
        stream: TcpStream,
        reader: BufReader<TcpStream>,
    }

    impl TestServer {
        fn start(params: TankExecParams) -> Self {
            let sim = SimActuators::new();
            let outputs = sim.outputs();
            let sensors = SensorWorker::spawn(
                Box::new(StallingSonic(Duration::from_millis(300))),
                Duration::from_millis(params.sensor_timeout_ms),
            )
            .unwrap();
            let dispatch = HardwareDispatch::new(&params, Box::new(sim), sensors, None).unwrap();
            let dispatch = DispatchLoop::spawn(dispatch, None).unwrap();

            let shutdown = Arc::new(AtomicBool::new(false));
            let server = CmdServer::new(
                &params,
                dispatch.handle(),
                dispatch.outbound(),
                shutdown.clone(),
            )
            .unwrap();
            let addr = server.local_addr();

            Self {
                addr,
                shutdown,
                outputs,
                server_jh: Some(server.spawn().unwrap()),
                _dispatch: dispatch,
            }
        }

        fn connect(&self) -> TestClient {
            let stream = TcpStream::connect(self.addr).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(3)))
                .unwrap();
            TestClient {
                reader: BufReader::new(stream.try_clone().unwrap()),
                stream,
            }
        }

        fn motors(&self) -> (i64, i64) {
            self.outputs.lock().unwrap().motors
        }

        /// Wait for the motors to reach the given speeds.
        fn wait_motors(&self, motors: (i64, i64)) -> bool {
            let deadline = Instant::now() + Duration::from_secs(3);
            while Instant::now() < deadline {
                if self.motors() == motors {
                    return true;
                }
                thread::sleep(Duration::from_millis(10));
            }
            false
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.shutdown.store(true, Ordering::Relaxed);
            if let Some(jh) = self.server_jh.take() {
                jh.join().unwrap();
            }
        }
    }

    impl TestClient {
        fn send(&mut self, line: &str) {
            self.stream.write_all(line.as_bytes()).unwrap();
        }

        fn recv(&mut self) -> String {
            let mut line = String::new();
            self.reader.read_line(&mut line).unwrap();
            line
        }

        fn request(&mut self, line: &str) -> String {
            self.send(line);
            self.recv()
        }

        /// True if the server closes the connection.
        fn is_closed(&mut self) -> bool {
            let mut buf = [0u8; 256];
            let deadline = Instant::now() + Duration::from_secs(3);
            while Instant::now() < deadline {
                match self.reader.read(&mut buf) {
                    Ok(0) => return true,
                    Ok(_) => continue,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                    Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                    Err(_) => return true,
                }
            }
            false
        }
    }

    fn params() -> TankExecParams {
        TankExecParams {
            cmd_endpoint: "127.0.0.1:0".into(),
            poll_timeout_ms: 10,
            idle_timeout_ms: 0,
            ..test_params()
        }
    }

    #[test]
    fn test_motor_clamping_scenario() {
        let server = TestServer::start(params());
        let mut client = server.connect();

        assert_eq!(
            client.request("CMD_MOTOR#2000#2000\n"),
            "CMD_MOTOR#OK#2000#2000\n"
        );
        assert_eq!(
            client.request("CMD_MOTOR#5000#5000\n"),
            "CMD_MOTOR#OK#2000#2000\n"
        );
        assert_eq!(server.motors(), (2000, 2000));
    }

    #[test]
    fn test_garbage_keeps_connection_open() {
        let server = TestServer::start(params());
        let mut client = server.connect();

        assert_eq!(client.request("GARBAGE\n"), "ERR#DecodeError\n");

        // Blank lines get no response at all
        client.send("\n");
        assert_eq!(client.request("CMD_STOP\n"), "CMD_STOP#OK\n");
        assert_eq!(client.request("CMD_SERVO#0\n"), "CMD_SERVO#ERR#BadParams\n");
    }

    #[test]
    fn test_responses_in_arrival_order() {
        let server = TestServer::start(params());
        let mut client = server.connect();

        // All written at once before any response is read
        let batch: String = (0..30)
            .map(|i| format!("CMD_LED#{}#{}#0#0\n", i % 4, i))
            .collect();
        client.send(&batch);

        for i in 0..30 {
            assert_eq!(client.recv(), format!("CMD_LED#OK#{}#{}#0#0\n", i % 4, i));
        }
    }

    #[test]
    fn test_sensor_timeout_does_not_stall_session() {
        let server = TestServer::start(params());
        let mut client = server.connect();

        assert_eq!(client.request("CMD_SONIC\n"), "CMD_SONIC#ERR#Timeout\n");

        let start = Instant::now();
        assert_eq!(client.request("CMD_MOTOR#1#1\n"), "CMD_MOTOR#OK#1#1\n");
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_stop_on_disconnect() {
        let server = TestServer::start(params());
        let mut client = server.connect();

        assert_eq!(
            client.request("CMD_MOTOR#500#-500\n"),
            "CMD_MOTOR#OK#500#-500\n"
        );
        assert_eq!(server.motors(), (500, -500));

        drop(client);
        assert!(server.wait_motors((0, 0)));
    }

    #[test]
    fn test_evict_policy() {
        let server = TestServer::start(params());
        let mut first = server.connect();
        assert_eq!(first.request("CMD_MOTOR#300#300\n"), "CMD_MOTOR#OK#300#300\n");

        let mut second = server.connect();
        assert!(first.is_closed());
        assert!(server.wait_motors((0, 0)));

        assert_eq!(second.request("CMD_MOTOR#10#20\n"), "CMD_MOTOR#OK#10#20\n");
    }

    #[test]
    fn test_reject_policy() {
        let server = TestServer::start(TankExecParams {
            second_client_policy: SecondClientPolicy::Reject,
            ..params()
        });
        let mut first = server.connect();
        assert_eq!(first.request("CMD_STOP\n"), "CMD_STOP#OK\n");

        let mut second = server.connect();
        assert_eq!(second.recv(), "ERR#Busy\n");
        assert!(second.is_closed());

        assert_eq!(first.request("CMD_MOTOR#1#2\n"), "CMD_MOTOR#OK#1#2\n");
    }

    #[test]
    fn test_oversized_line_drops_connection() {
        let server = TestServer::start(TankExecParams {
            max_line_len: 32,
            ..params()
        });
        let mut client = server.connect();
        assert_eq!(client.request("CMD_MOTOR#5#5\n"), "CMD_MOTOR#OK#5#5\n");

        client.send(&"A".repeat(100));
        assert!(client.is_closed());
        assert!(server.wait_motors((0, 0)));
    }

    #[test]
    fn test_idle_session_dropped() {
        let server = TestServer::start(TankExecParams {
            idle_timeout_ms: 100,
            ..params()
        });
        let mut client = server.connect();

        let start = Instant::now();
        assert!(client.is_closed());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
