//! # Tank Executable
//!
//! This executable runs on board the tank:
//! - Command server, accepting the control session from the ground
//! - Hardware dispatch loop, driving the actuators and reading the sensors
//! - Video stream server

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::info;
use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};
use structopt::StructOpt;

// Internal
use tank_lib::{
    cmd_server::CmdServer,
    dispatch::{DispatchLoop, HardwareDispatch},
    eqpt::{SensorWorker, SimActuators, SimTelemetrySource},
    params::{SecondClientPolicy, TankExecParams},
    stream::{SimVideoSource, StreamServer},
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "tank_exec", about = "On board software for the remote controlled tank")]
struct Opt {
    /// Parameter file to use instead of params/tank_exec.toml
    #[structopt(short, long, parse(from_os_str))]
    params: Option<PathBuf>,

    /// Override the command endpoint, e.g. 0.0.0.0:5003
    #[structopt(long)]
    cmd_endpoint: Option<String>,

    /// Override the video endpoint, e.g. 0.0.0.0:8003
    #[structopt(long)]
    video_endpoint: Option<String>,

    /// Refuse a second client instead of evicting the current one
    #[structopt(long)]
    reject_second_client: bool,

    /// Run without the camera
    #[structopt(long)]
    no_video: bool,

    /// Log at trace level
    #[structopt(short, long)]
    verbose: bool,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("tank_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    let level = if opt.verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    logger_init(level, &session, true).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Tank Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let mut params: TankExecParams = match opt.params {
        Some(ref path) => util::params::load_from_path(path),
        None => util::params::load("tank_exec.toml"),
    }
    .wrap_err("Failed to load the tank parameters")?;

    if let Some(ep) = opt.cmd_endpoint {
        params.cmd_endpoint = ep;
    }
    if let Some(ep) = opt.video_endpoint {
        params.video_endpoint = ep;
    }
    if opt.reject_second_client {
        params.second_client_policy = SecondClientPolicy::Reject;
    }

    info!("Parameters loaded");

    // ---- VIDEO ----

    let mut stream_server = if opt.no_video {
        info!("Video disabled");
        None
    } else {
        let mut server = StreamServer::new(
            &params,
            Box::new(SimVideoSource::new(&params.video)),
            session.rec_root.clone(),
        )
        .wrap_err("Failed to initialise the stream server")?;
        server
            .start()
            .wrap_err("Failed to start the stream server")?;
        Some(server)
    };

    // ---- DISPATCH ----

    let sensors = SensorWorker::spawn(
        Box::new(SimTelemetrySource::new()),
        Duration::from_millis(params.sensor_timeout_ms),
    )
    .wrap_err("Failed to start the sensor worker")?;

    let dispatch = HardwareDispatch::new(
        &params,
        Box::new(SimActuators::new()),
        sensors,
        stream_server.as_ref().map(|s| s.control()),
    )
    .wrap_err("Failed to initialise hardware dispatch")?;

    let dispatch_loop = DispatchLoop::spawn(
        dispatch,
        util::time::millis_or_disabled(params.telemetry_period_ms),
    )
    .wrap_err("Failed to start the dispatch loop")?;

    info!("Hardware dispatch initialised");

    // ---- COMMAND SERVER ----

    let shutdown = Arc::new(AtomicBool::new(false));

    let cmd_server = CmdServer::new(
        &params,
        dispatch_loop.handle(),
        dispatch_loop.outbound(),
        shutdown,
    )
    .wrap_err("Failed to initialise the command server")?;

    // ---- MAIN LOOP ----

    info!("Initialisation complete, serving commands");

    cmd_server.run();

    // ---- SHUTDOWN ----

    if let Some(ref mut s) = stream_server {
        s.stop();
    }
    dispatch_loop.stop();

    info!("Tank executable stopped");

    Ok(())
}
