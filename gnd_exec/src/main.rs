//! # Ground Executable
//!
//! This executable runs on the operator's PC:
//! - Client session, holding the command connection to the tank and reconnecting when it drops
//! - Controller adapter, driving the tank from a gamepad or a controller script
//! - Video client, receiving the camera stream
//! - Console, for driving the tank by hand

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use structopt::StructOpt;

// Internal
use gnd_lib::{
    console::{run_console, spawn_event_printer},
    controller::{
        spawn_controller, ControllerAdapter, GamepadDevice, InputDevice, Intent, IntentSink,
        ScriptedDevice,
    },
    params::GndExecParams,
    session::{ClientSession, CommandSender, TcpTransport},
    video_client::VideoToggle,
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "gnd_exec", about = "Ground station for the remote controlled tank")]
struct Opt {
    /// Parameter file to use instead of params/gnd_exec.toml
    #[structopt(short, long, parse(from_os_str))]
    params: Option<PathBuf>,

    /// Override the tank's command endpoint, e.g. 192.168.1.20:5003
    #[structopt(long)]
    cmd_endpoint: Option<String>,

    /// Override the tank's video endpoint, e.g. 192.168.1.20:8003
    #[structopt(long)]
    video_endpoint: Option<String>,

    /// Drive the tank from a controller script (JSON)
    #[structopt(long, parse(from_os_str), conflicts_with = "gamepad")]
    script: Option<PathBuf>,

    /// Drive the tank from a gamepad
    #[structopt(long)]
    gamepad: bool,

    /// Use the first gamepad whose name contains this, rather than the first one found
    #[structopt(long, requires = "gamepad")]
    gamepad_name: Option<String>,

    /// Start the video viewer straight away
    #[structopt(long)]
    video: bool,

    /// Log at trace level
    #[structopt(short, long)]
    verbose: bool,
}

/// Routes controller intents into the session and the video client.
struct GroundSink {
    sender: CommandSender,
    video: VideoToggle,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl IntentSink for GroundSink {
    fn handle(&mut self, intent: Intent) {
        let result = match intent {
            Intent::Command(cmd) => self.sender.send(&cmd).map_err(|e| e.to_string()),
            Intent::Reconnect => self.sender.reconnect().map_err(|e| e.to_string()),
            Intent::ToggleVideo => self.video.toggle().map(|_| ()).map_err(|e| e.to_string()),
        };

        if let Err(e) = result {
            warn!("Could not act on controller input: {}", e);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("gnd_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger, the console owns stdout so logs only go to the session file
    let level = if opt.verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    logger_init(level, &session, false).wrap_err("Failed to initialise logging")?;

    info!("Ground Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut params: GndExecParams = match opt.params {
        Some(ref path) => util::params::load_from_path(path),
        None => util::params::load("gnd_exec.toml"),
    }
    .wrap_err("Failed to load the ground parameters")?;

    if let Some(ep) = opt.cmd_endpoint {
        params.cmd_endpoint = ep;
    }
    if let Some(ep) = opt.video_endpoint {
        params.video_endpoint = ep;
    }

    params
        .validate()
        .wrap_err("Invalid ground parameters")?;

    info!("Parameters loaded");

    // ---- CLIENT SESSION ----

    let transport = TcpTransport::new(
        &params.cmd_endpoint,
        Duration::from_millis(params.session.connect_timeout_ms),
        Duration::from_millis(params.session.poll_ms.max(1)),
        params.session.max_line_len,
    );
    let (mut client, events) = ClientSession::spawn(params.session.clone(), Box::new(transport))
        .wrap_err("Failed to start the client session")?;
    let printer = spawn_event_printer(events).wrap_err("Failed to start the event printer")?;

    // ---- VIDEO ----

    let video = VideoToggle::new(&params.video_endpoint, params.video.clone());
    if opt.video || params.video.auto_start {
        video.start().wrap_err("Failed to start the video client")?;
    }

    // ---- CONTROLLER ----

    let shutdown = Arc::new(AtomicBool::new(false));

    let device: Option<Box<dyn InputDevice>> = if let Some(ref path) = opt.script {
        let device = ScriptedDevice::from_path(path)
            .wrap_err_with(|| format!("Failed to load the controller script {:?}", path))?;
        info!("Driving from controller script {:?}", path);
        Some(Box::new(device))
    } else if opt.gamepad {
        let device = GamepadDevice::open(
            opt.gamepad_name.clone(),
            Duration::from_millis(params.controller.tick_ms.max(1)),
        )
        .wrap_err("Failed to open the gamepad")?;
        info!("Driving from the gamepad");
        Some(Box::new(device))
    } else {
        None
    };

    let controller = match device {
        Some(device) => {
            let sink = GroundSink {
                sender: client.sender(),
                video: video.clone(),
            };
            Some(
                spawn_controller(
                    device,
                    ControllerAdapter::new(params.controller.clone()),
                    Box::new(sink),
                    shutdown.clone(),
                )
                .wrap_err("Failed to start the controller")?,
            )
        }
        None => None,
    };

    // ---- CONSOLE ----

    let history = session
        .session_root
        .parent()
        .map(|p| p.join(&params.history_file))
        .unwrap_or_else(|| params.history_file.clone());

    info!("Initialisation complete");

    run_console(&client, &video, &history).wrap_err("Console failed")?;

    // ---- SHUTDOWN ----

    shutdown.store(true, Ordering::Relaxed);
    if let Some(c) = controller {
        if c.join().is_err() {
            warn!("Controller thread panicked");
        }
    }

    video.stop();
    client.stop();
    drop(client);

    if printer.join().is_err() {
        warn!("Event printer panicked");
    }

    info!("Ground executable stopped");

    Ok(())
}
