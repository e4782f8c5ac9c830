//! # Controller Input Adapter
//!
//! Turns game controller state into tank commands. The left stick drives the tracks and is
//! level-triggered: it's sampled every tick and a motor command goes out whenever the resulting
//! speeds change. The right stick nudges the camera servos. Buttons are edge-triggered, holding
//! one down only acts once.
//!
//! | Input             | Action                      |
//! |-------------------|-----------------------------|
//! | A                 | Pinch the clamp             |
//! | B                 | Drop from the clamp         |
//! | X                 | Toggle the video viewer     |
//! | Y                 | Camera servos to home       |
//! | Back              | Ultrasonic distance query   |
//! | Start             | Reconnect                   |
//! | D-pad up/down     | Next LED mode               |
//! | D-pad left/right  | Next operation mode         |

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod device;
mod gamepad;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use comms_if::{
    eqpt::{ClampAction, LedMode, OperationMode, SensorId},
    tc::Command,
};

use crate::params::ControllerParams;

pub use device::{Buttons, ControllerState, InputDevice, InputError, ScriptFrame, ScriptedDevice};
pub use gamepad::{GamepadDevice, PadAxis, PadButton, PadEvent};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Receives the intents produced by the controller thread.
pub trait IntentSink: Send {
    fn handle(&mut self, intent: Intent);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ControllerAdapter {
    params: ControllerParams,

    /// Speeds most recently demanded, `(left, right)`
    last_motor: (i64, i64),

    pan_deg: i64,
    tilt_deg: i64,

    led_mode: LedMode,
    op_mode: OperationMode,

    last_buttons: Buttons,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Send a command to the tank
    Command(Command),

    ToggleVideo,

    Reconnect,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControllerAdapter {
    pub fn new(params: ControllerParams) -> Self {
        let pan_deg = params.pan_home_deg;
        let tilt_deg = params.tilt_home_deg;

        Self {
            params,
            last_motor: (0, 0),
            pan_deg,
            tilt_deg,
            led_mode: LedMode::default(),
            op_mode: OperationMode::default(),
            last_buttons: Buttons::default(),
        }
    }

    /// Process one sample from the controller.
    pub fn step(&mut self, state: &ControllerState) -> Vec<Intent> {
        let mut intents = Vec::new();

        // Tracks
        let ly = if self.params.invert_y {
            -state.left_y
        } else {
            state.left_y
        };
        let motor = mix(
            apply_deadzone(ly, self.params.deadzone),
            apply_deadzone(state.left_x, self.params.deadzone),
            self.params.max_motor_speed,
        );
        if motor != self.last_motor {
            self.last_motor = motor;
            intents.push(Intent::Command(Command::Motor {
                left: motor.0,
                right: motor.1,
            }));
        }

        // Camera
        let pan_step = self.servo_step(state.right_x);
        let tilt_step = self.servo_step(state.right_y);
        let pan = self.clamp_servo(self.pan_deg + pan_step);
        let tilt = self.clamp_servo(self.tilt_deg - tilt_step);
        if pan != self.pan_deg {
            self.pan_deg = pan;
            intents.push(self.pan_cmd());
        }
        if tilt != self.tilt_deg {
            self.tilt_deg = tilt;
            intents.push(self.tilt_cmd());
        }

        // Buttons
        let now = state.buttons;
        let was = self.last_buttons;
        self.last_buttons = now;

        if now.a && !was.a {
            intents.push(Intent::Command(Command::Action(ClampAction::Pinch)));
        }
        if now.b && !was.b {
            intents.push(Intent::Command(Command::Action(ClampAction::Drop)));
        }
        if now.x && !was.x {
            intents.push(Intent::ToggleVideo);
        }
        if now.y && !was.y {
            self.pan_deg = self.params.pan_home_deg;
            self.tilt_deg = self.params.tilt_home_deg;
            intents.push(self.pan_cmd());
            intents.push(self.tilt_cmd());
        }
        if now.back && !was.back {
            intents.push(Intent::Command(Command::Query(SensorId::Sonic)));
        }
        if now.start && !was.start {
            intents.push(Intent::Reconnect);
        }

        let vertical = now.dpad_up || now.dpad_down;
        if vertical && !(was.dpad_up || was.dpad_down) {
            self.led_mode = self.led_mode.next();
            intents.push(Intent::Command(Command::LedMode(self.led_mode)));
        }

        let horizontal = now.dpad_left || now.dpad_right;
        if horizontal && !(was.dpad_left || was.dpad_right) {
            self.op_mode = self.op_mode.next();
            intents.push(Intent::Command(Command::Mode(self.op_mode)));
        }

        intents
    }

    /// Halt the tank, used when the controller can no longer be read.
    pub fn stop(&mut self) -> Intent {
        self.last_motor = (0, 0);
        self.last_buttons = Buttons::default();
        Intent::Command(Command::Stop)
    }

    fn servo_step(&self, axis: f64) -> i64 {
        // Truncated, small deflections don't move the camera at all
        (apply_deadzone(axis, self.params.deadzone) * self.params.servo_step_deg) as i64
    }

    /// Must not panic, even with reversed limits.
    fn clamp_servo(&self, angle: i64) -> i64 {
        angle
            .max(self.params.servo_min_deg)
            .min(self.params.servo_max_deg)
    }

    fn pan_cmd(&self) -> Intent {
        Intent::Command(Command::Servo {
            index: self.params.pan_servo,
            angle: self.pan_deg,
        })
    }

    fn tilt_cmd(&self) -> Intent {
        Intent::Command(Command::Servo {
            index: self.params.tilt_servo,
            angle: self.tilt_deg,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Zero any axis value whose magnitude is at or below the deadzone.
pub fn apply_deadzone(value: f64, deadzone: f64) -> f64 {
    if !value.is_finite() || value.abs() <= deadzone {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// Differential mix of translation and rotation into `(left, right)` track speeds.
pub fn mix(translation: f64, rotation: f64, max_speed: i64) -> (i64, i64) {
    let max = max_speed.abs();
    let speed = |v: f64| ((v * max as f64).round() as i64).clamp(-max, max);

    (
        speed(translation + rotation),
        speed(translation - rotation),
    )
}

/// Start the controller thread.
///
/// The device is polled every tick and the adapter's intents passed to the sink. If the device
/// can't be read the tank is stopped once and polling carries on, so a controller which comes
/// back is picked up again. A finished script ends the thread.
pub fn spawn_controller(
    mut device: Box<dyn InputDevice>,
    mut adapter: ControllerAdapter,
    mut sink: Box<dyn IntentSink>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let tick = Duration::from_millis(
        adapter
            .params
            .tick_ms
            .max(adapter.params.min_command_interval_ms)
            .max(1),
    );

    thread::Builder::new()
        .name("controller".into())
        .spawn(move || {
            let mut halted = false;

            info!("Controller started, polling every {:?}", tick);

            while !shutdown.load(Ordering::Relaxed) {
                match device.poll() {
                    Ok(state) => {
                        if halted {
                            info!("Controller input restored");
                            halted = false;
                        }
                        for intent in adapter.step(&state) {
                            debug!("Controller intent: {:?}", intent);
                            sink.handle(intent);
                        }
                    }
                    Err(InputError::Exhausted) => {
                        info!("Controller script finished");
                        sink.handle(adapter.stop());
                        break;
                    }
                    Err(e) => {
                        if !halted {
                            warn!("Controller read failed, stopping the tank: {}", e);
                            sink.handle(adapter.stop());
                            halted = true;
                        }
                    }
                }

                thread::sleep(tick);
            }

            info!("Controller stopped");
        })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
