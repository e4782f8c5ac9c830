//! # Gamepad input
//!
//! A physical controller is read by a thread of its own, which forwards [`PadEvent`]s to the
//! [`GamepadDevice`]. Each poll folds the events received since the last one into the current
//! [`ControllerState`].
//!
//! The reader thread uses gilrs and is only built with the `gamepad` feature.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{Receiver, TryRecvError},
    Arc,
};

#[cfg(feature = "gamepad")]
use log::{info, warn};
#[cfg(feature = "gamepad")]
use std::{
    sync::mpsc::{self, Sender, SyncSender},
    thread,
    time::Duration,
};

use super::device::{ControllerState, InputDevice, InputError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A game controller read through a stream of [`PadEvent`]s.
pub struct GamepadDevice {
    events: Receiver<PadEvent>,
    state: ControllerState,
    connected: bool,

    /// Tells the reader thread to exit when the device is dropped
    stop: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PadEvent {
    Connected,
    Disconnected,

    /// Axis moved, value in [-1, 1] with stick up negative
    Axis(PadAxis, f64),

    /// Button pressed (`true`) or released
    Button(PadButton, bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadAxis {
    LeftX,
    LeftY,
    RightX,
    RightY,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadButton {
    A,
    B,
    X,
    Y,
    Back,
    Start,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GamepadDevice {
    /// Build a device over an event stream. It reads as disconnected until a
    /// [`PadEvent::Connected`] arrives.
    pub fn from_events(events: Receiver<PadEvent>) -> Self {
        Self {
            events,
            state: ControllerState::default(),
            connected: false,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open a gamepad, the first one connected or the first whose name contains `name`.
    ///
    /// If no matching pad is plugged in yet the device reads as disconnected until one is.
    #[cfg(feature = "gamepad")]
    pub fn open(name: Option<String>, poll: Duration) -> Result<Self, InputError> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let device = Self::from_events(rx);
        let stop = device.stop.clone();

        thread::Builder::new()
            .name("gamepad".into())
            .spawn(move || reader_thread(name, poll, tx, ready_tx, stop))
            .map_err(|e| InputError::Gamepad(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(device),
            Ok(Err(e)) => Err(InputError::Gamepad(e)),
            Err(_) => Err(InputError::Gamepad("the reader thread exited".into())),
        }
    }

    #[cfg(not(feature = "gamepad"))]
    pub fn open(_name: Option<String>, _poll: std::time::Duration) -> Result<Self, InputError> {
        Err(InputError::Gamepad(
            "built without gamepad support, rebuild with --features gamepad".into(),
        ))
    }

    fn apply(&mut self, event: PadEvent) {
        match event {
            PadEvent::Connected => self.connected = true,
            PadEvent::Disconnected => {
                self.connected = false;
                self.state = ControllerState::default();
            }
            PadEvent::Axis(axis, v) => match axis {
                PadAxis::LeftX => self.state.left_x = v,
                PadAxis::LeftY => self.state.left_y = v,
                PadAxis::RightX => self.state.right_x = v,
                PadAxis::RightY => self.state.right_y = v,
            },
            PadEvent::Button(button, down) => {
                let b = &mut self.state.buttons;
                match button {
                    PadButton::A => b.a = down,
                    PadButton::B => b.b = down,
                    PadButton::X => b.x = down,
                    PadButton::Y => b.y = down,
                    PadButton::Back => b.back = down,
                    PadButton::Start => b.start = down,
                    PadButton::DPadUp => b.dpad_up = down,
                    PadButton::DPadDown => b.dpad_down = down,
                    PadButton::DPadLeft => b.dpad_left = down,
                    PadButton::DPadRight => b.dpad_right = down,
                }
            }
        }
    }
}

impl InputDevice for GamepadDevice {
    fn poll(&mut self) -> Result<ControllerState, InputError> {
        loop {
            match self.events.try_recv() {
                Ok(e) => self.apply(e),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.connected = false;
                    break;
                }
            }
        }

        if self.connected {
            Ok(self.state)
        } else {
            Err(InputError::Disconnected)
        }
    }
}

impl Drop for GamepadDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

#[cfg(feature = "gamepad")]
fn reader_thread(
    name: Option<String>,
    poll: Duration,
    tx: Sender<PadEvent>,
    ready: SyncSender<Result<(), String>>,
    stop: Arc<AtomicBool>,
) {
    use gilrs::{EventType, Gilrs};

    let mut gilrs = match Gilrs::new() {
        Ok(g) => g,
        Err(e) => {
            ready.send(Err(e.to_string())).ok();
            return;
        }
    };

    let wanted = |pad_name: &str| name.as_deref().map_or(true, |n| pad_name.contains(n));

    let mut selected = gilrs
        .gamepads()
        .find(|(_, pad)| pad.is_connected() && wanted(pad.name()))
        .map(|(id, pad)| {
            info!("Using gamepad {:?}", pad.name());
            id
        });

    match selected {
        Some(_) => {
            tx.send(PadEvent::Connected).ok();
        }
        None => warn!("No gamepad connected, waiting for one"),
    }
    ready.send(Ok(())).ok();

    while !stop.load(Ordering::Relaxed) {
        while let Some(ev) = gilrs.next_event() {
            if selected.is_none() && matches!(ev.event, EventType::Connected) {
                let pad = gilrs.gamepad(ev.id);
                if wanted(pad.name()) {
                    info!("Using gamepad {:?}", pad.name());
                    selected = Some(ev.id);
                }
            }
            if selected != Some(ev.id) {
                continue;
            }

            let event = match ev.event {
                EventType::Connected => Some(PadEvent::Connected),
                EventType::Disconnected => {
                    warn!("Gamepad disconnected");
                    selected = None;
                    Some(PadEvent::Disconnected)
                }
                EventType::AxisChanged(axis, v, _) => pad_axis(axis, v),
                EventType::ButtonPressed(b, _) => pad_button(b).map(|b| PadEvent::Button(b, true)),
                EventType::ButtonReleased(b, _) => {
                    pad_button(b).map(|b| PadEvent::Button(b, false))
                }
                _ => None,
            };

            if let Some(e) = event {
                if tx.send(e).is_err() {
                    return;
                }
            }
        }

        thread::sleep(poll);
    }
}

/// gilrs reports stick up as positive, flipped here to match the pad convention.
#[cfg(feature = "gamepad")]
fn pad_axis(axis: gilrs::Axis, value: f32) -> Option<PadEvent> {
    use gilrs::Axis;

    let v = value as f64;
    match axis {
        Axis::LeftStickX => Some(PadEvent::Axis(PadAxis::LeftX, v)),
        Axis::LeftStickY => Some(PadEvent::Axis(PadAxis::LeftY, -v)),
        Axis::RightStickX => Some(PadEvent::Axis(PadAxis::RightX, v)),
        Axis::RightStickY => Some(PadEvent::Axis(PadAxis::RightY, -v)),
        _ => None,
    }
}

#[cfg(feature = "gamepad")]
fn pad_button(button: gilrs::Button) -> Option<PadButton> {
    use gilrs::Button;

    Some(match button {
        Button::South => PadButton::A,
        Button::East => PadButton::B,
        Button::West => PadButton::X,
        Button::North => PadButton::Y,
        Button::Select => PadButton::Back,
        Button::Start => PadButton::Start,
        Button::DPadUp => PadButton::DPadUp,
        Button::DPadDown => PadButton::DPadDown,
        Button::DPadLeft => PadButton::DPadLeft,
        Button::DPadRight => PadButton::DPadRight,
        _ => return None,
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
