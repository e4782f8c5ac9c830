//! # Mechanisms
//!
//! Motors, servos, LEDs and the gripper.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex};

use comms_if::eqpt::{ClampAction, LedMode};
use log::debug;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Output side of the tank hardware.
///
/// Values passed in have already been clamped to the hardware's range by the dispatcher.
pub trait Actuators: Send {
    fn set_motors(&mut self, left: i64, right: i64) -> Result<(), ActuatorError>;

    fn set_servo(&mut self, index: usize, angle_deg: i64) -> Result<(), ActuatorError>;

    fn set_led(&mut self, index: usize, rgb: [u8; 3]) -> Result<(), ActuatorError>;

    fn set_led_mode(&mut self, mode: LedMode) -> Result<(), ActuatorError>;

    fn set_clamp(&mut self, action: ClampAction) -> Result<(), ActuatorError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Actuators which only log what they're asked to do.
///
/// The last demands are kept in a shared [`SimActuatorOutputs`] so tests can check what reached
/// the hardware.
pub struct SimActuators {
    outputs: Arc<Mutex<SimActuatorOutputs>>,
}

/// Last demands seen by [`SimActuators`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimActuatorOutputs {
    pub motors: (i64, i64),
    pub servos: Vec<(usize, i64)>,
    pub leds: Vec<(usize, [u8; 3])>,
    pub led_mode: LedMode,
    pub clamp: ClampAction,

    /// Number of motor demands received
    pub num_motor_dems: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("The actuator driver reported a fault: {0}")]
    Fault(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimActuators {
    pub fn new() -> Self {
        Self {
            outputs: Arc::new(Mutex::new(SimActuatorOutputs::default())),
        }
    }

    /// Get a handle to the outputs which remains valid after the actuators are moved away.
    pub fn outputs(&self) -> Arc<Mutex<SimActuatorOutputs>> {
        self.outputs.clone()
    }

    fn update<F: FnOnce(&mut SimActuatorOutputs)>(&self, f: F) {
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut outputs)
    }
}

impl Default for SimActuators {
    fn default() -> Self {
        Self::new()
    }
}

impl Actuators for SimActuators {
    fn set_motors(&mut self, left: i64, right: i64) -> Result<(), ActuatorError> {
        debug!("Sim motors: left = {}, right = {}", left, right);
        self.update(|o| {
            o.motors = (left, right);
            o.num_motor_dems += 1;
        });
        Ok(())
    }

    fn set_servo(&mut self, index: usize, angle_deg: i64) -> Result<(), ActuatorError> {
        debug!("Sim servo {}: {} deg", index, angle_deg);
        self.update(|o| o.servos.push((index, angle_deg)));
        Ok(())
    }

    fn set_led(&mut self, index: usize, rgb: [u8; 3]) -> Result<(), ActuatorError> {
        debug!("Sim LED {}: {:?}", index, rgb);
        self.update(|o| o.leds.push((index, rgb)));
        Ok(())
    }

    fn set_led_mode(&mut self, mode: LedMode) -> Result<(), ActuatorError> {
        debug!("Sim LED mode: {:?}", mode);
        self.update(|o| o.led_mode = mode);
        Ok(())
    }

    fn set_clamp(&mut self, action: ClampAction) -> Result<(), ActuatorError> {
        debug!("Sim clamp: {:?}", action);
        self.update(|o| o.clamp = action);
        Ok(())
    }
}
