//! # Hardware Dispatch
//!
//! [`HardwareDispatch`] is the only path to the tank's actuators. It validates each command,
//! clamps demands to what the hardware can do, drives the actuators and builds the response which
//! is returned to the client. It runs on its own thread inside a [`DispatchLoop`], see the
//! [`worker`] module.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod state;
mod worker;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::SensorId,
    tc::{CmdName, Command, CommandError, CommandRecord, ErrReason, ResponseRecord},
};
use log::{debug, info, warn};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::{
    eqpt::{ActuatorError, Actuators, SensorError, SensorWorker},
    params::TankExecParams,
    stream::{StreamControl, StreamServerError},
};

pub use state::*;
pub use worker::*;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct HardwareDispatch {
    max_motor_speed: i64,

    state: ActuatorState,

    actuators: Box<dyn Actuators>,

    sensors: SensorWorker,

    /// Control of the video source, if the camera is running
    stream: Option<StreamControl>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{kind} index {index} is out of range, {count} are fitted")]
    BadIndex {
        kind: &'static str,
        index: usize,
        count: usize,
    },

    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Video stream error: {0}")]
    Stream(#[from] StreamServerError),

    #[error("The camera is not running")]
    NoStream,

    #[error("The dispatch loop has stopped")]
    LoopStopped,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HardwareDispatch {
    /// Create the dispatcher, putting all actuators into their startup state.
    pub fn new(
        params: &TankExecParams,
        mut actuators: Box<dyn Actuators>,
        sensors: SensorWorker,
        stream: Option<StreamControl>,
    ) -> Result<Self, DispatchError> {
        let state = ActuatorState::new(params.num_servos, &params.servo_home_deg, params.num_leds);

        actuators.set_motors(0, 0)?;
        for (i, angle) in state.servos_deg.iter().enumerate() {
            actuators.set_servo(i, *angle)?;
        }
        actuators.set_led_mode(state.led_mode)?;

        info!(
            "Hardware dispatch ready: {} servos, {} LEDs, max motor speed {}",
            state.num_servos(),
            state.num_leds(),
            params.max_motor_speed
        );

        Ok(Self {
            max_motor_speed: params.max_motor_speed.abs(),
            state,
            actuators,
            sensors,
            stream,
        })
    }

    /// Current state of the actuators.
    pub fn state(&self) -> &ActuatorState {
        &self.state
    }

    /// Execute a decoded record, returning the response for the client.
    ///
    /// Failures are reported in the response rather than returned, so every record gets exactly
    /// one response.
    pub fn execute(&mut self, record: &CommandRecord) -> ResponseRecord {
        let cmd = match Command::parse(record) {
            Ok(c) => c,
            Err(CommandError::UnknownName(name)) => {
                warn!("Unknown command {:?}", name);
                return ResponseRecord::protocol_error(ErrReason::DecodeError);
            }
            Err(e) => {
                warn!("Invalid command: {}", e);
                return ResponseRecord::err(record.name.as_str(), ErrReason::BadParams);
            }
        };

        let name = cmd.name().as_wire();

        match self.execute_cmd(&cmd) {
            Ok(payload) => ResponseRecord::ok(name, payload),
            Err(e) => {
                warn!("{} failed: {}", name, e);
                ResponseRecord::err(name, e.reason())
            }
        }
    }

    /// Execute a typed command, returning the response payload.
    pub fn execute_cmd(&mut self, cmd: &Command) -> Result<Vec<String>, DispatchError> {
        debug!("Executing {:?}", cmd);

        match *cmd {
            Command::Motor { left, right } => {
                let left = clamp_motor(left, self.max_motor_speed);
                let right = clamp_motor(right, self.max_motor_speed);
                self.set_motors(left, right)?;
                Ok(vec![left.to_string(), right.to_string()])
            }
            Command::Servo { index, angle } => {
                check_index("Servo", index, self.state.num_servos())?;
                let angle = clamp_servo(angle);
                self.actuators.set_servo(index, angle)?;
                self.state.servos_deg[index] = angle;
                Ok(vec![index.to_string(), angle.to_string()])
            }
            Command::Led { index, rgb } => {
                check_index("LED", index, self.state.num_leds())?;
                let rgb = [
                    clamp_led_channel(rgb[0]),
                    clamp_led_channel(rgb[1]),
                    clamp_led_channel(rgb[2]),
                ];
                self.actuators.set_led(index, rgb)?;
                self.state.leds[index] = rgb;

                let mut payload = vec![index.to_string()];
                payload.extend(rgb.iter().map(|c| c.to_string()));
                Ok(payload)
            }
            Command::LedMode(mode) => {
                self.actuators.set_led_mode(mode)?;
                self.state.led_mode = mode;
                Ok(vec![mode.code().to_string()])
            }
            Command::Mode(mode) => {
                if mode != self.state.op_mode {
                    info!("Operation mode {:?} -> {:?}", self.state.op_mode, mode);
                }
                self.state.op_mode = mode;
                Ok(vec![mode.code().to_string()])
            }
            Command::Action(action) => {
                self.actuators.set_clamp(action)?;
                self.state.clamp = action;
                Ok(vec![action.code().to_string()])
            }
            Command::Query(sensor) => {
                let value = self.sensors.read(sensor)?;
                Ok(vec![sensor.format_reading(value)])
            }
            Command::Stop => {
                self.set_motors(0, 0)?;
                Ok(vec![])
            }
            Command::Record(on) => {
                let stream = self.stream.as_ref().ok_or(DispatchError::NoStream)?;
                stream.set_recording(on)?;
                Ok(vec![if on { "1" } else { "0" }.to_string()])
            }
            Command::Heartbeat => Ok(vec![]),
        }
    }

    /// Read every sensor, producing the telemetry records for the successful reads followed by
    /// the current track speeds.
    ///
    /// All the reads together take at most one sensor timeout, sensors which don't fit in that
    /// are skipped until the next cycle.
    pub fn sample_telemetry(&mut self) -> Vec<ResponseRecord> {
        let mut records = Vec::with_capacity(SensorId::ALL.len() + 1);
        let deadline = Instant::now() + self.sensors.timeout();

        for sensor in SensorId::ALL.iter() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left == Duration::ZERO {
                debug!("No {:?} telemetry this cycle: out of time", sensor);
                continue;
            }

            match self.sensors.read_within(*sensor, left) {
                Ok(v) => records.push(ResponseRecord::ok(
                    sensor.cmd_name().as_wire(),
                    vec![sensor.format_reading(v)],
                )),
                Err(e) => debug!("No {:?} telemetry this cycle: {}", sensor, e),
            }
        }

        let (left, right) = self.state.motors;
        records.push(ResponseRecord::ok(
            CmdName::MotorState.as_wire(),
            vec![left.to_string(), right.to_string()],
        ));

        records
    }

    fn set_motors(&mut self, left: i64, right: i64) -> Result<(), DispatchError> {
        self.actuators.set_motors(left, right)?;
        self.state.motors = (left, right);
        Ok(())
    }
}

impl DispatchError {
    /// The reason token reported to the client for this error.
    pub fn reason(&self) -> ErrReason {
        match self {
            DispatchError::BadIndex { .. } => ErrReason::BadIndex,
            DispatchError::Sensor(SensorError::Timeout(_))
            | DispatchError::Sensor(SensorError::Stalled) => ErrReason::Timeout,
            DispatchError::Sensor(_) => ErrReason::SensorFault,
            DispatchError::Actuator(_)
            | DispatchError::Stream(_)
            | DispatchError::NoStream
            | DispatchError::LoopStopped => ErrReason::Unavailable,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn check_index(kind: &'static str, index: usize, count: usize) -> Result<(), DispatchError> {
    if index < count {
        Ok(())
    } else {
        Err(DispatchError::BadIndex { kind, index, count })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::eqpt::{mech::SimActuatorOutputs, SimActuators, TelemetrySource};
    use comms_if::tc::Status;
    use std::{
        sync::{Arc, Mutex},
        thread,
    };

    /// Source whose sonic sensor stalls, the rest answer immediately.
    pub(crate) struct StallingSonic(pub Duration);

    impl TelemetrySource for StallingSonic {
        fn read(&mut self, sensor: SensorId) -> Result<f64, SensorError> {
            match sensor {
                SensorId::Sonic => {
                    thread::sleep(self.0);
                    Ok(42.0)
                }
                SensorId::Line => Ok(5.0),
                SensorId::Power => Err(SensorError::Fault("adc".into())),
            }
        }
    }

    pub(crate) fn test_params() -> TankExecParams {
        TankExecParams {
            max_motor_speed: 2000,
            sensor_timeout_ms: 50,
            ..Default::default()
        }
    }

    fn dispatch() -> (HardwareDispatch, Arc<Mutex<SimActuatorOutputs>>) {
        let params = test_params();
        let sim = SimActuators::new();
        let outputs = sim.outputs();

        let sensors = SensorWorker::spawn(
            Box::new(StallingSonic(Duration::from_millis(300))),
            Duration::from_millis(params.sensor_timeout_ms),
        )
        .unwrap();

        let d = HardwareDispatch::new(&params, Box::new(sim), sensors, None).unwrap();
        (d, outputs)
    }

    fn exec(d: &mut HardwareDispatch, line: &str) -> String {
        let rec = CommandRecord::decode(line.as_bytes(), 256).unwrap();
        String::from_utf8(d.execute(&rec).encode().unwrap()).unwrap()
    }

    #[test]
    fn test_motor_clamping() {
        let (mut d, outputs) = dispatch();

        assert_eq!(exec(&mut d, "CMD_MOTOR#2000#2000\n"), "CMD_MOTOR#OK#2000#2000\n");
        assert_eq!(exec(&mut d, "CMD_MOTOR#5000#5000\n"), "CMD_MOTOR#OK#2000#2000\n");
        assert_eq!(exec(&mut d, "CMD_MOTOR#-9000#150\n"), "CMD_MOTOR#OK#-2000#150\n");
        assert_eq!(d.state().motors, (-2000, 150));
        assert_eq!(outputs.lock().unwrap().motors, (-2000, 150));

        assert_eq!(exec(&mut d, "CMD_STOP\n"), "CMD_STOP#OK\n");
        assert_eq!(d.state().motors, (0, 0));
    }

    #[test]
    fn test_servo_and_led() {
        let (mut d, _) = dispatch();

        assert_eq!(exec(&mut d, "CMD_SERVO#1#200\n"), "CMD_SERVO#OK#1#180\n");
        assert_eq!(exec(&mut d, "CMD_SERVO#7#90\n"), "CMD_SERVO#ERR#BadIndex\n");
        assert_eq!(exec(&mut d, "CMD_SERVO#-1#90\n"), "CMD_SERVO#ERR#BadParams\n");
        assert_eq!(exec(&mut d, "CMD_LED#0#300#-4#12\n"), "CMD_LED#OK#0#255#0#12\n");
        assert_eq!(exec(&mut d, "CMD_LED#4#0#0#0\n"), "CMD_LED#ERR#BadIndex\n");
        assert_eq!(d.state().servos_deg[1], 180);
        assert_eq!(d.state().leds[0], [255, 0, 12]);
    }

    #[test]
    fn test_modes() {
        let (mut d, _) = dispatch();

        assert_eq!(exec(&mut d, "CMD_LED_MOD#4\n"), "CMD_LED_MOD#OK#4\n");
        assert_eq!(exec(&mut d, "CMD_LED_MOD#5\n"), "CMD_LED_MOD#ERR#BadParams\n");
        assert_eq!(exec(&mut d, "CMD_MODE#1\n"), "CMD_MODE#OK#1\n");
        assert_eq!(exec(&mut d, "CMD_ACTION#2\n"), "CMD_ACTION#OK#2\n");
        assert_eq!(d.state().led_mode, comms_if::eqpt::LedMode::Rainbow);
        assert_eq!(d.state().clamp, comms_if::eqpt::ClampAction::Drop);
    }

    #[test]
    fn test_protocol_errors() {
        let (mut d, _) = dispatch();

        assert_eq!(exec(&mut d, "GARBAGE\n"), "ERR#DecodeError\n");
        assert_eq!(exec(&mut d, "CMD_MOTOR#1\n"), "CMD_MOTOR#ERR#BadParams\n");
        assert_eq!(exec(&mut d, "CMD_HEARTBEAT\n"), "CMD_HEARTBEAT#OK\n");
        assert_eq!(exec(&mut d, "CMD_RECORD#1\n"), "CMD_RECORD#ERR#Unavailable\n");
    }

    #[test]
    fn test_sensor_queries() {
        let (mut d, _) = dispatch();

        assert_eq!(exec(&mut d, "CMD_LINE\n"), "CMD_LINE#OK#5\n");
        assert_eq!(exec(&mut d, "CMD_POWER\n"), "CMD_POWER#ERR#SensorFault\n");
        assert_eq!(exec(&mut d, "CMD_SONIC\n"), "CMD_SONIC#ERR#Timeout\n");

        // Actuators are still immediately available after the stall
        assert_eq!(exec(&mut d, "CMD_MOTOR#10#10\n"), "CMD_MOTOR#OK#10#10\n");

        // The stalled read is still running, so this doesn't wait for a second timeout
        let start = Instant::now();
        assert_eq!(exec(&mut d, "CMD_LINE\n"), "CMD_LINE#ERR#Timeout\n");
        assert!(start.elapsed() < Duration::from_millis(30));
    }

    #[test]
    fn test_sample_telemetry() {
        let params = test_params();
        let sensors = SensorWorker::spawn(
            Box::new(StallingSonic(Duration::ZERO)),
            Duration::from_millis(params.sensor_timeout_ms),
        )
        .unwrap();
        let mut d =
            HardwareDispatch::new(&params, Box::new(SimActuators::new()), sensors, None).unwrap();

        d.execute_cmd(&Command::Motor {
            left: 300,
            right: -300,
        })
        .unwrap();

        let records = d.sample_telemetry();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "CMD_SONIC");
        assert_eq!(records[0].payload, vec!["42.0".to_string()]);
        assert_eq!(records[1].name, "CMD_LINE");
        assert_eq!(records[2].name, "CMD_MOTOR_STATE");
        assert_eq!(records[2].payload, vec!["300".to_string(), "-300".to_string()]);
        assert!(records.iter().all(|r| r.status == Status::Ok));
    }

    #[test]
    fn test_sample_telemetry_bounded_by_one_timeout() {
        let (mut d, _) = dispatch();

        for _ in 0..3 {
            let start = Instant::now();
            let records = d.sample_telemetry();
            assert!(start.elapsed() < Duration::from_millis(100));

            // Sonic stalls and the rest are skipped behind it, the track speeds always go out
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].name, "CMD_MOTOR_STATE");
        }
    }
}
