use std::time::Instant;

use slog::Logger;

use crate::config::{ButtonBindings, JoystickConfig, PadButton};
use crate::errors::*;

const THROTTLE_SCALE_STEP: f32 = 0.01;
const ESTOP_FORWARD_PULSE: f32 = 0.01;
const ESTOP_RAMP_STEP: f32 = 0.05;
const ESTOP_RAMP_TOLERANCE: f32 = 1e-4;
// Stick travel that counts as the driver moving it after an e-stop.
const ESTOP_RELEASE_TRAVEL: f32 = 0.05;

/// Normalized driver demand for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisReading {
    pub steering: f32,
    pub throttle: f32,
    pub timestamp: Instant,
}

impl AxisReading {
    pub fn new(steering: f32, throttle: f32) -> AxisReading {
        AxisReading {
            steering,
            throttle,
            timestamp: Instant::now(),
        }
    }
}

pub trait InputSource {
    /// Latest driver demand. Fails with `DeviceUnavailable` once the device is gone.
    fn poll(&mut self) -> Result<AxisReading>;

    /// Whether the operator asked to end the run from the device itself.
    fn stop_requested(&self) -> bool {
        false
    }
}

impl<I: InputSource + ?Sized> InputSource for Box<I> {
    fn poll(&mut self) -> Result<AxisReading> {
        (**self).poll()
    }

    fn stop_requested(&self) -> bool {
        (**self).stop_requested()
    }
}

/// Raw state of the bound axes and buttons, as read from a gamepad.
#[derive(Clone, Debug, Default)]
pub struct GamepadFrame {
    pub steering: f32,
    pub throttle: f32,
    pub pressed: Vec<PadButton>,
}

impl GamepadFrame {
    pub fn is_pressed(&self, button: PadButton) -> bool {
        self.pressed.contains(&button)
    }

    /// Marks a button as pressed in this frame, even if it was released again
    /// before the frame was read.
    pub fn press(&mut self, button: PadButton) {
        if !self.is_pressed(button) {
            self.pressed.push(button);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum EStop {
    Idle,
    Start,
    Reversed,
    Pulsed,
    Ramp(f32),
    /// Braking is over. Throttle stays at zero until the stick moves.
    Latched,
}

/// Turns gamepad frames into driver demand, handling the button actions.
pub struct DriverControls {
    // info
    bindings: ButtonBindings,
    steering_scale: f32,
    throttle_dir: f32,
    dead_zone: f32,
    log: Logger,
    // state
    throttle_scale: f32,
    constant_throttle: bool,
    estop: EStop,
    // Throttle stick position when the e-stop was pressed.
    estop_stick: f32,
    stop_requested: bool,
    was_pressed: Vec<PadButton>,
}

impl DriverControls {
    pub fn new(config: &JoystickConfig, log: Logger) -> DriverControls {
        DriverControls {
            bindings: config.buttons,
            steering_scale: config.steering_scale,
            throttle_dir: config.throttle_dir,
            dead_zone: config.dead_zone,
            log,
            throttle_scale: config.throttle_scale,
            constant_throttle: false,
            estop: EStop::Idle,
            estop_stick: 0.0,
            stop_requested: false,
            was_pressed: vec![],
        }
    }

    pub fn throttle_scale(&self) -> f32 {
        self.throttle_scale
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn update(&mut self, frame: &GamepadFrame) -> AxisReading {
        self.handle_buttons(frame);

        if let Some(throttle) = self.next_estop_throttle() {
            return AxisReading::new(0.0, throttle);
        }

        if self.estop == EStop::Latched {
            let moved = (frame.throttle - self.estop_stick).abs() > ESTOP_RELEASE_TRAVEL;
            if moved || self.filter(frame.throttle) == 0.0 {
                debug!(self.log, "E-Stop released"; "stick" => frame.throttle);
                self.estop = EStop::Idle;
            }
        }

        let steering = self.steering_scale * self.filter(frame.steering);
        let throttle = if self.constant_throttle {
            self.throttle_scale
        } else if self.estop == EStop::Latched {
            0.0
        } else {
            self.throttle_dir * self.filter(frame.throttle) * self.throttle_scale
        };
        AxisReading::new(steering, throttle)
    }

    fn filter(&self, value: f32) -> f32 {
        if value.abs() < self.dead_zone {
            0.0
        } else {
            value
        }
    }

    fn handle_buttons(&mut self, frame: &GamepadFrame) {
        let bindings = self.bindings;
        if self.pressed_now(frame, bindings.emergency_stop) {
            self.emergency_stop(frame.throttle);
        }
        if self.pressed_now(frame, bindings.constant_throttle) {
            self.constant_throttle = !self.constant_throttle;
            if self.constant_throttle && self.estop == EStop::Latched {
                self.estop = EStop::Idle;
            }
            info!(self.log, "Constant throttle"; "enabled" => self.constant_throttle);
        }
        if self.pressed_now(frame, bindings.increase_throttle) {
            self.adjust_throttle_scale(THROTTLE_SCALE_STEP);
        }
        if self.pressed_now(frame, bindings.decrease_throttle) {
            self.adjust_throttle_scale(-THROTTLE_SCALE_STEP);
        }
        if self.pressed_now(frame, bindings.stop) && !self.stop_requested {
            self.stop_requested = true;
            info!(self.log, "Stop requested from gamepad");
        }
        self.was_pressed = frame.pressed.clone();
    }

    fn pressed_now(&self, frame: &GamepadFrame, button: PadButton) -> bool {
        frame.is_pressed(button) && !self.was_pressed.contains(&button)
    }

    fn emergency_stop(&mut self, stick: f32) {
        warn!(self.log, "E-Stop!"; "throttle_scale" => self.throttle_scale);
        self.constant_throttle = false;
        self.estop = EStop::Start;
        self.estop_stick = stick;
    }

    fn adjust_throttle_scale(&mut self, step: f32) {
        let scale = (self.throttle_scale + step).max(0.0).min(1.0);
        self.throttle_scale = (scale * 100.0).round() / 100.0;
        info!(self.log, "Throttle scale"; "value" => self.throttle_scale);
    }

    // Brake, release, brake again, then ease back to stopped. ESCs with a
    // reverse mode need the release before a second reverse pulse brakes.
    fn next_estop_throttle(&mut self) -> Option<f32> {
        let (throttle, next) = match self.estop {
            EStop::Idle | EStop::Latched => return None,
            EStop::Start => (-self.throttle_scale, EStop::Reversed),
            EStop::Reversed => (ESTOP_FORWARD_PULSE, EStop::Pulsed),
            EStop::Pulsed => (-self.throttle_scale, EStop::Ramp(-self.throttle_scale)),
            EStop::Ramp(level) => {
                let level = level + ESTOP_RAMP_STEP;
                if level >= -ESTOP_RAMP_TOLERANCE {
                    debug!(self.log, "E-Stop complete");
                    (0.0, EStop::Latched)
                } else {
                    (level, EStop::Ramp(level))
                }
            }
        };
        self.estop = next;
        Some(throttle)
    }
}
