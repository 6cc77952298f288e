use gilrs::{Axis, Button, EventType, GamepadId, Gilrs};
use slog::Logger;

use crate::config::{JoystickConfig, PadButton, StickAxis};
use crate::errors::*;
use crate::input::{AxisReading, DriverControls, GamepadFrame, InputSource};

/// A gamepad read through gilrs.
pub struct Joystick {
    gilrs: Gilrs,
    id: GamepadId,
    name: String,
    steering_axis: Axis,
    throttle_axis: Axis,
    buttons: Vec<(PadButton, Button)>,
    controls: DriverControls,
    log: Logger,
}

impl Joystick {
    pub fn open(config: &JoystickConfig, log: &Logger) -> Result<Joystick> {
        let log = log.new(o!("component" => "joystick"));
        let gilrs = Gilrs::new().map_err(|e| {
            Error::from(ErrorKind::DeviceUnavailable(format!(
                "gamepad support failed to start: {}",
                e
            )))
        })?;

        let mut names = vec![];
        let mut found = None;
        for (id, gamepad) in gilrs.gamepads() {
            names.push(gamepad.name().to_string());
            if found.is_none() && (config.device.is_empty() || gamepad.name().contains(&config.device)) {
                found = Some((id, gamepad.name().to_string()));
            }
        }
        debug!(log, "Gamepads available"; "count" => names.len(), "names" => ?names);

        let (id, name) = match found {
            Some(pad) => pad,
            None if config.device.is_empty() => {
                bail!(ErrorKind::DeviceUnavailable("no gamepad connected".into()))
            }
            None => bail!(ErrorKind::DeviceUnavailable(format!(
                "no gamepad matching {:?} among {:?}",
                config.device, names
            ))),
        };
        info!(log, "Opened gamepad"; "name" => &name, "id" => %id);

        let mut buttons: Vec<(PadButton, Button)> = vec![];
        for &button in config.buttons.all().iter() {
            if !buttons.iter().any(|&(b, _)| b == button) {
                buttons.push((button, gilrs_button(button)));
            }
        }

        Ok(Joystick {
            gilrs,
            id,
            name,
            steering_axis: gilrs_axis(config.steering_axis),
            throttle_axis: gilrs_axis(config.throttle_axis),
            buttons,
            controls: DriverControls::new(config, log.clone()),
            log,
        })
    }

    fn unavailable(&self) -> Error {
        ErrorKind::DeviceUnavailable(format!("{} disconnected", self.name)).into()
    }
}

impl InputSource for Joystick {
    fn poll(&mut self) -> Result<AxisReading> {
        // Draining events is what refreshes gilrs' cached gamepad state.
        // Presses are kept so a tap shorter than a tick isn't lost.
        let mut tapped = vec![];
        while let Some(event) = self.gilrs.next_event() {
            if event.id != self.id {
                continue;
            }
            match event.event {
                EventType::Disconnected => return Err(self.unavailable()),
                EventType::ButtonPressed(button, _) => {
                    if let Some(&(pad_button, _)) = self.buttons.iter().find(|&&(_, b)| b == button) {
                        tapped.push(pad_button);
                    }
                }
                _ => {}
            }
        }

        let mut frame = match self.gilrs.connected_gamepad(self.id) {
            Some(gamepad) => GamepadFrame {
                steering: gamepad.value(self.steering_axis),
                throttle: gamepad.value(self.throttle_axis),
                pressed: self
                    .buttons
                    .iter()
                    .filter(|&&(_, button)| gamepad.is_pressed(button))
                    .map(|&(pad_button, _)| pad_button)
                    .collect(),
            },
            None => return Err(self.unavailable()),
        };
        for button in tapped {
            frame.press(button);
        }
        trace!(self.log, "Gamepad frame"; "steering" => frame.steering, "throttle" => frame.throttle);

        Ok(self.controls.update(&frame))
    }

    fn stop_requested(&self) -> bool {
        self.controls.stop_requested()
    }
}

impl Drop for Joystick {
    fn drop(&mut self) {
        debug!(self.log, "Released gamepad";
               "name" => &self.name,
               "throttle_scale" => self.controls.throttle_scale());
    }
}

fn gilrs_axis(axis: StickAxis) -> Axis {
    match axis {
        StickAxis::LeftStickX => Axis::LeftStickX,
        StickAxis::LeftStickY => Axis::LeftStickY,
        StickAxis::RightStickX => Axis::RightStickX,
        StickAxis::RightStickY => Axis::RightStickY,
        StickAxis::LeftZ => Axis::LeftZ,
        StickAxis::RightZ => Axis::RightZ,
        StickAxis::DPadX => Axis::DPadX,
        StickAxis::DPadY => Axis::DPadY,
    }
}

fn gilrs_button(button: PadButton) -> Button {
    match button {
        PadButton::South => Button::South,
        PadButton::East => Button::East,
        PadButton::North => Button::North,
        PadButton::West => Button::West,
        PadButton::LeftTrigger => Button::LeftTrigger,
        PadButton::LeftTrigger2 => Button::LeftTrigger2,
        PadButton::RightTrigger => Button::RightTrigger,
        PadButton::RightTrigger2 => Button::RightTrigger2,
        PadButton::Select => Button::Select,
        PadButton::Start => Button::Start,
        PadButton::Mode => Button::Mode,
        PadButton::LeftThumb => Button::LeftThumb,
        PadButton::RightThumb => Button::RightThumb,
        PadButton::DPadUp => Button::DPadUp,
        PadButton::DPadDown => Button::DPadDown,
        PadButton::DPadLeft => Button::DPadLeft,
        PadButton::DPadRight => Button::DPadRight,
    }
}
