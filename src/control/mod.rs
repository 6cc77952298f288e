
pub mod steering;
pub mod throttle;

use crate::calibration::{CalibrationProfile, PwmCommand};
use crate::errors::*;
use crate::input::AxisReading;

/// One driven channel: turns the latest reading into pulse commands.
pub trait Control {
    fn update(&mut self, reading: &AxisReading);
    fn write_commands(&self, output: &mut Vec<PwmCommand>);
    fn profile(&self) -> &CalibrationProfile;

    /// Command that leaves the channel at rest.
    fn neutral(&self) -> PwmCommand {
        self.profile().neutral()
    }
}

/// Something that can hold a channel at a pulse width.
pub trait Actuator {
    /// Prepares the channel for pulse output.
    fn attach(&mut self, profile: &CalibrationProfile) -> Result<()>;
    fn send(&mut self, command: PwmCommand) -> Result<()>;
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn attach(&mut self, profile: &CalibrationProfile) -> Result<()> {
        (**self).attach(profile)
    }

    fn send(&mut self, command: PwmCommand) -> Result<()> {
        (**self).send(command)
    }
}

fn oriented(value: f32, reversed: bool) -> f32 {
    if reversed {
        -value
    } else {
        value
    }
}
