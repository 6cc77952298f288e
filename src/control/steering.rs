
use super::{oriented, Control};
use crate::calibration::{map, CalibrationProfile, PwmCommand};
use crate::input::AxisReading;

pub struct Steering {
    // info
    profile: CalibrationProfile,
    reversed: bool,
    // state
    pub pulse_width: u16,
}

impl Steering {
    pub fn new(profile: CalibrationProfile, reversed: bool) -> Self {
        Steering {
            profile,
            reversed,
            pulse_width: profile.pwm_zero,
        }
    }
}

impl Control for Steering {
    fn update(&mut self, reading: &AxisReading) {
        self.pulse_width = map(oriented(reading.steering, self.reversed), &self.profile);
    }

    fn write_commands(&self, output: &mut Vec<PwmCommand>) {
        output.push(PwmCommand {
            channel: self.profile.channel,
            pulse_width: self.pulse_width,
        });
    }

    fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }
}
