
use std::time::Duration;

use super::{oriented, Control};
use crate::calibration::{map, CalibrationProfile, PwmCommand};
use crate::input::AxisReading;

/// Pause between the full-range pulses of the arming sequence.
pub const ARM_STEP: Duration = Duration::from_millis(10);

pub struct Throttle {
    // info
    profile: CalibrationProfile,
    reversed: bool,
    // state
    pub pulse_width: u16,
}

impl Throttle {
    /// Starts at `pwm_zero` so nothing moves before the first reading.
    pub fn new(profile: CalibrationProfile, reversed: bool) -> Self {
        Throttle {
            profile,
            reversed,
            pulse_width: profile.pwm_zero,
        }
    }

    /// Full forward, full reverse, then stopped.
    pub fn arming_sequence(&self) -> [PwmCommand; 3] {
        let channel = self.profile.channel;
        [
            PwmCommand { channel, pulse_width: self.profile.pwm_max },
            PwmCommand { channel, pulse_width: self.profile.pwm_min },
            PwmCommand { channel, pulse_width: self.profile.pwm_zero },
        ]
    }
}

impl Control for Throttle {
    fn update(&mut self, reading: &AxisReading) {
        self.pulse_width = map(oriented(reading.throttle, self.reversed), &self.profile);
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
