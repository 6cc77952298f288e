use crate::errors::*;

/// Pulse-width bounds of one actuator channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalibrationProfile {
    pub channel: u8,
    pub pwm_min: u16,
    pub pwm_zero: u16,
    pub pwm_max: u16,
}

/// A pulse width addressed to one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PwmCommand {
    pub channel: u8,
    pub pulse_width: u16,
}

impl CalibrationProfile {
    pub fn new(channel: u8, pwm_min: u16, pwm_zero: u16, pwm_max: u16) -> Result<CalibrationProfile> {
        if !(pwm_min <= pwm_zero && pwm_zero <= pwm_max) || pwm_min == pwm_max {
            bail!(ErrorKind::Config(format!(
                "channel {}: expected pwm_min <= pwm_zero <= pwm_max with pwm_min < pwm_max, got {} / {} / {}",
                channel, pwm_min, pwm_zero, pwm_max
            )));
        }
        Ok(CalibrationProfile {
            channel,
            pwm_min,
            pwm_zero,
            pwm_max,
        })
    }

    pub fn neutral(&self) -> PwmCommand {
        PwmCommand {
            channel: self.channel,
            pulse_width: self.pwm_zero,
        }
    }
}

/// Maps a normalized value onto the profile's pulse range.
///
/// Negative values interpolate between `pwm_zero` and `pwm_min`, positive ones
/// between `pwm_zero` and `pwm_max`. Anything outside [-1, 1] is clamped first
/// and a NaN counts as neutral.
pub fn map(value: f32, profile: &CalibrationProfile) -> u16 {
    let value = if value.is_nan() {
        0.0
    } else {
        f64::from(value).max(-1.0).min(1.0)
    };

    let min = f64::from(profile.pwm_min);
    let zero = f64::from(profile.pwm_zero);
    let max = f64::from(profile.pwm_max);

    let pulse = if value >= 0.0 {
        zero + value * (max - zero)
    } else {
        zero + value * (zero - min)
    };
    pulse.round().max(min).min(max) as u16
}
