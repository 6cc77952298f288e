use crate::calibration::CalibrationProfile;
use crate::errors::*;

/// Highest value an analog message can carry (two 7-bit bytes).
pub const MAX_WIRE_VALUE: u16 = 0x3FFF;
/// Highest pin number addressable over the wire.
pub const MAX_CHANNEL: u8 = 0x7F;

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub vehicle: VehicleConfig,
    pub joystick: JoystickConfig,
    pub board: BoardConfig,
    pub steering: ChannelConfig,
    pub throttle: ThrottleConfig,
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct VehicleConfig {
    pub loop_hz: f64,
    /// Zero runs until stopped.
    pub max_loops: u64,
}

impl Default for VehicleConfig {
    fn default() -> VehicleConfig {
        VehicleConfig {
            loop_hz: 20.0,
            max_loops: 0,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct JoystickConfig {
    /// Substring of the gamepad name. Empty picks the first connected pad.
    pub device: String,
    pub steering_axis: StickAxis,
    pub throttle_axis: StickAxis,
    pub steering_scale: f32,
    pub throttle_scale: f32,
    pub throttle_dir: f32,
    pub dead_zone: f32,
    pub buttons: ButtonBindings,
}

impl Default for JoystickConfig {
    fn default() -> JoystickConfig {
        JoystickConfig {
            device: String::new(),
            steering_axis: StickAxis::RightStickX,
            throttle_axis: StickAxis::LeftStickY,
            steering_scale: 1.0,
            throttle_scale: 0.8,
            throttle_dir: 1.0,
            dead_zone: 0.0,
            buttons: ButtonBindings::default(),
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StickAxis {
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
    LeftZ,
    RightZ,
    DPadX,
    DPadY,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PadButton {
    South,
    East,
    North,
    West,
    LeftTrigger,
    LeftTrigger2,
    RightTrigger,
    RightTrigger2,
    Select,
    Start,
    Mode,
    LeftThumb,
    RightThumb,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
}

#[derive(Deserialize, Clone, Copy, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct ButtonBindings {
    pub emergency_stop: PadButton,
    pub constant_throttle: PadButton,
    pub increase_throttle: PadButton,
    pub decrease_throttle: PadButton,
    pub stop: PadButton,
}

impl Default for ButtonBindings {
    fn default() -> ButtonBindings {
        ButtonBindings {
            emergency_stop: PadButton::South,
            constant_throttle: PadButton::Select,
            increase_throttle: PadButton::DPadUp,
            decrease_throttle: PadButton::DPadDown,
            stop: PadButton::Start,
        }
    }
}

impl ButtonBindings {
    pub fn all(&self) -> [PadButton; 5] {
        [
            self.emergency_stop,
            self.constant_throttle,
            self.increase_throttle,
            self.decrease_throttle,
            self.stop,
        ]
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub startup_delay_ms: u64,
    pub verify_pins: bool,
    pub servo_min_pulse: u16,
    pub servo_max_pulse: u16,
}

impl Default for BoardConfig {
    fn default() -> BoardConfig {
        BoardConfig {
            port: String::from("/dev/ttyACM0"),
            baud_rate: 57_600,
            timeout_ms: 100,
            startup_delay_ms: 2_000,
            verify_pins: true,
            servo_min_pulse: 544,
            servo_max_pulse: 2_400,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    pub channel: u8,
    pub pwm_min: u16,
    pub pwm_max: u16,
    /// Midpoint of `pwm_min` and `pwm_max` when left out.
    pub pwm_zero: Option<u16>,
    pub reversed: bool,
}

impl Default for ChannelConfig {
    fn default() -> ChannelConfig {
        ChannelConfig {
            channel: 6,
            pwm_min: 1_000,
            pwm_max: 2_000,
            pwm_zero: None,
            reversed: false,
        }
    }
}

impl ChannelConfig {
    pub fn profile(&self) -> Result<CalibrationProfile> {
        if self.channel > MAX_CHANNEL {
            bail!(ErrorKind::Config(format!(
                "channel {} is above the highest pin {}",
                self.channel, MAX_CHANNEL
            )));
        }
        if self.pwm_max > MAX_WIRE_VALUE {
            bail!(ErrorKind::Config(format!(
                "channel {}: pwm_max {} does not fit in 14 bits",
                self.channel, self.pwm_max
            )));
        }
        let zero = self
            .pwm_zero
            .unwrap_or_else(|| ((u32::from(self.pwm_min) + u32::from(self.pwm_max)) / 2) as u16);
        CalibrationProfile::new(self.channel, self.pwm_min, zero, self.pwm_max)
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct ThrottleConfig {
    pub channel: u8,
    pub pwm_min: u16,
    pub pwm_max: u16,
    pub pwm_zero: Option<u16>,
    pub reversed: bool,
    pub arm_esc: bool,
    pub arm_settle_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> ThrottleConfig {
        ThrottleConfig {
            channel: 5,
            pwm_min: 1_000,
            pwm_max: 2_000,
            pwm_zero: Some(1_500),
            reversed: false,
            arm_esc: true,
            arm_settle_ms: 1_000,
        }
    }
}

impl ThrottleConfig {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            channel: self.channel,
            pwm_min: self.pwm_min,
            pwm_max: self.pwm_max,
            pwm_zero: self.pwm_zero,
            reversed: self.reversed,
        }
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> LogLevel {
        LogLevel::Info
    }
}

impl From<LogLevel> for slog::Level {
    fn from(level: LogLevel) -> slog::Level {
        match level {
            LogLevel::Critical => slog::Level::Critical,
            LogLevel::Error => slog::Level::Error,
            LogLevel::Warning => slog::Level::Warning,
            LogLevel::Info => slog::Level::Info,
            LogLevel::Debug => slog::Level::Debug,
            LogLevel::Trace => slog::Level::Trace,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Term,
    Json,
}

impl Default for LogFormat {
    fn default() -> LogFormat {
        LogFormat::Term
    }
}

/// Calibration for both channels, checked against each other.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub steering: CalibrationProfile,
    pub throttle: CalibrationProfile,
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Config> {
        let config: Config = toml::from_str(contents)
            .chain_err(|| ErrorKind::Config("failed to deserialize config".into()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.calibration()?;

        let hz = self.vehicle.loop_hz;
        if !hz.is_finite() || hz <= 0.0 {
            bail!(ErrorKind::Config(format!("loop_hz must be positive, got {}", hz)));
        }
        if ::std::time::Duration::try_from_secs_f64(1.0 / hz).is_err() {
            bail!(ErrorKind::Config(format!("loop_hz {} is too slow to schedule", hz)));
        }

        let js = &self.joystick;
        for &(name, scale) in &[("steering_scale", js.steering_scale), ("throttle_scale", js.throttle_scale)] {
            if !(0.0..=1.0).contains(&scale) {
                bail!(ErrorKind::Config(format!("{} must be within [0, 1], got {}", name, scale)));
            }
        }
        if js.throttle_dir != 1.0 && js.throttle_dir != -1.0 {
            bail!(ErrorKind::Config(format!(
                "throttle_dir must be 1.0 or -1.0, got {}",
                js.throttle_dir
            )));
        }
        if !(0.0..1.0).contains(&js.dead_zone) {
            bail!(ErrorKind::Config(format!("dead_zone must be within [0, 1), got {}", js.dead_zone)));
        }

        let board = &self.board;
        if board.baud_rate == 0 {
            bail!(ErrorKind::Config("baud_rate must be positive".into()));
        }
        if board.servo_min_pulse >= board.servo_max_pulse {
            bail!(ErrorKind::Config(format!(
                "servo_min_pulse {} must be below servo_max_pulse {}",
                board.servo_min_pulse, board.servo_max_pulse
            )));
        }
        Ok(())
    }

    pub fn calibration(&self) -> Result<Calibration> {
        let steering = self.steering.profile()?;
        let throttle = self.throttle.channel_config().profile()?;
        if steering.channel == throttle.channel {
            bail!(ErrorKind::Config(format!(
                "steering and throttle share channel {}",
                steering.channel
            )));
        }
        Ok(Calibration { steering, throttle })
    }

    pub fn loop_period(&self) -> ::std::time::Duration {
        ::std::time::Duration::from_secs_f64(1.0 / self.vehicle.loop_hz)
    }
}
