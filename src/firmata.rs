
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use serialport::{DataBits, Parity, SerialPort, StopBits};
use slog::Logger;

use crate::calibration::{CalibrationProfile, PwmCommand};
use crate::config::BoardConfig;
use crate::control::Actuator;
use crate::errors::*;

const DIGITAL_MESSAGE: u8 = 0x90;
const ANALOG_MESSAGE: u8 = 0xE0;
const REPORT_VERSION: u8 = 0xF9;
const SET_PIN_MODE: u8 = 0xF4;
const START_SYSEX: u8 = 0xF0;
const END_SYSEX: u8 = 0xF7;

const EXTENDED_ANALOG: u8 = 0x6F;
const CAPABILITY_QUERY: u8 = 0x6B;
const CAPABILITY_RESPONSE: u8 = 0x6C;
const SERVO_CONFIG: u8 = 0x70;
const REPORT_FIRMWARE: u8 = 0x79;

pub const PIN_MODE_SERVO: u8 = 0x04;
const CAPABILITY_PIN_END: u8 = 0x7F;

/// Analog messages only address the first sixteen pins.
const ANALOG_MESSAGE_PINS: u8 = 16;
/// Longest sysex frame kept while waiting for its end byte.
const MAX_SYSEX_LEN: usize = 4096;
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FirmataCommand {
    SetPinMode { pin: u8, mode: u8 },
    ServoConfig { pin: u8, min_pulse: u16, max_pulse: u16 },
    AnalogWrite { pin: u8, value: u16 },
    CapabilityQuery,
}

fn lsb(value: u16) -> u8 {
    (value & 0x7F) as u8
}

fn msb(value: u16) -> u8 {
    ((value >> 7) & 0x7F) as u8
}

impl FirmataCommand {
    pub fn to_byte_slice(&self) -> Vec<u8> {
        match *self {
            FirmataCommand::SetPinMode { pin, mode } => vec![SET_PIN_MODE, pin, mode],
            FirmataCommand::ServoConfig { pin, min_pulse, max_pulse } => vec![
                START_SYSEX,
                SERVO_CONFIG,
                pin,
                lsb(min_pulse),
                msb(min_pulse),
                lsb(max_pulse),
                msb(max_pulse),
                END_SYSEX,
            ],
            FirmataCommand::AnalogWrite { pin, value } if pin < ANALOG_MESSAGE_PINS => {
                vec![ANALOG_MESSAGE | pin, lsb(value), msb(value)]
            }
            FirmataCommand::AnalogWrite { pin, value } => {
                vec![START_SYSEX, EXTENDED_ANALOG, pin, lsb(value), msb(value), END_SYSEX]
            }
            FirmataCommand::CapabilityQuery => vec![START_SYSEX, CAPABILITY_QUERY, END_SYSEX],
        }
    }
}

/// Modes a pin supports, as `(mode, resolution)` pairs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinCapabilities {
    pub pin: u8,
    pub modes: Vec<(u8, u8)>,
}

impl PinCapabilities {
    pub fn supports(&self, mode: u8) -> bool {
        self.modes.iter().any(|&(m, _)| m == mode)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FirmataResponse {
    ProtocolVersion { major: u8, minor: u8 },
    Firmware { major: u8, minor: u8, name: String },
    Capabilities(Vec<PinCapabilities>),
    Analog { channel: u8, value: u16 },
    Digital { port: u8, value: u16 },
    Sysex { command: u8, data: Vec<u8> },
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseStatus {
    Ok(FirmataResponse, usize), // bytes read
    TooShort,
    Invalid,
}

fn u14_from_bytes(low: u8, high: u8) -> u16 {
    u16::from(low) | (u16::from(high) << 7)
}

impl FirmataResponse {
    pub fn parse(buffer: &VecDeque<u8>) -> ParseStatus {
        let command = match buffer.front() {
            Some(&byte) => byte,
            None => return ParseStatus::TooShort,
        };

        if command == START_SYSEX {
            return Self::parse_sysex(buffer);
        }

        let is_three_byte = command == REPORT_VERSION
            || command & 0xF0 == ANALOG_MESSAGE
            || command & 0xF0 == DIGITAL_MESSAGE;
        if !is_three_byte {
            return ParseStatus::Invalid;
        }
        if buffer.len() < 3 {
            return ParseStatus::TooShort;
        }
        let (first, second) = (buffer[1], buffer[2]);
        if first & 0x80 != 0 || second & 0x80 != 0 {
            return ParseStatus::Invalid;
        }

        let response = match command & 0xF0 {
            _ if command == REPORT_VERSION => FirmataResponse::ProtocolVersion {
                major: first,
                minor: second,
            },
            ANALOG_MESSAGE => FirmataResponse::Analog {
                channel: command & 0x0F,
                value: u14_from_bytes(first, second),
            },
            _ => FirmataResponse::Digital {
                port: command & 0x0F,
                value: u14_from_bytes(first, second),
            },
        };
        ParseStatus::Ok(response, 3)
    }

    fn parse_sysex(buffer: &VecDeque<u8>) -> ParseStatus {
        let end = match buffer.iter().position(|&b| b == END_SYSEX) {
            Some(end) => end,
            None if buffer.len() > MAX_SYSEX_LEN => return ParseStatus::Invalid,
            None => return ParseStatus::TooShort,
        };
        if end < 2 {
            // An empty frame carries no command.
            return ParseStatus::Invalid;
        }
        let body: Vec<u8> = buffer.iter().skip(1).take(end - 1).cloned().collect();
        if body.iter().any(|&b| b & 0x80 != 0) {
            return ParseStatus::Invalid;
        }

        let command = body[0];
        let data = &body[1..];
        let response = match command {
            REPORT_FIRMWARE if data.len() >= 2 => FirmataResponse::Firmware {
                major: data[0],
                minor: data[1],
                name: data[2..]
                    .chunks(2)
                    .filter(|pair| pair.len() == 2)
                    .map(|pair| char::from(pair[0] | (pair[1] << 7)))
                    .collect(),
            },
            CAPABILITY_RESPONSE => FirmataResponse::Capabilities(Self::parse_capabilities(data)),
            _ => FirmataResponse::Sysex {
                command,
                data: data.to_vec(),
            },
        };
        ParseStatus::Ok(response, end + 1)
    }

    fn parse_capabilities(data: &[u8]) -> Vec<PinCapabilities> {
        let mut pins = vec![];
        let mut modes = vec![];
        let mut bytes = data.iter();
        while let Some(&byte) = bytes.next() {
            if byte == CAPABILITY_PIN_END {
                pins.push(PinCapabilities {
                    pin: pins.len() as u8,
                    modes: ::std::mem::replace(&mut modes, vec![]),
                });
                continue;
            }
            let resolution = bytes.next().cloned().unwrap_or(0);
            modes.push((byte, resolution));
        }
        pins
    }
}

/// A StandardFirmata board on the other end of a byte stream.
pub struct Board<P: Read + Write> {
    port: P,
    buffer: VecDeque<u8>,
    pins: Option<Vec<PinCapabilities>>,
    servo_pulse: (u16, u16),
    log: Logger,
}

impl Board<Box<dyn SerialPort>> {
    pub fn open(config: &BoardConfig, log: &Logger) -> Result<Self> {
        let log = log.new(o!("component" => "board", "port" => config.port.clone()));
        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(config.timeout_ms))
            .open()
            .chain_err(|| ErrorKind::Link(format!("couldn't open {}", config.port)))?;
        info!(log, "Opened serial port"; "baud_rate" => config.baud_rate);

        // Opening the port resets most boards.
        thread::sleep(Duration::from_millis(config.startup_delay_ms));

        let mut board = Board::new(port, config, log);
        if config.verify_pins {
            board.enumerate_pins()?;
        }
        Ok(board)
    }
}

impl<P: Read + Write> Board<P> {
    pub fn new(port: P, config: &BoardConfig, log: Logger) -> Self {
        Board {
            port,
            buffer: VecDeque::new(),
            pins: None,
            servo_pulse: (config.servo_min_pulse, config.servo_max_pulse),
            log,
        }
    }

    pub fn send_command(&mut self, command: &FirmataCommand) -> Result<()> {
        self.port
            .write_all(&command.to_byte_slice())
            .chain_err(|| ErrorKind::Link(format!("couldn't write {:?}", command)))?;
        self.port
            .flush()
            .chain_err(|| ErrorKind::Link("couldn't flush serial port".into()))?;
        Ok(())
    }

    /// Asks the board which pins it has and what each can do.
    pub fn enumerate_pins(&mut self) -> Result<&[PinCapabilities]> {
        self.send_command(&FirmataCommand::CapabilityQuery)?;
        let deadline = Instant::now() + REPLY_TIMEOUT;
        loop {
            match self.read_response(deadline)? {
                Some(FirmataResponse::Capabilities(pins)) => {
                    let servo_pins: Vec<u8> = pins
                        .iter()
                        .filter(|p| p.supports(PIN_MODE_SERVO))
                        .map(|p| p.pin)
                        .collect();
                    info!(self.log, "Board pins"; "count" => pins.len(), "servo" => ?servo_pins);
                    self.pins = Some(pins);
                    return Ok(self.pins.as_ref().map(|pins| pins.as_slice()).unwrap_or(&[]));
                }
                Some(FirmataResponse::ProtocolVersion { major, minor }) => {
                    info!(self.log, "Firmata protocol"; "version" => format!("{}.{}", major, minor));
                }
                Some(FirmataResponse::Firmware { major, minor, name }) => {
                    info!(self.log, "Firmware"; "name" => name, "version" => format!("{}.{}", major, minor));
                }
                Some(other) => trace!(self.log, "Ignored message"; "message" => ?other),
                None => bail!(ErrorKind::Link("board did not report its pins".into())),
            }
        }
    }

    /// Next complete message, or `None` once `deadline` passes or the stream ends.
    fn read_response(&mut self, deadline: Instant) -> Result<Option<FirmataResponse>> {
        loop {
            while !self.buffer.is_empty() {
                match FirmataResponse::parse(&self.buffer) {
                    ParseStatus::Ok(response, bytes_read) => {
                        self.buffer.drain(..bytes_read);
                        return Ok(Some(response));
                    }
                    ParseStatus::TooShort => break,
                    ParseStatus::Invalid => {
                        self.buffer.pop_front();
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let mut chunk = [0u8; 64];
            match self.port.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.buffer.extend(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    return Err(e).chain_err(|| ErrorKind::Link("couldn't read from board".into()));
                }
            }
        }
    }
}

impl<P: Read + Write> Actuator for Board<P> {
    fn attach(&mut self, profile: &CalibrationProfile) -> Result<()> {
        let pin = profile.channel;
        if let Some(ref pins) = self.pins {
            let servo_capable = pins
                .iter()
                .find(|p| p.pin == pin)
                .map_or(false, |p| p.supports(PIN_MODE_SERVO));
            if !servo_capable {
                bail!(ErrorKind::Config(format!("pin {} can't drive a servo", pin)));
            }
        }

        let (min_pulse, max_pulse) = self.servo_pulse;
        self.send_command(&FirmataCommand::ServoConfig {
            pin,
            min_pulse,
            max_pulse,
        })?;
        self.send_command(&FirmataCommand::SetPinMode {
            pin,
            mode: PIN_MODE_SERVO,
        })?;
        debug!(self.log, "Attached servo pin"; "pin" => pin);
        Ok(())
    }

    fn send(&mut self, command: PwmCommand) -> Result<()> {
        self.send_command(&FirmataCommand::AnalogWrite {
            pin: command.channel,
            value: command.pulse_width,
        })
    }
}

impl<P: Read + Write> Drop for Board<P> {
    fn drop(&mut self) {
        let _ = self.port.flush();
        debug!(self.log, "Closed board link");
    }
}
