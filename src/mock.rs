
//! Stand-ins for the gamepad and the board that record what the loop does.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::calibration::{CalibrationProfile, PwmCommand};
use crate::control::Actuator;
use crate::errors::*;
use crate::input::{AxisReading, InputSource};

/// Replays a fixed demand, optionally losing the device or asking to stop.
pub struct ScriptedInput {
    pub steering: f32,
    pub throttle: f32,
    /// Fail every poll after this many succeeded.
    pub disconnect_after: Option<usize>,
    /// Raise the stop latch after this many polls.
    pub stop_after: Option<usize>,
    pub polls: Rc<Cell<usize>>,
    /// Set once the input has been dropped.
    pub closed: Rc<Cell<bool>>,
}

impl ScriptedInput {
    pub fn new(steering: f32, throttle: f32) -> ScriptedInput {
        ScriptedInput {
            steering,
            throttle,
            disconnect_after: None,
            stop_after: None,
            polls: Rc::new(Cell::new(0)),
            closed: Rc::new(Cell::new(false)),
        }
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self) -> Result<AxisReading> {
        if let Some(limit) = self.disconnect_after {
            if self.polls.get() >= limit {
                bail!(ErrorKind::DeviceUnavailable("scripted disconnect".into()));
            }
        }
        self.polls.set(self.polls.get() + 1);
        Ok(AxisReading::new(self.steering, self.throttle))
    }

    fn stop_requested(&self) -> bool {
        self.stop_after.map_or(false, |limit| self.polls.get() >= limit)
    }
}

impl Drop for ScriptedInput {
    fn drop(&mut self) {
        self.closed.set(true);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkFault {
    /// The send with this index fails, later ones succeed.
    Once(usize),
    /// Every send from this index on fails.
    From(usize),
}

#[derive(Default)]
pub struct BoardRecord {
    pub attached: Vec<u8>,
    /// Every command that reached the board, in order.
    pub sent: Vec<PwmCommand>,
    /// Last pulse per channel, as the servos would see it.
    pub pulses: HashMap<u8, u16>,
    pub attempts: usize,
    pub closed: bool,
}

/// A board that remembers the commands it was sent.
pub struct RecordingBoard {
    pub fault: Option<LinkFault>,
    pub record: Rc<RefCell<BoardRecord>>,
}

impl RecordingBoard {
    pub fn new() -> RecordingBoard {
        RecordingBoard {
            fault: None,
            record: Rc::new(RefCell::new(BoardRecord::default())),
        }
    }
}

impl Actuator for RecordingBoard {
    fn attach(&mut self, profile: &CalibrationProfile) -> Result<()> {
        self.record.borrow_mut().attached.push(profile.channel);
        Ok(())
    }

    fn send(&mut self, command: PwmCommand) -> Result<()> {
        let mut record = self.record.borrow_mut();
        let attempt = record.attempts;
        record.attempts += 1;
        let failed = match self.fault {
            Some(LinkFault::Once(index)) => attempt == index,
            Some(LinkFault::From(index)) => attempt >= index,
            None => false,
        };
        if failed {
            bail!(ErrorKind::Link(format!("scripted fault on send {}", attempt)));
        }
        record.sent.push(command);
        record.pulses.insert(command.channel, command.pulse_width);
        Ok(())
    }
}

impl Drop for RecordingBoard {
    fn drop(&mut self) {
        self.record.borrow_mut().closed = true;
    }
}
