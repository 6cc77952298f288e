use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use slog::Logger;

use crate::calibration::PwmCommand;
use crate::config::Config;
use crate::control::steering::Steering;
use crate::control::throttle::{Throttle, ARM_STEP};
use crate::control::{Actuator, Control};
use crate::errors::*;
use crate::input::InputSource;

/// Operator request to end the run, checked between ticks.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> StopSignal {
        StopSignal::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Operator,
    LoopLimit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    /// Ticks that finished after the next one was due.
    pub overruns: u64,
    pub reason: StopReason,
}

/// The drive loop: input in, pulses out, at a fixed rate.
pub struct Vehicle<I: InputSource, A: Actuator> {
    input: I,
    actuator: A,
    controls: Vec<Box<dyn Control>>,
    period: Duration,
    max_loops: Option<u64>,
    stop: StopSignal,
    state: LoopState,
    log: Logger,
}

impl<I: InputSource, A: Actuator> Vehicle<I, A> {
    /// Opens the input, then the actuator, then readies both channels.
    ///
    /// Whatever was acquired is released again if a later step fails.
    pub fn initialize<FI, FA>(
        config: &Config,
        stop: StopSignal,
        log: &Logger,
        open_input: FI,
        open_actuator: FA,
    ) -> Result<Self>
    where
        FI: FnOnce() -> Result<I>,
        FA: FnOnce() -> Result<A>,
    {
        let log = log.new(o!("component" => "vehicle"));
        info!(log, "Vehicle state"; "state" => ?LoopState::Initializing);

        let calibration = config.calibration()?;
        let steering = Steering::new(calibration.steering, config.steering.reversed);
        let throttle = Throttle::new(calibration.throttle, config.throttle.reversed);

        let input = open_input()?;
        let mut actuator = open_actuator()?;
        actuator.attach(steering.profile())?;
        actuator.attach(throttle.profile())?;

        if config.throttle.arm_esc {
            info!(log, "Arming ESC"; "channel" => throttle.profile().channel);
            let settle = Duration::from_millis(config.throttle.arm_settle_ms);
            let [high, low, rest] = throttle.arming_sequence();
            actuator.send(high)?;
            thread::sleep(ARM_STEP);
            actuator.send(low)?;
            thread::sleep(ARM_STEP);
            actuator.send(rest)?;
            thread::sleep(settle);
        }
        actuator.send(steering.neutral())?;

        let controls: Vec<Box<dyn Control>> = vec![Box::new(steering), Box::new(throttle)];
        let max_loops = match config.vehicle.max_loops {
            0 => None,
            n => Some(n),
        };
        Ok(Vehicle {
            input,
            actuator,
            controls,
            period: config.loop_period(),
            max_loops,
            stop,
            state: LoopState::Initializing,
            log,
        })
    }

    /// Drives until stopped or faulted, then parks every channel at neutral.
    ///
    /// The input and the actuator are closed when this returns, whichever way
    /// it ends.
    pub fn run(mut self) -> Result<RunSummary> {
        self.enter(LoopState::Running);
        let outcome = self.drive();

        if let Err(ref e) = outcome {
            crit!(self.log, "Stopping vehicle"; "error" => %e, "fault" => e.is_fault());
        }
        self.enter(LoopState::ShuttingDown);
        self.command_neutral();
        self.enter(LoopState::Stopped);

        if let Ok(ref summary) = outcome {
            info!(self.log, "Run finished";
                  "ticks" => summary.ticks,
                  "overruns" => summary.overruns,
                  "reason" => ?summary.reason);
        }
        outcome
    }

    fn enter(&mut self, state: LoopState) {
        debug!(self.log, "Vehicle state"; "from" => ?self.state, "to" => ?state);
        self.state = state;
    }

    fn drive(&mut self) -> Result<RunSummary> {
        let mut commands = Vec::with_capacity(self.controls.len());
        let mut ticks = 0;
        let mut overruns = 0;
        let mut deadline = Instant::now();

        loop {
            let reason = if self.stop.is_requested() || self.input.stop_requested() {
                Some(StopReason::Operator)
            } else if self.max_loops.map_or(false, |limit| ticks >= limit) {
                Some(StopReason::LoopLimit)
            } else {
                None
            };
            if let Some(reason) = reason {
                return Ok(RunSummary {
                    ticks,
                    overruns,
                    reason,
                });
            }

            self.tick(&mut commands)?;
            ticks += 1;

            // A late tick re-anchors the schedule instead of bursting to catch up.
            deadline += self.period;
            let now = Instant::now();
            if now < deadline {
                thread::sleep(deadline - now);
            } else {
                overruns += 1;
                debug!(self.log, "Tick overran";
                       "tick" => ticks,
                       "late_us" => (now - deadline).as_micros() as u64);
                deadline = now;
            }
        }
    }

    fn tick(&mut self, commands: &mut Vec<PwmCommand>) -> Result<()> {
        let reading = self.input.poll()?;
        commands.clear();
        for control in self.controls.iter_mut() {
            control.update(&reading);
            control.write_commands(commands);
        }
        trace!(self.log, "Tick";
               "input_age_us" => reading.timestamp.elapsed().as_micros() as u64,
               "steering" => reading.steering,
               "throttle" => reading.throttle,
               "commands" => ?commands);
        for command in commands.iter() {
            self.actuator.send(*command)?;
        }
        Ok(())
    }

    // Best effort: a channel that can't be reached is skipped.
    fn command_neutral(&mut self) {
        for control in self.controls.iter() {
            let neutral = control.neutral();
            if let Err(e) = self.actuator.send(neutral) {
                warn!(self.log, "Couldn't park channel"; "channel" => neutral.channel, "error" => %e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{LinkFault, RecordingBoard, ScriptedInput};
    use pretty_assertions::assert_eq;
    use slog::Discard;
    use std::cell::Cell;

    const STEERING: u8 = 6;
    const THROTTLE: u8 = 5;

    fn logger() -> Logger {
        Logger::root(Discard, o!())
    }

    fn config(loop_hz: f64, max_loops: u64) -> Config {
        let mut config = Config::default();
        config.vehicle.loop_hz = loop_hz;
        config.vehicle.max_loops = max_loops;
        config.throttle.arm_esc = false;
        config
    }

    fn vehicle(
        config: &Config,
        input: ScriptedInput,
        board: RecordingBoard,
    ) -> Vehicle<ScriptedInput, RecordingBoard> {
        Vehicle::initialize(config, StopSignal::new(), &logger(), || Ok(input), || Ok(board)).unwrap()
    }

    fn neutral() -> Vec<PwmCommand> {
        vec![
            PwmCommand { channel: STEERING, pulse_width: 1500 },
            PwmCommand { channel: THROTTLE, pulse_width: 1500 },
        ]
    }

    #[test]
    fn initialize_attaches_and_centers() {
        let board = RecordingBoard::new();
        let record = board.record.clone();
        vehicle(&config(100.0, 0), ScriptedInput::new(0.0, 0.0), board);

        assert_eq!(record.borrow().attached, vec![STEERING, THROTTLE]);
        assert_eq!(record.borrow().sent, vec![PwmCommand { channel: STEERING, pulse_width: 1500 }]);
    }

    #[test]
    fn initialize_arms_esc() {
        let mut config = config(100.0, 0);
        config.throttle.arm_esc = true;
        config.throttle.arm_settle_ms = 0;
        let board = RecordingBoard::new();
        let record = board.record.clone();
        vehicle(&config, ScriptedInput::new(0.0, 0.0), board);

        let pulses: Vec<(u8, u16)> = record
            .borrow()
            .sent
            .iter()
            .map(|c| (c.channel, c.pulse_width))
            .collect();
        assert_eq!(
            pulses,
            vec![(THROTTLE, 2000), (THROTTLE, 1000), (THROTTLE, 1500), (STEERING, 1500)]
        );
    }

    #[test]
    fn bad_calibration_aborts_before_opening_devices() {
        let mut config = config(100.0, 0);
        config.throttle.pwm_zero = Some(2500);
        let opened = Cell::new(false);
        let result: Result<Vehicle<ScriptedInput, RecordingBoard>> = Vehicle::initialize(
            &config,
            StopSignal::new(),
            &logger(),
            || {
                opened.set(true);
                Ok(ScriptedInput::new(0.0, 0.0))
            },
            || Ok(RecordingBoard::new()),
        );
        match result {
            Err(Error(ErrorKind::Config(_), _)) => {}
            other => panic!("expected a config error, got ok = {}", other.is_ok()),
        }
        assert!(!opened.get());
    }

    #[test]
    fn missing_gamepad_aborts_before_opening_board() {
        let opened = Cell::new(false);
        let result: Result<Vehicle<ScriptedInput, RecordingBoard>> = Vehicle::initialize(
            &config(100.0, 0),
            StopSignal::new(),
            &logger(),
            || bail!(ErrorKind::DeviceUnavailable("no gamepad connected".into())),
            || {
                opened.set(true);
                Ok(RecordingBoard::new())
            },
        );
        assert!(result.is_err());
        assert!(!opened.get());
    }

    #[test]
    fn broken_link_during_setup_aborts() {
        let mut board = RecordingBoard::new();
        board.fault = Some(LinkFault::From(0));
        let record = board.record.clone();
        let input = ScriptedInput::new(0.0, 0.0);
        let input_closed = input.closed.clone();
        let result = Vehicle::initialize(
            &config(100.0, 0),
            StopSignal::new(),
            &logger(),
            || Ok(input),
            || Ok(board),
        );
        match result {
            Err(ref e) if e.is_fault() => {}
            other => panic!("expected a link error, got ok = {}", other.is_ok()),
        }
        assert!(input_closed.get());
        assert!(record.borrow().closed);
    }

    #[test]
    fn runs_until_loop_limit() {
        let board = RecordingBoard::new();
        let record = board.record.clone();
        let summary = vehicle(&config(500.0, 5), ScriptedInput::new(-1.0, 0.5), board)
            .run()
            .unwrap();

        assert_eq!(summary.ticks, 5);
        assert_eq!(summary.reason, StopReason::LoopLimit);

        let record = record.borrow();
        // centering + two commands per tick + parking
        assert_eq!(record.sent.len(), 1 + 5 * 2 + 2);
        assert_eq!(
            &record.sent[1..3],
            &[
                PwmCommand { channel: STEERING, pulse_width: 1000 },
                PwmCommand { channel: THROTTLE, pulse_width: 1750 },
            ]
        );
        assert_eq!(record.sent[11..].to_vec(), neutral());
        assert_eq!(record.pulses[&STEERING], 1500);
        assert_eq!(record.pulses[&THROTTLE], 1500);
    }

    #[test]
    fn reversed_channels_flip_in_loop() {
        let mut config = config(500.0, 1);
        config.steering.reversed = true;
        config.throttle.reversed = true;
        let board = RecordingBoard::new();
        let record = board.record.clone();
        vehicle(&config, ScriptedInput::new(-1.0, 0.5), board).run().unwrap();

        assert_eq!(
            &record.borrow().sent[1..3],
            &[
                PwmCommand { channel: STEERING, pulse_width: 2000 },
                PwmCommand { channel: THROTTLE, pulse_width: 1250 },
            ]
        );
    }

    #[test]
    fn operator_stop_from_input() {
        let mut input = ScriptedInput::new(0.2, 0.2);
        input.stop_after = Some(3);
        let board = RecordingBoard::new();
        let record = board.record.clone();
        let summary = vehicle(&config(500.0, 0), input, board).run().unwrap();

        assert_eq!(summary.reason, StopReason::Operator);
        assert_eq!(summary.ticks, 3);
        let record = record.borrow();
        assert_eq!(record.sent[record.sent.len() - 2..].to_vec(), neutral());
    }

    #[test]
    fn stop_signal_before_first_tick() {
        let stop = StopSignal::new();
        stop.request();
        let board = RecordingBoard::new();
        let record = board.record.clone();
        let v = Vehicle::initialize(
            &config(500.0, 0),
            stop,
            &logger(),
            || Ok(ScriptedInput::new(1.0, 1.0)),
            || Ok(board),
        )
        .unwrap();
        let summary = v.run().unwrap();

        assert_eq!(summary.ticks, 0);
        assert_eq!(summary.reason, StopReason::Operator);
        assert_eq!(record.borrow().sent.len(), 1 + 2);
    }

    #[test]
    fn lost_gamepad_parks_and_fails() {
        let mut input = ScriptedInput::new(0.0, 1.0);
        input.disconnect_after = Some(2);
        let board = RecordingBoard::new();
        let record = board.record.clone();
        let result = vehicle(&config(500.0, 0), input, board).run();

        match result {
            Err(Error(ErrorKind::DeviceUnavailable(_), _)) => {}
            other => panic!("expected the device to be unavailable, got {:?}", other.is_ok()),
        }
        let record = record.borrow();
        assert_eq!(record.sent.len(), 1 + 2 * 2 + 2);
        assert_eq!(record.sent[record.sent.len() - 2..].to_vec(), neutral());
    }

    #[test]
    fn link_error_mid_tick_parks_next() {
        let mut board = RecordingBoard::new();
        // centering, tick 1 (two sends), then steering of tick 2 fails
        board.fault = Some(LinkFault::Once(3));
        let record = board.record.clone();
        let input = ScriptedInput::new(0.8, 1.0);
        let input_closed = input.closed.clone();
        let result = vehicle(&config(500.0, 0), input, board).run();

        assert!(input_closed.get());
        assert!(record.borrow().closed);
        match result {
            Err(Error(ErrorKind::Link(_), _)) => {}
            other => panic!("expected a link error, got {:?}", other.is_ok()),
        }
        let record = record.borrow();
        assert_eq!(record.attempts, 1 + 2 + 1 + 2);
        assert_eq!(record.sent[3..].to_vec(), neutral());
        assert_eq!(record.pulses[&THROTTLE], 1500);
    }

    #[test]
    fn dead_link_still_reports_first_fault() {
        let mut board = RecordingBoard::new();
        board.fault = Some(LinkFault::From(2));
        let record = board.record.clone();
        let result = vehicle(&config(500.0, 0), ScriptedInput::new(0.0, 0.4), board).run();

        let err = result.err().expect("run should fail");
        assert!(err.to_string().contains("send 2"), "{}", err);
        // both parking attempts were made even though the link stayed down
        assert_eq!(record.borrow().attempts, 1 + 2 + 2);
    }

    #[test]
    fn holds_configured_rate() {
        let stop = StopSignal::new();
        let board = RecordingBoard::new();
        let v = Vehicle::initialize(
            &config(20.0, 0),
            stop.clone(),
            &logger(),
            || Ok(ScriptedInput::new(0.0, 0.0)),
            || Ok(board),
        )
        .unwrap();

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_secs(1));
            stop.request();
        });
        let started = Instant::now();
        let summary = v.run().unwrap();
        stopper.join().unwrap();

        assert!(started.elapsed() >= Duration::from_millis(950));
        assert!(
            summary.ticks >= 17 && summary.ticks <= 23,
            "expected about 20 ticks, got {}",
            summary.ticks
        );
    }
}
