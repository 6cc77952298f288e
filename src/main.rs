
#![recursion_limit = "1024"]

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate fomat_macros;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate slog;

mod calibration;
mod config;
mod control;
mod errors;
mod firmata;
mod input;
mod joystick;
#[cfg(test)]
mod mock;
mod util;
mod vehicle;

use errors::*;
use firmata::Board;
use joystick::Joystick;
use vehicle::{StopSignal, Vehicle};

const DEFAULT_CONFIG_PATH: &str = "rc-drive.toml";

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| String::from(DEFAULT_CONFIG_PATH));

    if let Err(e) = run(&config_path) {
        epintln!((util::get_error_trace(&e)));
        std::process::exit(1);
    }
}

fn run(config_path: &str) -> Result<()> {
    let config = util::load_config_from_file(config_path)?;
    let (log, _async_guard) = util::build_logger(&config.logging);

    // gilrs and serialport log through the `log` crate.
    let _scope_guard = slog_scope::set_global_logger(log.clone());
    slog_stdlog::init().chain_err(|| "Failed to route library logs")?;

    pintln!("Driving with "(config_path)", board on "(config.board.port)". Ctrl-C stops the car.");

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.request()).chain_err(|| "Failed to install Ctrl-C handler")?;
    }

    let vehicle = Vehicle::initialize(
        &config,
        stop,
        &log,
        || Joystick::open(&config.joystick, &log),
        || Board::open(&config.board, &log),
    )?;
    let summary = vehicle.run()?;

    pintln!("Stopped after "(summary.ticks)" ticks ("(summary.overruns)" late).");
    Ok(())
}
