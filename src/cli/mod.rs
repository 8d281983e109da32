//! Command-line interface definitions and helpers.
//!
//! This module contains all CLI argument parsing and subcommand handlers.

mod args;
mod commands;
mod parse;

pub use args::{Args, Command, ConfigAction, WatchArgs};
pub use commands::{
    apply_watch_args, describe_settings, handle_config_action, list_devices, run_watch,
    write_default_config,
};
pub use parse::{parse_duration, parse_framerate, parse_pre_roll, parse_resolution};
