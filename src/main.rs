//! motion-recorder: motion-triggered CCTV recorder.

use clap::Parser;

use motion_recorder::cli::{self, Args, Command};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let result = match args.command {
        Command::Watch(watch) => cli::run_watch(watch),
        Command::ListDevices { format } => cli::list_devices(format),
        Command::Config { action } => cli::handle_config_action(action),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
