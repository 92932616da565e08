use std::process::ExitCode;

use clap::Parser;

use paintstack::cli::{self, CliArgs};
use paintstack::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    match &args.log_file {
        Some(path) => logger::init_at(path.clone()),
        None => logger::init(),
    }

    cli::run(args)
}
