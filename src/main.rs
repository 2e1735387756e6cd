use std::process::ExitCode;

use clap::Parser;
use restore_studio::cli::{self, CliArgs};

fn main() -> ExitCode {
    restore_studio::init_logger();
    cli::run(CliArgs::parse())
}
