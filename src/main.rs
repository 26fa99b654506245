use std::process::ExitCode;

use clap::Parser;
use colorbook::cli::{self, CliArgs};

fn main() -> ExitCode {
    cli::run(CliArgs::parse())
}
