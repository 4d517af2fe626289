use std::process::ExitCode;

use clap::Parser;
use labelfe::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Verbose runs log to the terminal; otherwise to the session log file
    if args.verbose {
        logger::init_stderr();
    } else {
        logger::init();
    }

    cli::run(args)
}
