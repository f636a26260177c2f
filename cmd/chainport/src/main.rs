mod cli;

use crate::cli::{CLI, emit_error_report, init_tracing};
use clap::Parser;

fn main() {
    let CLI { command } = CLI::parse();
    let json = command.json_output();
    init_tracing(json);

    if let Err(error) = command.run() {
        emit_error_report(json, &error);
        std::process::exit(1);
    }
}
