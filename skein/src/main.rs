use std::process::ExitCode;

use clap::Parser;
use skein::cli::{Cli, CliError, exit_code};

fn main() -> ExitCode {
    let result = Cli::parse().run();
    let code = exit_code(&result);
    if let Err(err) = result {
        match err {
            // trace diagnostics render with source spans
            CliError::Trace(trace) => eprintln!("{:?}", miette::Report::new(trace)),
            other => eprintln!("error: {other}"),
        }
    }
    ExitCode::from(code)
}
