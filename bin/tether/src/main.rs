#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let config = std::env::args_os().nth(1).map(PathBuf::from);
    let status = tether_core::run(config);
    ExitCode::from(u8::try_from(status).unwrap_or(1))
}
