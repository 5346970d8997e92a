#![deny(unsafe_code)]

use std::process::ExitCode;

fn main() -> ExitCode {
    let status = agent::run(std::env::args_os());
    ExitCode::from(u8::try_from(status).unwrap_or(2))
}
