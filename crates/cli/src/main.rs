use std::process::ExitCode;

fn main() -> ExitCode {
    propwise_cli::run()
}
