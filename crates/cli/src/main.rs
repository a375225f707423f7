use std::process::ExitCode;

fn main() -> ExitCode {
    tallyflow_cli::run()
}
