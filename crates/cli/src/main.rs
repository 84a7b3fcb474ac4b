use std::process::ExitCode;

fn main() -> ExitCode {
    haulr_cli::run()
}
