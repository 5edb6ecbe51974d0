use std::process::ExitCode;

fn main() -> ExitCode {
    match gangwayd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Telemetry may not be installed when startup fails this early,
            // so the cause also goes to stderr directly.
            eprintln!("gangwayd: {error}");
            ExitCode::FAILURE
        }
    }
}
