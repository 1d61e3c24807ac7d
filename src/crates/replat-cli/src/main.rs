use std::process::ExitCode;

fn main() -> ExitCode {
    replat_cli::run()
}
