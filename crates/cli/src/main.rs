use std::process::ExitCode;

fn main() -> ExitCode {
    cafe_cli::run()
}
