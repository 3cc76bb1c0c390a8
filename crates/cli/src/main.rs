use std::process::ExitCode;

fn main() -> ExitCode {
    bitquote_cli::run()
}
