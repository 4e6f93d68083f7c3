use std::process::ExitCode;

use kindle::SharedWriter;

fn main() -> ExitCode {
    kindle::launcher::start(
        std::env::args().collect(),
        SharedWriter::stdout(),
        SharedWriter::stderr(),
    )
}
