use anyhow::Result;
use clap::Parser;

use workpipe::Cli;

// No #[tokio::main]: every worker builds its own single-threaded runtime.
fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run()
}
