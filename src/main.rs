mod emulator;
mod instruction;
mod scheduler;
mod state;

use std::path::PathBuf;

use clap::Parser;

/// A CHIP-8 emulator with a terminal front end.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to a CHIP-8 ROM file
    rom: PathBuf,
}

/// The TUI owns the terminal while raw mode is active, so logs go to a
/// file instead of stderr. Logging stays off unless RUST_LOG is set.
fn init_logging() -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        return Ok(());
    }
    let log_file = std::fs::File::create("chip8vm.log")?;
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_logging()?;
    let args = Args::parse();

    let mut emulator = emulator::Emulator::new(args.rom);
    emulator.run()
}
