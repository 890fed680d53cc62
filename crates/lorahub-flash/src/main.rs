//! lorahub-flash
//!
//! Usage: lorahub-flash <prefix> <port>

use std::process::ExitCode;

use clap::Parser;
use lorahub_build::logging;
use lorahub_flash::{FlashPlan, DEFAULT_BAUD};

#[derive(Parser)]
#[command(name = "lorahub-flash")]
#[command(about = "Flash <prefix>_{bootloader,lorahub,partition-table}.bin onto an ESP32-S3", version)]
struct Cli {
    /// File prefix, usually the variant name inside the export directory
    prefix: String,

    /// Serial port the board is connected to
    port: String,

    #[arg(long, short = 'b', default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// esptool executable
    #[arg(long, default_value = lorahub_flash::DEFAULT_PROGRAM)]
    esptool: String,

    /// Print the command without running it
    #[arg(long)]
    dry_run: bool,

    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(false, logging::level_for(cli.verbose));

    let plan = FlashPlan::for_prefix(&cli.prefix, cli.port)
        .with_baud(cli.baud)
        .with_program(cli.esptool);

    println!("Files to be flashed:");
    for image in plan.images() {
        println!("  {}: {}", image.slot.label, image.path.display());
    }

    if let Err(e) = plan.verify() {
        eprintln!("Error: {}", e);
        return ExitCode::from(e.exit_code() as u8);
    }

    println!("\n{}", plan.command_line());
    if cli.dry_run {
        return ExitCode::SUCCESS;
    }

    match plan.execute() {
        Ok(()) => {
            println!("Flashing completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code().clamp(1, 255) as u8)
        }
    }
}
