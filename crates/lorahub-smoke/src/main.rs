//! lorahub-smoke
//!
//! Usage: lorahub-smoke --ip-address <ip> [--lns-addr ...]

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use lorahub_build::logging;
use lorahub_smoke::{DeviceConfig, SmokeClient, StepResponse, WaitPolicy};

#[derive(Parser)]
#[command(name = "lorahub-smoke")]
#[command(about = "Configure, reboot and read back a LoRaHub over its REST API", version)]
struct Cli {
    /// IP address of the LoRaHub
    #[arg(long)]
    ip_address: String,

    #[arg(long, default_value = "eu1.cloud.thethings.network")]
    lns_addr: String,

    #[arg(long, default_value_t = 1700)]
    lns_port: u16,

    /// Channel frequency in MHz
    #[arg(long, default_value_t = 868.1)]
    chan_freq: f64,

    #[arg(long, default_value_t = 7)]
    chan_dr: u8,

    /// Channel bandwidth in kHz
    #[arg(long, default_value_t = 125)]
    chan_bw: u32,

    #[arg(long, default_value = "pool.ntp.org")]
    sntp_addr: String,

    /// Seconds to wait after the reboot request before polling
    #[arg(long, default_value_t = 10)]
    settle_secs: u64,

    /// Seconds between polls
    #[arg(long, default_value_t = 2)]
    poll_secs: u64,

    /// Give up polling after this many seconds
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    request_timeout_secs: u64,

    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            lns_addr: self.lns_addr.clone(),
            lns_port: self.lns_port,
            chan_freq: self.chan_freq,
            chan_dr: self.chan_dr,
            chan_bw: self.chan_bw,
            sntp_addr: self.sntp_addr.clone(),
        }
    }

    fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            settle: Duration::from_secs(self.settle_secs),
            interval: Duration::from_secs(self.poll_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

fn print_step(number: &mut usize, response: &StepResponse) {
    println!("\nStep {}: {} -> HTTP {}", number, response.step, response.status);
    println!("{}", response.pretty_body());
    *number += 1;
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(false, logging::level_for(cli.verbose));

    let client = match SmokeClient::for_device(&cli.ip_address, Duration::from_secs(cli.request_timeout_secs)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: cannot create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut number = 1;
    match client.run(&cli.device_config(), &cli.wait_policy(), |r| print_step(&mut number, r)) {
        Ok(report) => {
            println!(
                "\nSmoke test passed ({}s until the device answered after reboot)",
                report.waited.as_secs()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
