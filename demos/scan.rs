//! CLI utility to discover Matter devices on the local network using mDNS.

use std::time::Duration;

use clap::Parser;
use matter_mdns_scanner::{CommissionablePredicate, ScannerConfig};

#[derive(Parser, Debug)]
struct Cli {
    /// Restrict discovery to a single network interface.
    #[arg(long)]
    interface: Option<String>,

    /// Only show devices matching this long discriminator.
    #[arg(long)]
    discriminator: Option<u16>,

    /// Seconds to scan before printing results.
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Keep scanning and print devices as they appear.
    #[arg(long, default_value_t = false)]
    continuous: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = ScannerConfig {
        net_interface: cli.interface,
        ..ScannerConfig::default()
    };
    let scanner = matter_mdns_scanner::Scanner::new(config).await?;

    let predicate = match cli.discriminator {
        Some(d) => CommissionablePredicate::LongDiscriminator(d),
        None => CommissionablePredicate::Any,
    };

    if cli.continuous {
        scanner
            .find_commissionable_devices_continuously(
                predicate,
                |device| println!("{device:#?}"),
                Some(Duration::from_secs(cli.timeout)),
                None,
            )
            .await?;
    } else {
        let devices = scanner
            .find_commissionable_devices(predicate, Some(Duration::from_secs(cli.timeout)), false)
            .await?;
        println!("found {} commissionable device(s)", devices.len());
        for device in devices {
            println!("{device:#?}");
        }
    }

    scanner.close().await;
    Ok(())
}
