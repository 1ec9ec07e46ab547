use clap::Parser;
use log::info;
use std::time::Duration;
use uuid::Uuid;

use client::network::{Client, ClientOptions};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server origin to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Stable client uid; generated when omitted
    #[arg(short, long)]
    uid: Option<String>,

    /// Display name announced after authentication
    #[arg(short, long)]
    name: Option<String>,

    /// Secret that grants the DM role
    #[arg(long, env = "TABLETOP_DM_SECRET")]
    dm_secret: Option<String>,

    /// Base reconnect delay in milliseconds
    #[arg(long, default_value = "2000")]
    base_delay_ms: u64,

    /// Reconnect attempts before giving up (0 = retry forever)
    #[arg(long, default_value = "0")]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let uid = args.uid.unwrap_or_else(|| Uuid::new_v4().to_string());

    info!("Starting client as {}", uid);
    info!("Connecting to: {}", args.server);

    let mut options = ClientOptions::new(&args.server, &uid);
    options.dm_secret = args.dm_secret;
    options.display_name = args.name;
    options.base_delay = Duration::from_millis(args.base_delay_ms);
    options.max_reconnect_attempts = args.max_attempts;

    let mut client = Client::new(options);
    client.run().await?;

    Ok(())
}
