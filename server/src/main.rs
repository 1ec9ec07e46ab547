use clap::Parser;
use log::info;
use server::network::{Server, ServerOptions};
use server::pipeline::PipelineConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Secret that grants the DM role on authenticate
    #[arg(long, env = "TABLETOP_DM_SECRET")]
    dm_secret: Option<String>,

    /// Session snapshot to load on startup and save into while running
    #[arg(short, long)]
    session: Option<PathBuf>,

    /// Maximum concurrent client connections
    #[arg(long, default_value = "32")]
    max_clients: usize,

    /// Messages a client may burst before the rate limiter pushes back
    #[arg(long, default_value = "60")]
    rate_burst: u32,

    /// Milliseconds to refill one rate-limiter token
    #[arg(long, default_value = "50")]
    rate_refill_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let options = ServerOptions {
        max_clients: args.max_clients,
        session_path: args.session,
        pipeline: PipelineConfig {
            dm_secret: args.dm_secret,
            rate_limit_burst: args.rate_burst,
            rate_limit_refill: Duration::from_millis(args.rate_refill_ms),
            ..PipelineConfig::default()
        },
        ..ServerOptions::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, options).await?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
