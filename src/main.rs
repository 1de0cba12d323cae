use std::sync::Arc;

use clap::Parser;

use redsim::{JsonSnapshotter, Server, ServerOptions};

#[derive(Parser)]
#[command(name = "redsim")]
#[command(about = "In-process Redis-compatible server emulator")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    addr: String,

    /// Number of databases (SELECT range)
    #[arg(long, default_value = "16")]
    databases: usize,

    /// Require password for connections (like Redis requirepass)
    #[arg(long)]
    password: Option<String>,

    /// JSON snapshot file: loaded at startup, written by SAVE/SHUTDOWN
    #[arg(long)]
    persist: Option<String>,

    /// Seed for the sampling RNG (SRANDMEMBER, SPOP, RANDOMKEY)
    #[arg(long, default_value = "3735928559")]
    seed: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if args.databases == 0 {
        anyhow::bail!("--databases must be at least 1");
    }

    let mut options = ServerOptions {
        databases: args.databases,
        password: args.password,
        seed: args.seed,
        ..ServerOptions::default()
    };
    if let Some(path) = &args.persist {
        tracing::info!("persisting snapshots to {path}");
        options.snapshotter = Some(Arc::new(JsonSnapshotter::new(path)));
        options.load_snapshot = true;
    }

    let server = Server::new(options);
    server.run(&args.addr).await?;
    Ok(())
}
