use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "askdb-server", about = "Serve askdb over HTTP")]
struct Args {
    #[arg(long, default_value = "config/askdb.yaml")]
    config: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; variables may come from the environment.
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    askdb_server::run_server(args.config, args.listen).await
}
