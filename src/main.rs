#![cfg(not(tarpaulin_include))]

use clap::Parser;
use equipviz::app;
use equipviz::config::Config;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Chemical equipment parameter visualizer: HTTP API server
#[derive(Debug, Parser)]
#[command(name = "equipviz", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "EQUIPVIZ_BIND")]
    bind: Option<SocketAddr>,

    /// Directory holding users and upload sessions
    #[arg(long, env = "EQUIPVIZ_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Create the admin account (ADMIN_USERNAME / ADMIN_PASSWORD / ADMIN_EMAIL,
    /// or admin / admin123) if it does not exist yet
    #[arg(long)]
    create_admin: bool,
}

/// Main entry point for the web server
///
/// Reads the remaining settings from the environment, then serves the API
/// until the process is stopped.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if args.create_admin {
        config = config.with_default_admin();
    }

    app::run(config).await
}
