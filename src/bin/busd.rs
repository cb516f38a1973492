//! busd - message bus broker
//!
//! Routes frames between connected clients and the objects they register.
//! Binds the system socket by default, the session socket with --session.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use vinit::bus::broker::{bind_socket, Broker};
use vinit::bus::frame::{session_bus_path, SYSTEM_BUS_PATH};

#[derive(Parser)]
#[command(name = "busd")]
#[command(about = "Message bus broker")]
struct Args {
    /// Listen on the session bus instead of the system bus
    #[arg(long)]
    session: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let path: PathBuf = if args.session {
        session_bus_path()
    } else {
        PathBuf::from(SYSTEM_BUS_PATH)
    };

    let listener = match bind_socket(&path) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("busd: failed to bind {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };
    log::info!("busd listening on {}", path.display());

    if let Err(e) = Arc::new(Broker::new()).run(listener).await {
        eprintln!("busd: {}", e);
        std::process::exit(1);
    }
}
