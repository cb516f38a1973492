//! devd - device-event responder
//!
//! `listen` consumes kernel uevents and maintains /dev; `trigger` makes
//! the kernel replay events for devices that are already present.

use clap::{Parser, Subcommand};

use vinit::api::UdevApi;
use vinit::udev;

#[derive(Parser)]
#[command(name = "devd")]
#[command(about = "Device-event responder")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for kernel uevents and maintain /dev
    Listen {
        /// Also replay events for devices that are already present
        #[arg(long)]
        trigger: bool,
    },
    /// Replay kernel events for present devices
    Trigger {
        /// Query the responder afterwards and report its idleness
        #[arg(long)]
        wait: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let result = match args.command {
        Command::Listen { trigger } => udev::listen(trigger).await.map_err(|e| e.to_string()),
        Command::Trigger { wait } => run_trigger(wait).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_trigger(wait: bool) -> Result<(), String> {
    udev::trigger::replay_sys_events();

    if wait {
        let mut api = UdevApi::connect_system().await.map_err(|e| e.to_string())?;
        let idle = api.is_idle().await.map_err(|e| e.to_string())?;
        println!("IsIdle == {}", idle);
    }
    Ok(())
}
