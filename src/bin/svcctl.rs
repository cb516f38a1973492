//! svcctl - query the service supervisor over the bus

use clap::{Parser, Subcommand};

use vinit::api::InitApi;
use vinit::bus::frame::{BUS_OBJECT_ID, EVENT_PING};
use vinit::bus::Connection;

#[derive(Parser)]
#[command(name = "svcctl")]
#[command(about = "Query the service supervisor")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List known services
    List,
    /// Show the state of a service
    Status {
        /// Service name
        name: String,
    },
    /// Check that the bus answers
    Ping,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args.command).await {
        eprintln!("svcctl: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::List => {
            let mut api = InitApi::connect_system().await?;
            for name in api.list("").await? {
                println!("- {}", name);
            }
        }
        Command::Status { name } => {
            let mut api = InitApi::connect_system().await?;
            println!("{}", api.status(&name).await?);
        }
        Command::Ping => {
            let mut conn = Connection::connect_system().await?;
            let reply = conn.call(BUS_OBJECT_ID, EVENT_PING, b"ping").await?;
            println!("{}", String::from_utf8_lossy(&reply));
        }
    }
    Ok(())
}
