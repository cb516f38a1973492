//! initd - service supervisor
//!
//! Runs as PID 1. When invoked as /init from an initramfs it first
//! assembles the real root and execs the installed copy of itself there.

use std::path::Path;
use std::sync::Arc;

use vinit::boot;
use vinit::supervisor::{Supervisor, JOURNAL_PATH, SERVICES_PATH};

#[tokio::main]
async fn main() {
    if boot::is_initramfs() {
        // Does not return unless bring-up failed.
        match boot::switch_to_real_root() {
            Ok(never) => match never {},
            Err(e) => {
                eprintln!("initd: {}", e);
                std::process::exit(1);
            }
        }
    }

    let journal = Supervisor::open_journal(Path::new(JOURNAL_PATH));
    init_logging(journal.as_ref());

    let mut supervisor = Supervisor::new(journal);
    match supervisor.load_units(Path::new(SERVICES_PATH)).await {
        Ok(count) => log::info!("loaded {} services", count),
        Err(e) => log::error!("failed to read services path {}: {}", SERVICES_PATH, e),
    }

    let supervisor = Arc::new(supervisor);
    spawn_shutdown_handler(Arc::clone(&supervisor));
    supervisor.startup().await;
}

/// Point the logger at the journal; stdout when the journal is missing.
fn init_logging(journal: Option<&std::fs::File>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(journal) = journal.and_then(|file| file.try_clone().ok()) {
        builder.target(env_logger::Target::Pipe(Box::new(journal)));
    }
    builder.init();
}

/// SIGTERM and SIGINT stop daemon restarts and let the stages drain.
fn spawn_shutdown_handler(supervisor: Arc<Supervisor>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                return;
            }
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("failed to install SIGINT handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }
        log::info!("shutdown requested");
        supervisor.begin_shutdown();
    });
}
