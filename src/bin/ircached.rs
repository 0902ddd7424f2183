//! # IR Cache Server Daemon
//!
//! Entry point for `ircached`. Brings up the shared-memory transport and
//! the memory-mapped cache, then runs the blocking dispatch loop on a
//! worker thread while the async main task waits for SIGINT/SIGTERM and
//! triggers a graceful shutdown.
//!
//! Exit code 0 on a clean shutdown; 1 if initialization fails or the loop
//! dies on a transport error.

use anyhow::{Context, Result};
use clap::Parser;
use ircache::{cli::ServerArgs, logging, IpcServer};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();

    // Keep the appender guard alive for the life of the process, or file
    // logging silently stops.
    let _log_guard = logging::init_logging(
        args.verbose,
        args.quiet,
        args.log_file.as_deref(),
        ircache::defaults::LOG_FILE,
    );

    info!("starting ircached {}", ircache::VERSION);
    info!(
        "transport segment {}, cache file {}",
        args.shared_memory_name,
        args.cache_file.display()
    );

    let mut server = IpcServer::new(&args.shared_memory_name, &args.cache_file)?;
    let handle = server.handle();

    // The dispatch loop blocks on semaphores, so it lives on a blocking
    // worker; this task only waits for a shutdown signal.
    let mut loop_task = tokio::task::spawn_blocking(move || server.run());

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, shutting down");
            handle.stop();
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down");
            handle.stop();
        }
        result = &mut loop_task => {
            // The loop only returns on its own if the transport failed.
            result.context("server loop panicked")??;
            return Ok(());
        }
    }

    loop_task.await.context("server loop panicked")??;
    info!("ircached exited cleanly");
    Ok(())
}
