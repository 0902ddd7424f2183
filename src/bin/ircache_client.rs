//! # IR Cache Demonstration Client
//!
//! Connects to a running `ircached` and issues a fixed script of requests:
//! the demonstration user routes, a graph store followed by a fetch that
//! must hit, a fetch that must miss, and the legacy bit-packed fetch.
//!
//! Exits 0 only if every request behaved as expected.

use anyhow::{bail, Context, Result};
use clap::Parser;
use ircache::{cli::ClientArgs, logging, IpcClient};
use tracing::info;

fn main() -> Result<()> {
    let args = ClientArgs::parse();
    let _log_guard = logging::init_logging(
        args.verbose,
        args.quiet,
        Some("stderr"),
        "ircache-client.log",
    );

    let mut client = IpcClient::connect_to(&args.shared_memory_name)
        .context("could not attach to the server segment; is ircached running?")?;
    client.set_response_timeout(Some(args.response_timeout));
    info!("connected to IPC server at {}", args.shared_memory_name);

    // Fire-and-forget demonstration routes. Each send blocks on the
    // transport mutex until the server has consumed the previous message,
    // so no pacing is needed between requests.
    client.create_user("alice_doe", "alice@example.com")?;
    client.get_user(12345)?;
    client.create_user("bob_smith", "bob@test.com")?;
    client.delete_user(98765)?;
    info!("user demonstration requests sent");

    // Store an IR graph, then fetch it back and compare.
    let graph: Vec<u8> = (0..args.graph_size).map(|i| (i % 251) as u8).collect();
    let hash = "SHA256_HASH_OF_FUNCTION_CODE";
    client.add_ir_graph(hash, &graph)?;

    let reply = client.get_ir_graph(hash)?;
    if !reply.success {
        bail!(
            "expected a cache hit for {hash}, server said: {}",
            reply.error_message
        );
    }
    if reply.graph != graph {
        bail!("fetched graph differs from the stored bytes");
    }
    info!("fetched {} bytes back for {}", reply.graph.len(), hash);

    // A key that was never stored must miss, in-band.
    let miss = client.get_ir_graph("NONEXISTENT_FUNCTION")?;
    if miss.success {
        bail!("expected a miss for NONEXISTENT_FUNCTION");
    }
    info!("miss reported as expected: {}", miss.error_message);

    // Legacy bit-packed route against the same entry.
    let legacy = client.get_ir(hash)?;
    if !legacy.success {
        bail!("legacy get_ir missed an entry that get_ir_graph found");
    }
    if legacy.bit_count as usize != graph.len() * 8 {
        bail!(
            "legacy get_ir declared {} bits for a {}-byte graph",
            legacy.bit_count,
            graph.len()
        );
    }
    info!("legacy fetch returned {} bits", legacy.bit_count);

    info!("all requests completed successfully");
    Ok(())
}
