//! # IR Cache Service
//!
//! A local inter-process cache service for compiled-function intermediate
//! representations (IR). A single `ircached` server process exposes a
//! request/response interface over a shared-memory transport guarded by
//! cross-process semaphores; client processes submit serialized IR graphs
//! keyed by a content hash and retrieve them later. Entries persist in a
//! bounded, memory-mapped store backed by a file on disk, so they survive
//! server restarts within the same host.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐    ┌──────────────────────┐    ┌─────────────┐
//! │   Client    │───▶│  Shared Memory       │───▶│   Server    │
//! │  Process    │    │  (request/response   │    │  loop +     │
//! │             │◀───│   slots + semaphores)│◀───│  router     │
//! └─────────────┘    └──────────────────────┘    └──────┬──────┘
//!                                                       │
//!                                                ┌──────▼──────┐
//!                                                │  mmap cache │
//!                                                │  (100 MiB)  │
//!                                                └─────────────┘
//! ```
//!
//! Three layers make up the core:
//!
//! - [`transport`]: a fixed-layout control region in POSIX shared memory
//!   carrying one in-flight request and one in-flight response, synchronized
//!   by three process-shared semaphores.
//! - [`router`]: a table mapping 32-bit route identifiers to typed handlers,
//!   dispatched by the single-threaded server loop in [`server`].
//! - [`cache`]: a fixed-size file-backed store with a header, a 1024-slot
//!   table, and a bump-allocated data region, with content-integrity checks.

pub mod cache;
pub mod cli;
pub mod client;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod router;
pub mod server;
pub mod transport;

pub use cache::CacheStore;
pub use client::IpcClient;
pub use error::{CacheError, ProtocolError, TransportError};
pub use router::Router;
pub use server::{IpcServer, ServerHandle};

/// The current version of the IR cache service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// POSIX name of the shared-memory control segment
    pub const SHARED_MEMORY_NAME: &str = "/ipc_router_shared";

    /// Path of the memory-mapped cache backing file
    pub const CACHE_FILE_PATH: &str = "/tmp/v8_code_cache";

    /// How long a client waits for a response before giving up.
    ///
    /// The server drops unknown routes without replying, so an unbounded
    /// wait could hang a request/response client forever.
    pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default log file name for the daemon
    pub const LOG_FILE: &str = "ircached.log";
}
