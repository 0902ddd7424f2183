//! # Server Loop Module
//!
//! Wires the three core layers together: creates the shared-memory
//! transport, opens the memory-mapped cache, registers every route, and
//! runs the single-threaded dispatch loop.
//!
//! The loop is a cooperative wait/post cycle: block on `data_ready`, decode
//! the framed message, dispatch through the router, publish a response when
//! the handler produced one, then release the transport `mutex` so the next
//! client may submit. The cache is consulted only inside handlers, which
//! receive it as borrowed server state rather than through any global.
//!
//! Shutdown is cooperative as well: [`ServerHandle::stop`] clears the run
//! flag and posts `data_ready` once so a blocked loop wakes up, notices the
//! flag, and exits without touching the slots.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::protocol::{
    AddIrGraphRequest, CreateUserRequest, DeleteUserRequest, Frame, GetIrGraphRequest,
    GetIrGraphResponse, GetIrRequest, GetIrResponse, GetUserRequest,
};
use crate::router::Router;
use crate::transport::{ServerTransport, WakeHandle};

/// State every handler can reach: today just the cache store.
pub struct ServerState {
    pub cache: CacheStore,
}

/// Handle for stopping a running server loop from another thread (typically
/// the signal-handling task).
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    wake: WakeHandle,
}

impl ServerHandle {
    /// Request a graceful stop: clear the run flag and unblock the loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.wake();
    }
}

/// The cache server: transport, router, and cache under one roof.
pub struct IpcServer {
    transport: ServerTransport,
    router: Router<ServerState>,
    state: ServerState,
    running: Arc<AtomicBool>,
}

impl IpcServer {
    /// Create the transport segment, open the cache backing file, and
    /// register all routes. Fails (and tears down the partial state) if any
    /// of the underlying resources cannot be brought up.
    pub fn new(shm_name: &str, cache_path: impl AsRef<Path>) -> Result<Self> {
        let transport = ServerTransport::create(shm_name)
            .with_context(|| format!("failed to create shared memory segment {shm_name}"))?;
        let cache = CacheStore::open(&cache_path).with_context(|| {
            format!(
                "failed to open cache backing file {}",
                cache_path.as_ref().display()
            )
        })?;

        let mut router = Router::new();
        register_routes(&mut router);

        Ok(Self {
            transport,
            router,
            state: ServerState { cache },
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Handle for stopping the loop from another thread.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            running: Arc::clone(&self.running),
            wake: self.transport.wake_handle(),
        }
    }

    /// The server-owned cache store.
    pub fn cache(&self) -> &CacheStore {
        &self.state.cache
    }

    /// Run the dispatch loop until [`ServerHandle::stop`] is called.
    ///
    /// Per iteration: wait for `data_ready`, copy the pending frame out of
    /// the request slot, dispatch it, publish any response, then clear the
    /// slot and release `mutex` so the next submission can proceed.
    pub fn run(&mut self) -> Result<()> {
        info!("IPC server started, waiting for messages");

        while self.running.load(Ordering::SeqCst) {
            self.transport.wait_for_request()?;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if let Some(bytes) = self.transport.take_request() {
                match Frame::decode(&bytes) {
                    Ok(frame) => {
                        debug!(
                            "message received: id {}, route id {}, {} payload bytes",
                            frame.message_id,
                            frame.route_hash,
                            frame.payload.len()
                        );
                        if let Some(body) = self.router.dispatch(&mut self.state, &frame) {
                            if let Err(e) = self.transport.send_response(frame.message_id, &body) {
                                error!(
                                    "failed to publish response for message {}: {}",
                                    frame.message_id, e
                                );
                            }
                        }
                    }
                    Err(e) => warn!("dropping malformed frame: {}", e),
                }
            }

            self.transport.finish_request()?;
        }

        info!(
            "server stopped ({} cached entries, {} bytes used)",
            self.state.cache.entry_count(),
            self.state.cache.used_space()
        );
        Ok(())
    }
}

fn register_routes(router: &mut Router<ServerState>) {
    router.register_route::<CreateUserRequest, _>("user/create", handle_create_user);
    router.register_route::<GetUserRequest, _>("user/get", handle_get_user);
    router.register_route::<DeleteUserRequest, _>("user/delete", handle_delete_user);
    router.register_variable_route("function/add_ir_graph", handle_add_ir_graph);
    router.register_responding_route::<GetIrGraphRequest, _>(
        "function/get_ir_graph",
        handle_get_ir_graph,
    );
    router.register_responding_route::<GetIrRequest, _>("function/get_ir", handle_get_ir);
}

// ---------------------------------------------------------------------------
// Demonstration user routes (log-only, no response)
// ---------------------------------------------------------------------------

fn handle_create_user(_state: &mut ServerState, request: CreateUserRequest) {
    info!("user created: {} <{}>", request.username, request.email);
}

fn handle_get_user(_state: &mut ServerState, request: GetUserRequest) {
    info!("user lookup requested for id {}", request.user_id);
}

fn handle_delete_user(_state: &mut ServerState, request: DeleteUserRequest) {
    info!("user deleted: id {}", request.user_id);
}

// ---------------------------------------------------------------------------
// IR cache routes
// ---------------------------------------------------------------------------

/// `function/add_ir_graph`: variable payload, stores the serialized graph
/// under its content hash. No response.
fn handle_add_ir_graph(state: &mut ServerState, payload: &[u8]) {
    let request = match AddIrGraphRequest::decode(payload) {
        Ok(r) => r,
        Err(e) => {
            warn!("add_ir_graph rejected: {}", e);
            return;
        }
    };

    match state.cache.put(&request.function_code_hash, &request.graph) {
        Ok(()) => info!(
            "IR graph cached under {} ({} bytes; {} entries, {} bytes used)",
            request.function_code_hash,
            request.graph.len(),
            state.cache.entry_count(),
            state.cache.used_space()
        ),
        Err(e) => warn!(
            "failed to cache IR graph under {}: {}",
            request.function_code_hash, e
        ),
    }
}

/// `function/get_ir_graph`: request/response lookup of a serialized graph.
fn handle_get_ir_graph(
    state: &mut ServerState,
    request: GetIrGraphRequest,
    _message_id: u32,
) -> Option<Vec<u8>> {
    let response = match state.cache.get(&request.function_code_hash) {
        Some(graph) => {
            info!(
                "IR graph found for {} ({} bytes)",
                request.function_code_hash,
                graph.len()
            );
            GetIrGraphResponse::found(graph)
        }
        None => {
            info!("IR graph not found for {}", request.function_code_hash);
            GetIrGraphResponse::not_found("Fonction non trouvée dans le cache")
        }
    };
    Some(response.encode())
}

/// `function/get_ir` (legacy): same lookup, but the response declares a bit
/// count and carries the payload bit-packed.
fn handle_get_ir(
    state: &mut ServerState,
    request: GetIrRequest,
    _message_id: u32,
) -> Option<Vec<u8>> {
    let response = match state.cache.get(&request.function_code_hash) {
        Some(bits) => {
            info!(
                "IR found for {} ({} bits)",
                request.function_code_hash,
                bits.len() * 8
            );
            GetIrResponse {
                success: true,
                bit_count: (bits.len() * 8) as u32,
                error_message: String::new(),
                bits,
            }
        }
        None => {
            info!("IR not found for {}", request.function_code_hash);
            GetIrResponse {
                success: false,
                bit_count: 0,
                error_message: "Fonction non trouvée".to_string(),
                bits: Vec::new(),
            }
        }
    };
    Some(response.encode())
}
