//! # Request Router Module
//!
//! Maps 32-bit route identifiers to handlers and dispatches decoded frames
//! to them. Three registration flavors cover every route shape:
//!
//! - **Fixed**: the payload is a fixed-size request; the router checks the
//!   size once, decodes, and calls the handler with the typed value.
//! - **Variable**: the handler receives the raw payload bytes and performs
//!   its own internal size validation.
//! - **Responding**: like Fixed, but the handler also receives the frame's
//!   correlation id and may return a response body for the server loop to
//!   publish.
//!
//! Handlers receive `&mut S`, the server-owned state (the cache store), so
//! no handler ever reaches for process-global mutable state. Unknown routes
//! and undersized payloads are logged and dropped; no response is generated
//! for them.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::protocol::{route_id, FixedWire, Frame};

type FireHandler<S> = Box<dyn FnMut(&mut S, &[u8]) + Send>;
type RespondHandler<S> = Box<dyn FnMut(&mut S, &[u8], u32) -> Option<Vec<u8>> + Send>;

enum RouteKind<S> {
    /// Fixed-size request, no response
    Fixed { size: usize, handler: FireHandler<S> },
    /// Raw payload, handler validates internally, no response
    Variable { handler: FireHandler<S> },
    /// Fixed-size request that produces a correlated response
    Responding {
        size: usize,
        handler: RespondHandler<S>,
    },
}

struct Route<S> {
    name: String,
    kind: RouteKind<S>,
}

/// Dispatch table from route identifier to handler.
pub struct Router<S> {
    routes: HashMap<u32, Route<S>>,
}

impl<S> Default for Router<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Router<S> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    fn insert(&mut self, name: &str, kind: RouteKind<S>) {
        let id = route_id(name);
        info!("route registered: {} (id: {})", name, id);
        self.routes.insert(
            id,
            Route {
                name: name.to_string(),
                kind,
            },
        );
    }

    /// Register a route whose payload is the fixed-size request `R`.
    pub fn register_route<R, F>(&mut self, name: &str, mut handler: F)
    where
        R: FixedWire,
        F: FnMut(&mut S, R) + Send + 'static,
    {
        self.insert(
            name,
            RouteKind::Fixed {
                size: R::WIRE_SIZE,
                handler: Box::new(move |state, payload| handler(state, R::decode(payload))),
            },
        );
    }

    /// Register a route that receives its raw payload bytes.
    pub fn register_variable_route<F>(&mut self, name: &str, handler: F)
    where
        F: FnMut(&mut S, &[u8]) + Send + 'static,
    {
        self.insert(
            name,
            RouteKind::Variable {
                handler: Box::new(handler),
            },
        );
    }

    /// Register a request/response route: the handler receives the decoded
    /// request and the correlation id, and returns the response body to
    /// publish (or `None` to stay silent).
    pub fn register_responding_route<R, F>(&mut self, name: &str, mut handler: F)
    where
        R: FixedWire,
        F: FnMut(&mut S, R, u32) -> Option<Vec<u8>> + Send + 'static,
    {
        self.insert(
            name,
            RouteKind::Responding {
                size: R::WIRE_SIZE,
                handler: Box::new(move |state, payload, message_id| {
                    handler(state, R::decode(payload), message_id)
                }),
            },
        );
    }

    /// Dispatch a decoded frame. Returns the response body to publish for
    /// the frame's correlation id, if the matched handler produced one.
    pub fn dispatch(&mut self, state: &mut S, frame: &Frame) -> Option<Vec<u8>> {
        let route = match self.routes.get_mut(&frame.route_hash) {
            Some(r) => r,
            None => {
                warn!("unknown route id {}; message dropped", frame.route_hash);
                return None;
            }
        };

        match &mut route.kind {
            RouteKind::Fixed { size, handler } => {
                if frame.payload.len() < *size {
                    warn!(
                        "route {}: payload of {} bytes is shorter than the {}-byte request; dropped",
                        route.name,
                        frame.payload.len(),
                        size
                    );
                    return None;
                }
                handler(state, frame.payload);
                None
            }
            RouteKind::Variable { handler } => {
                handler(state, frame.payload);
                None
            }
            RouteKind::Responding { size, handler } => {
                if frame.payload.len() < *size {
                    warn!(
                        "route {}: payload of {} bytes is shorter than the {}-byte request; dropped",
                        route.name,
                        frame.payload.len(),
                        size
                    );
                    return None;
                }
                handler(state, frame.payload, frame.message_id)
            }
        }
    }
}
