//! # Client API Module
//!
//! Typed request helpers over the client end of the shared-memory
//! transport. One `IpcClient` attaches to a running server's segment,
//! stamps each request with a monotonically increasing message id, and —
//! for request/response routes — blocks until the correlated response
//! arrives or the response timeout elapses.
//!
//! Requests and responses strictly alternate: a helper that expects a
//! response consumes it before returning, so the single in-flight-request
//! invariant of the transport holds as long as one client runs at a time.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::defaults;
use crate::error::TransportError;
use crate::protocol::{
    route_id, AddIrGraphRequest, CreateUserRequest, DeleteUserRequest, FixedWire, Frame,
    GetIrGraphRequest, GetIrGraphResponse, GetIrRequest, GetIrResponse, GetUserRequest,
};
use crate::transport::ClientTransport;

/// Client handle to a running `ircached` server.
pub struct IpcClient {
    transport: ClientTransport,
    next_message_id: u32,
    response_timeout: Option<Duration>,
}

impl IpcClient {
    /// Attach to the default shared-memory segment.
    pub fn connect() -> Result<Self, TransportError> {
        Self::connect_to(defaults::SHARED_MEMORY_NAME)
    }

    /// Attach to the segment a server created under `name`.
    pub fn connect_to(name: &str) -> Result<Self, TransportError> {
        Ok(Self {
            transport: ClientTransport::attach(name)?,
            next_message_id: 0,
            response_timeout: Some(defaults::RESPONSE_TIMEOUT),
        })
    }

    /// Override the response deadline (`None` waits forever).
    pub fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        self.response_timeout = timeout;
    }

    fn next_id(&mut self) -> u32 {
        self.next_message_id = self.next_message_id.wrapping_add(1);
        self.next_message_id
    }

    /// Frame and send a fire-and-forget request.
    pub fn send_request(&mut self, route: &str, payload: &[u8]) -> Result<(), TransportError> {
        let frame = Frame {
            message_id: self.next_id(),
            route_hash: route_id(route),
            payload,
        };
        self.transport.send_request(&frame, false)?;
        debug!("request sent to route {}", route);
        Ok(())
    }

    /// Frame and send a request, then block for its correlated response.
    pub fn send_request_with_response(
        &mut self,
        route: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let message_id = self.next_id();
        let frame = Frame {
            message_id,
            route_hash: route_id(route),
            payload,
        };
        self.transport.send_request(&frame, true)?;
        debug!("request sent to route {}, awaiting response", route);
        self.transport
            .wait_for_response(message_id, self.response_timeout)
    }

    // -- typed helpers ------------------------------------------------------

    pub fn create_user(&mut self, username: &str, email: &str) -> Result<(), TransportError> {
        let request = CreateUserRequest {
            username: username.to_string(),
            email: email.to_string(),
        };
        self.send_request("user/create", &request.encode())
    }

    pub fn get_user(&mut self, user_id: u32) -> Result<(), TransportError> {
        self.send_request("user/get", &GetUserRequest { user_id }.encode())
    }

    pub fn delete_user(&mut self, user_id: u32) -> Result<(), TransportError> {
        self.send_request("user/delete", &DeleteUserRequest { user_id }.encode())
    }

    /// Submit a serialized IR graph for caching under its content hash.
    pub fn add_ir_graph(&mut self, function_code_hash: &str, graph: &[u8]) -> Result<(), TransportError> {
        let request = AddIrGraphRequest {
            function_code_hash: function_code_hash.to_string(),
            graph: graph.to_vec(),
        };
        self.send_request("function/add_ir_graph", &request.encode())
    }

    /// Fetch a previously cached IR graph. A miss is not an error: the
    /// response carries `success=false` and the server's error string.
    pub fn get_ir_graph(&mut self, function_code_hash: &str) -> Result<GetIrGraphResponse> {
        let request = GetIrGraphRequest {
            function_code_hash: function_code_hash.to_string(),
        };
        let bytes = self
            .send_request_with_response("function/get_ir_graph", &request.encode())
            .with_context(|| format!("get_ir_graph({function_code_hash}) failed"))?;
        GetIrGraphResponse::decode(&bytes).context("malformed get_ir_graph response")
    }

    /// Fetch through the legacy bit-packed route.
    pub fn get_ir(&mut self, function_code_hash: &str) -> Result<GetIrResponse> {
        let request = GetIrRequest {
            function_code_hash: function_code_hash.to_string(),
        };
        let bytes = self
            .send_request_with_response("function/get_ir", &request.encode())
            .with_context(|| format!("get_ir({function_code_hash}) failed"))?;
        let response = GetIrResponse::decode(&bytes).context("malformed get_ir response")?;
        if response.success && response.bits.len() * 8 < response.bit_count as usize {
            bail!(
                "get_ir response declares {} bits but carries only {} bytes",
                response.bit_count,
                response.bits.len()
            );
        }
        Ok(response)
    }
}
