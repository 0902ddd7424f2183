//! Typed error kinds for the transport, wire protocol, and cache store.
//!
//! Errors never cross the IPC boundary as typed objects: the server logs
//! them, and request/response payloads carry an in-band `success` flag plus
//! a fixed-size error string. Within the process they are ordinary `Result`
//! values so callers can distinguish a busy buffer from a vanished server.

use thiserror::Error;

/// Failures of the shared-memory transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Creating, sizing, or mapping the shared-memory segment failed
    #[error("shared memory error: {0}")]
    Shmem(String),

    /// A semaphore operation returned an unexpected errno
    #[error("semaphore operation failed: {0}")]
    Semaphore(#[source] std::io::Error),

    /// A request is already pending in the single request slot
    #[error("request slot busy: a message is already in flight")]
    BufferBusy,

    /// The framed message would not fit in the fixed transport slot
    #[error("message of {size} bytes exceeds the {max}-byte slot")]
    OversizeMessage { size: usize, max: usize },

    /// A response arrived carrying a different correlation id
    #[error("response correlation mismatch: expected id {expected}, got {actual}")]
    CorrelationError { expected: u32, actual: u32 },

    /// No response arrived before the deadline
    #[error("timed out waiting for a response")]
    ResponseTimeout,
}

/// Failures decoding or encoding framed messages and payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Fewer bytes than a frame header were available
    #[error("truncated frame: {got} bytes, header needs {need}")]
    TruncatedHeader { got: usize, need: usize },

    /// The header's payload_size disagrees with the bytes on the wire
    #[error("frame payload size {declared} exceeds the {available} bytes present")]
    PayloadSizeMismatch { declared: usize, available: usize },

    /// A fixed-size payload was shorter than its wire format requires
    #[error("payload of {got} bytes is shorter than the {need}-byte request shape")]
    UndersizedPayload { got: usize, need: usize },
}

/// Failures of the memory-mapped cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Opening, sizing, or mapping the backing file failed
    #[error("cache backing file error")]
    Io(#[from] std::io::Error),

    /// Put was called with an empty key or zero-length value
    #[error("empty key or value")]
    EmptyInput,

    /// Not enough contiguous space remains, even after compaction
    #[error("cache full: {needed} bytes requested, {available} free after compaction")]
    Full { needed: u32, available: u32 },

    /// All slot-table entries are occupied
    #[error("no free cache slots")]
    NoFreeSlot,
}
