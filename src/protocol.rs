//! # Wire Protocol Module
//!
//! Defines the framed message format carried through the shared-memory
//! transport and the payload shapes of every registered route. All integers
//! are little-endian; fixed-size text fields are NUL-terminated and
//! zero-padded, so the same bytes can be read back by any process on the
//! host regardless of build.
//!
//! ## Frame Layout
//!
//! | Offset | Size | Field |
//! |-------:|-----:|-------|
//! | 0 | 4 | `message_id` |
//! | 4 | 4 | `route_hash` |
//! | 8 | 4 | `payload_size` |
//! | 12 | `payload_size` | payload |
//!
//! A frame never exceeds [`MAX_MESSAGE_SIZE`], the capacity of one transport
//! slot. Route identifiers are the first four bytes (little-endian) of a
//! SHA-256 digest over the UTF-8 route name, which keeps the dispatch key a
//! fixed 32-bit integer while deriving it from human-readable names like
//! `function/get_ir_graph`.

use sha2::{Digest, Sha256};

use crate::error::ProtocolError;

/// Capacity of one transport slot; a framed message must fit entirely
pub const MAX_MESSAGE_SIZE: usize = 20_480;

/// Bytes occupied by the fixed frame prefix
pub const FRAME_HEADER_SIZE: usize = 12;

/// Size of a content-hash field on the wire
pub const HASH_FIELD_SIZE: usize = 256;

/// Size of an in-band error string on the wire
pub const ERROR_MESSAGE_SIZE: usize = 128;

/// Derive the 32-bit route identifier for a textual route name.
///
/// The identifier is the first 4 bytes of `SHA-256(name)` interpreted
/// little-endian. Both ends derive it the same way, so route names never
/// travel on the wire.
pub fn route_id(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// A decoded view of one framed message.
///
/// Borrowed from the buffer it was decoded out of; the transport copies
/// frames out of shared memory before handing them to the dispatcher, so
/// the payload slice stays valid for the whole handler call.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Correlation id, monotonic per client process
    pub message_id: u32,
    /// Dispatch key derived by [`route_id`]
    pub route_hash: u32,
    /// Route-specific payload bytes
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Total encoded size of a frame carrying `payload_len` payload bytes
    pub fn encoded_len(payload_len: usize) -> usize {
        FRAME_HEADER_SIZE + payload_len
    }

    /// Serialize the frame into `dst`, returning the number of bytes written.
    ///
    /// `dst` must hold at least [`Frame::encoded_len`] bytes; the transport
    /// checks the slot capacity before calling.
    pub fn encode_into(&self, dst: &mut [u8]) -> usize {
        let total = Self::encoded_len(self.payload.len());
        debug_assert!(dst.len() >= total);
        dst[0..4].copy_from_slice(&self.message_id.to_le_bytes());
        dst[4..8].copy_from_slice(&self.route_hash.to_le_bytes());
        dst[8..12].copy_from_slice(&(self.payload.len() as u32).to_le_bytes());
        dst[12..total].copy_from_slice(self.payload);
        total
    }

    /// Decode a frame from `bytes`, validating the header against the bytes
    /// actually present.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::TruncatedHeader {
                got: bytes.len(),
                need: FRAME_HEADER_SIZE,
            });
        }
        let message_id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let route_hash = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let payload_size = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let available = bytes.len() - FRAME_HEADER_SIZE;
        if payload_size > available {
            return Err(ProtocolError::PayloadSizeMismatch {
                declared: payload_size,
                available,
            });
        }
        Ok(Frame {
            message_id,
            route_hash,
            payload: &bytes[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload_size],
        })
    }
}

/// Copy `s` into a fixed-size wire field, truncating to `dst.len() - 1`
/// bytes and NUL-terminating. Remaining bytes are zeroed.
pub fn write_fixed_str(dst: &mut [u8], s: &str) {
    dst.fill(0);
    let n = s.len().min(dst.len().saturating_sub(1));
    dst[..n].copy_from_slice(&s.as_bytes()[..n]);
}

/// Read a NUL-terminated string back out of a fixed-size wire field.
pub fn read_fixed_str(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

/// A request shape with a fixed wire size, decodable by the router after a
/// single size check.
pub trait FixedWire: Sized {
    /// Exact number of payload bytes this shape occupies
    const WIRE_SIZE: usize;

    /// Reinterpret `bytes` as this shape. Callers guarantee
    /// `bytes.len() >= WIRE_SIZE`.
    fn decode(bytes: &[u8]) -> Self;

    /// Serialize to exactly [`FixedWire::WIRE_SIZE`] bytes.
    fn encode(&self) -> Vec<u8>;
}

/// `user/create` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
}

impl FixedWire for CreateUserRequest {
    const WIRE_SIZE: usize = 64 + 128;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            username: read_fixed_str(&bytes[0..64]),
            email: read_fixed_str(&bytes[64..192]),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::WIRE_SIZE];
        write_fixed_str(&mut buf[0..64], &self.username);
        write_fixed_str(&mut buf[64..192], &self.email);
        buf
    }
}

/// `user/get` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetUserRequest {
    pub user_id: u32,
}

impl FixedWire for GetUserRequest {
    const WIRE_SIZE: usize = 4;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            user_id: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        }
    }

    fn encode(&self) -> Vec<u8> {
        self.user_id.to_le_bytes().to_vec()
    }
}

/// `user/delete` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteUserRequest {
    pub user_id: u32,
}

impl FixedWire for DeleteUserRequest {
    const WIRE_SIZE: usize = 4;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            user_id: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        }
    }

    fn encode(&self) -> Vec<u8> {
        self.user_id.to_le_bytes().to_vec()
    }
}

/// `function/get_ir_graph` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetIrGraphRequest {
    pub function_code_hash: String,
}

impl FixedWire for GetIrGraphRequest {
    const WIRE_SIZE: usize = HASH_FIELD_SIZE;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            function_code_hash: read_fixed_str(&bytes[0..HASH_FIELD_SIZE]),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::WIRE_SIZE];
        write_fixed_str(&mut buf, &self.function_code_hash);
        buf
    }
}

/// `function/get_ir` request (legacy)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetIrRequest {
    pub function_code_hash: String,
}

impl FixedWire for GetIrRequest {
    const WIRE_SIZE: usize = HASH_FIELD_SIZE;

    fn decode(bytes: &[u8]) -> Self {
        Self {
            function_code_hash: read_fixed_str(&bytes[0..HASH_FIELD_SIZE]),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::WIRE_SIZE];
        write_fixed_str(&mut buf, &self.function_code_hash);
        buf
    }
}

/// `function/add_ir_graph` request: fixed prefix followed by the serialized
/// graph bytes. Variable-length, so it bypasses [`FixedWire`] and carries
/// its own size validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddIrGraphRequest {
    pub function_code_hash: String,
    pub graph: Vec<u8>,
}

impl AddIrGraphRequest {
    /// Bytes before the serialized graph: `function_code_hash[256]` then
    /// `graph_size:u32`.
    pub const PREFIX_SIZE: usize = HASH_FIELD_SIZE + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::PREFIX_SIZE + self.graph.len()];
        write_fixed_str(&mut buf[0..HASH_FIELD_SIZE], &self.function_code_hash);
        buf[HASH_FIELD_SIZE..Self::PREFIX_SIZE]
            .copy_from_slice(&(self.graph.len() as u32).to_le_bytes());
        buf[Self::PREFIX_SIZE..].copy_from_slice(&self.graph);
        buf
    }

    /// Decode and validate: the declared graph size must account for every
    /// byte after the prefix, exactly.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::PREFIX_SIZE {
            return Err(ProtocolError::UndersizedPayload {
                got: bytes.len(),
                need: Self::PREFIX_SIZE,
            });
        }
        let graph_size = u32::from_le_bytes(
            bytes[HASH_FIELD_SIZE..Self::PREFIX_SIZE].try_into().unwrap(),
        ) as usize;
        let available = bytes.len() - Self::PREFIX_SIZE;
        if graph_size != available {
            return Err(ProtocolError::PayloadSizeMismatch {
                declared: graph_size,
                available,
            });
        }
        Ok(Self {
            function_code_hash: read_fixed_str(&bytes[0..HASH_FIELD_SIZE]),
            graph: bytes[Self::PREFIX_SIZE..].to_vec(),
        })
    }
}

/// `function/get_ir_graph` response: success flag, graph size, in-band error
/// string, then the serialized graph bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetIrGraphResponse {
    pub success: bool,
    pub error_message: String,
    pub graph: Vec<u8>,
}

impl GetIrGraphResponse {
    /// `success:u8` + 3 pad + `graph_size:u32` + `error_message[128]`
    pub const PREFIX_SIZE: usize = 8 + ERROR_MESSAGE_SIZE;

    pub fn found(graph: Vec<u8>) -> Self {
        Self {
            success: true,
            error_message: String::new(),
            graph,
        }
    }

    pub fn not_found(error_message: &str) -> Self {
        Self {
            success: false,
            error_message: error_message.to_string(),
            graph: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::PREFIX_SIZE + self.graph.len()];
        buf[0] = self.success as u8;
        buf[4..8].copy_from_slice(&(self.graph.len() as u32).to_le_bytes());
        write_fixed_str(&mut buf[8..8 + ERROR_MESSAGE_SIZE], &self.error_message);
        buf[Self::PREFIX_SIZE..].copy_from_slice(&self.graph);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::PREFIX_SIZE {
            return Err(ProtocolError::UndersizedPayload {
                got: bytes.len(),
                need: Self::PREFIX_SIZE,
            });
        }
        let graph_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let available = bytes.len() - Self::PREFIX_SIZE;
        if graph_size > available {
            return Err(ProtocolError::PayloadSizeMismatch {
                declared: graph_size,
                available,
            });
        }
        Ok(Self {
            success: bytes[0] != 0,
            error_message: read_fixed_str(&bytes[8..8 + ERROR_MESSAGE_SIZE]),
            graph: bytes[Self::PREFIX_SIZE..Self::PREFIX_SIZE + graph_size].to_vec(),
        })
    }
}

/// `function/get_ir` response (legacy): same prefix shape as
/// [`GetIrGraphResponse`] but the size field counts bits, not bytes, and the
/// payload is the bit-packed IR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetIrResponse {
    pub success: bool,
    pub bit_count: u32,
    pub error_message: String,
    pub bits: Vec<u8>,
}

impl GetIrResponse {
    pub const PREFIX_SIZE: usize = 8 + ERROR_MESSAGE_SIZE;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::PREFIX_SIZE + self.bits.len()];
        buf[0] = self.success as u8;
        buf[4..8].copy_from_slice(&self.bit_count.to_le_bytes());
        write_fixed_str(&mut buf[8..8 + ERROR_MESSAGE_SIZE], &self.error_message);
        buf[Self::PREFIX_SIZE..].copy_from_slice(&self.bits);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::PREFIX_SIZE {
            return Err(ProtocolError::UndersizedPayload {
                got: bytes.len(),
                need: Self::PREFIX_SIZE,
            });
        }
        Ok(Self {
            success: bytes[0] != 0,
            bit_count: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            error_message: read_fixed_str(&bytes[8..8 + ERROR_MESSAGE_SIZE]),
            bits: bytes[Self::PREFIX_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let payload = vec![0xAB; 100];
        let frame = Frame {
            message_id: 7,
            route_hash: route_id("function/get_ir_graph"),
            payload: &payload,
        };
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        let n = frame.encode_into(&mut buf);
        assert_eq!(n, FRAME_HEADER_SIZE + 100);

        let decoded = Frame::decode(&buf[..n]).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn frame_decode_rejects_truncated_header() {
        let err = Frame::decode(&[0u8; 11]).unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedHeader { got: 11, .. }));
    }

    #[test]
    fn frame_decode_rejects_payload_overrun() {
        let mut buf = vec![0u8; FRAME_HEADER_SIZE + 4];
        buf[8..12].copy_from_slice(&100u32.to_le_bytes());
        let err = Frame::decode(&buf).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::PayloadSizeMismatch {
                declared: 100,
                available: 4
            }
        ));
    }

    #[test]
    fn frame_fits_slot_exactly_at_max() {
        let payload = vec![1u8; MAX_MESSAGE_SIZE - FRAME_HEADER_SIZE];
        let frame = Frame {
            message_id: 1,
            route_hash: 0,
            payload: &payload,
        };
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        assert_eq!(frame.encode_into(&mut buf), MAX_MESSAGE_SIZE);
    }

    #[test]
    fn fixed_str_round_trip_and_truncation() {
        let mut field = [0u8; 8];
        write_fixed_str(&mut field, "short");
        assert_eq!(read_fixed_str(&field), "short");

        // Truncates to len-1 and keeps the terminator
        write_fixed_str(&mut field, "much too long");
        assert_eq!(read_fixed_str(&field), "much to");
        assert_eq!(field[7], 0);
    }

    #[test]
    fn route_ids_are_distinct_across_registered_routes() {
        let names = [
            "user/create",
            "user/get",
            "user/delete",
            "function/add_ir_graph",
            "function/get_ir_graph",
            "function/get_ir",
        ];
        let mut ids: Vec<u32> = names.iter().map(|n| route_id(n)).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), names.len());
    }

    #[test]
    fn route_id_is_stable() {
        // Same name must hash identically on both ends of the transport.
        assert_eq!(route_id("user/create"), route_id("user/create"));
        assert_ne!(route_id("user/create"), route_id("user/delete"));
    }

    #[test]
    fn create_user_round_trip() {
        let req = CreateUserRequest {
            username: "alice".into(),
            email: "alice@x".into(),
        };
        let bytes = req.encode();
        assert_eq!(bytes.len(), CreateUserRequest::WIRE_SIZE);
        assert_eq!(CreateUserRequest::decode(&bytes), req);
    }

    #[test]
    fn add_ir_graph_round_trip() {
        let req = AddIrGraphRequest {
            function_code_hash: "HASH_A".into(),
            graph: (0..=255u8).collect(),
        };
        let bytes = req.encode();
        assert_eq!(AddIrGraphRequest::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn add_ir_graph_rejects_inconsistent_size() {
        let req = AddIrGraphRequest {
            function_code_hash: "HASH_A".into(),
            graph: vec![1, 2, 3, 4],
        };
        let mut bytes = req.encode();
        // Declare more bytes than are actually present
        bytes[HASH_FIELD_SIZE..AddIrGraphRequest::PREFIX_SIZE]
            .copy_from_slice(&8u32.to_le_bytes());
        assert!(AddIrGraphRequest::decode(&bytes).is_err());
    }

    #[test]
    fn get_ir_graph_response_round_trip() {
        let hit = GetIrGraphResponse::found(vec![9u8; 1024]);
        assert_eq!(GetIrGraphResponse::decode(&hit.encode()).unwrap(), hit);

        let miss = GetIrGraphResponse::not_found("Fonction non trouvée dans le cache");
        let decoded = GetIrGraphResponse::decode(&miss.encode()).unwrap();
        assert!(!decoded.success);
        assert_eq!(decoded.error_message, "Fonction non trouvée dans le cache");
        assert!(decoded.graph.is_empty());
    }

    #[test]
    fn get_ir_response_round_trip() {
        let resp = GetIrResponse {
            success: true,
            bit_count: 40,
            error_message: String::new(),
            bits: vec![0xAB, 0xCD, 0xEF, 0x12, 0x34],
        };
        assert_eq!(GetIrResponse::decode(&resp.encode()).unwrap(), resp);
    }
}
