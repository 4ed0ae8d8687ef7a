//! svcfab Protocol Definitions
//!
//! Protocol ids, rendezvous keys, and the wire literals shared by the
//! allocation and request-forward protocols.
//!
//! # Wire protocols
//!
//! - **Allocation** ([`ALLOC_PROTOCOL_ID`]): line-oriented, newline
//!   terminated, UTF-8, no length prefix. Request: `START-PROGRAM <hash>`.
//!   Success reply: a dotted-quad `host:port`. Failure reply: [`ERROR_TOKEN`].
//! - **Request forward** ([`REQUEST_PROTOCOL_ID`]): one serialized HTTP/1.1
//!   request, then one serialized HTTP/1.1 response - or the
//!   [`SERVICE_DEAD`] sentinel followed by stream close.
//! - **Ping** ([`PING_PROTOCOL_ID`]): a `PING` line answered by a `PONG`
//!   line, used for RTT measurement.

pub mod alloc;
pub mod error;

pub use error::{FabricError, Result};

/// Protocol id for the allocation protocol (Allocator role).
pub const ALLOC_PROTOCOL_ID: &str = "/svcfab/alloc/1.0";

/// Protocol id for the request-forward protocol (Manager role).
pub const REQUEST_PROTOCOL_ID: &str = "/svcfab/request/1.0";

/// Protocol id for the RTT echo protocol.
pub const PING_PROTOCOL_ID: &str = "/svcfab/ping/1.0";

/// Well-known rendezvous key under which Allocators advertise.
///
/// Managers advertise under the service hash they front, so there is no
/// manager-side constant - the hash itself is the rendezvous key.
pub const ALLOCATOR_RENDEZVOUS: &str = "svcfab-allocator";

/// Allocation command verb.
pub const CMD_START_PROGRAM: &str = "START-PROGRAM";

/// Allocator failure reply. Non-empty and can never match the instance
/// address grammar.
pub const ERROR_TOKEN: &str = "ERROR";

/// Manager sentinel written when the fronted service cannot produce a
/// response. Written instead of an HTTP response, then the stream closes.
pub const SERVICE_DEAD: &str = "SERVICE-DEAD";

/// Ping request line.
pub const PING_LINE: &str = "PING";

/// Ping reply line.
pub const PONG_LINE: &str = "PONG";

/// Upper bound for a single protocol line. Commands and replies are short;
/// anything longer is a framing violation.
pub const MAX_LINE_LEN: usize = 1024;

/// Upper bound for a buffered request or response message (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
