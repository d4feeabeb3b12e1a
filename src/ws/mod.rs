//! WebSocket transport: connection handling and frame types.
//!
//! The WebSocket endpoint at `/ws` is the duplex transport: request/response
//! framing with heartbeat support on the way in, unsolicited event pushes on
//! the way out. All operations route through the same dispatcher as the REST
//! ingest surface.

pub mod connection;
pub mod handler;
pub mod messages;
