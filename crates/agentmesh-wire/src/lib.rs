//! Agentmesh wire protocol: agent-to-network framing.
//!
//! All traffic between an agent and the network server uses JSON-framed
//! messages over TCP. Each frame is prefixed with a 4-byte big-endian
//! length header.
//!
//! ## Architecture
//!
//! - **Frame**: the envelope every wire message travels in
//! - **Request/Response**: the request-reply half of the protocol
//! - **Notification**: one-way messages (deliveries, service invocations)

pub mod frame;

pub use frame::{
    read_frame, write_frame, AdapterRequest, Frame, FrameKind, Notification, Request, Response,
    MAX_FRAME_SIZE,
};
