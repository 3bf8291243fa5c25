//! Wire-level primitives shared by the RPC client and server: frame
//! encoding/decoding, the OCPP error-code vocabulary and WebSocket close codes.
//!
//! This crate knows nothing about connections, timers or concurrency — it is
//! the pure, synchronous part of the protocol.

#![forbid(unsafe_code)]

mod close;
mod error;
mod frame;

pub use close::CloseCode;
pub use error::{CallError, ErrorCode};
pub use frame::{CallFrame, ErrorFrame, Frame, MalformedFrame, MalformedReason, MessageId, ResultFrame};

pub use serde_json::Value as Json;

/// Type-erased error, used where callers don't need to downcast.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;
