//! A bidirectional JSON-array RPC runtime over WebSocket, in the style of OCPP.
//!
//! A connection, whether accepted by a [`server::Server`] or dialed by a
//! [`client::Client`], is driven by a single [`peer::Peer`]: it owns the
//! socket, the outbound call queue, the pending-call and pending-response
//! tables, and the keepalive engine, and dispatches frames to registered
//! method handlers.

#![forbid(unsafe_code)]

pub(crate) use thiserror::Error as ImplError;

mod common;
mod events;
mod keepalive;
mod peer;
mod pending_call;
mod pending_response;
mod queue;
mod transport;
mod validator;

pub mod client;
pub mod server;

pub use events::{Event, EventReceiver};
pub use peer::{CallHandle, CloseOptions, HandlerArgs, Peer, PeerConfig, RouterBuilder};
pub use validator::{
	JsonSchemaValidator, JsonSchemaValidatorBuilder, SchemaCompileError, StrictMode,
	StrictModeConfigError, ValidationDirection, ValidationFailure, Validator, ValidatorRegistry,
};

pub use rpc_core::{CallError, CloseCode, ErrorCode, Json};

pub use client::{Backoff, Client, ClientConfig};
pub use server::{Server, ServerConfig};
