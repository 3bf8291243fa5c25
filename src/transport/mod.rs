//! The WebSocket byte channel this system runs its framing over.
//!
//! Everything above this module only ever sees [`Message`]; how the bytes
//! got there — an accepted server upgrade or a dialed client connection — is
//! erased behind a boxed [`AsyncIo`].

mod websocket;

pub(crate) use fastwebsockets::Role;
pub(crate) use websocket::{AsyncIo, CloseFrame, Message, WebSocket, WebSocketError};
