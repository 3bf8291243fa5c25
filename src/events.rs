//! The observable event surface (§2 C11).
//!
//! Both `Peer` and `Server` expose events over a broadcast channel rather
//! than callbacks, so a connection can be watched from more than one place
//! (an application handler and, say, a metrics task) without contention.

use std::{net::SocketAddr, sync::Arc};

use rpc_core::{CallError, CloseCode};
use tokio::sync::broadcast;

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An event observable on a single peer connection.
#[derive(Debug, Clone)]
pub enum Event {
	/// A client has begun dialing, or a server has accepted a TCP connection
	/// and started the upgrade handshake.
	Connecting,
	/// The WebSocket handshake completed; the peer is ready to exchange frames.
	Open { subprotocol: Option<String> },
	/// Server-only: a new peer was promoted from an inbound handshake.
	Client { identity: String, remote_address: Option<SocketAddr> },
	/// The negotiated subprotocol, surfaced once at `Open` time for convenience.
	Protocol(Option<String>),
	/// `close()` was called and the peer has begun shutting down.
	Closing,
	/// The peer reached `CLOSED`, with the close code and reason observed on
	/// the wire (or synthesized, e.g. `1006` on a failed client connect).
	Close { code: CloseCode, reason: String },
	/// The transport dropped unexpectedly, before an orderly close.
	Disconnect,
	/// A connection-level error that doesn't map to a single pending call.
	Error(Arc<CallError>),
	/// A frame failed to decode, or a CALLRESULT/CALLERROR matched no pending
	/// call; carries a human-readable reason.
	BadMessage(String),
	/// Server-only: an inbound upgrade was rejected or failed before
	/// promotion to a peer.
	UpgradeAborted { identity: Option<String>, reason: String },
}

// --------------------------------------------------------------------------------
// EventSender / EventReceiver

#[derive(Clone)]
pub(crate) struct EventSender(broadcast::Sender<Event>);

pub struct EventReceiver(broadcast::Receiver<Event>);

impl EventSender {
	pub(crate) fn new() -> (Self, EventReceiver) {
		let (sender, receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

		(Self(sender), EventReceiver(receiver))
	}

	pub(crate) fn subscribe(&self) -> EventReceiver {
		EventReceiver(self.0.subscribe())
	}

	/// Broadcasting is best-effort: a lagging or absent subscriber never
	/// blocks or fails the connection.
	pub(crate) fn emit(&self, event: Event) {
		let _ = self.0.send(event);
	}
}

impl EventReceiver {
	/// Awaits the next event, skipping over any this receiver lagged behind.
	pub async fn recv(&mut self) -> Option<Event> {
		loop {
			match self.0.recv().await {
				Ok(event) => return Some(event),
				Err(broadcast::error::RecvError::Lagged(_)) => continue,
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}
}
