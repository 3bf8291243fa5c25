use std::io::Error as IoError;

use fastwebsockets::{
	FragmentCollector, Frame as WsFrame, OpCode, Payload, Role, WebSocket as FastWebSocket,
	WebSocketError as FastWebSocketError,
};
use tokio::io::{AsyncRead, AsyncWrite};

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

const MESSAGE_SIZE_LIMIT: usize = 16 * 1024 * 1024;

// --------------------------------------------------
// AsyncIo

/// Anything that can carry a WebSocket connection once the handshake (server
/// upgrade or client dial) has completed.
pub(crate) trait AsyncIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncIo for T {}

type DynIo = Box<dyn AsyncIo>;

// --------------------------------------------------
// WebSocket

/// A WebSocket connection, already past the HTTP handshake, role-erased so the
/// peer engine can treat a server-accepted and a client-dialed socket alike.
pub(crate) struct WebSocket(FragmentCollector<DynIo>);

impl WebSocket {
	pub(crate) fn new(io: DynIo, role: Role) -> Self {
		let mut fws = FastWebSocket::after_handshake(io, role);
		fws.set_max_message_size(MESSAGE_SIZE_LIMIT);
		fws.set_auto_apply_mask(true);
		fws.set_auto_pong(true);
		fws.set_auto_close(false);

		Self(FragmentCollector::new(fws))
	}

	/// Receives a message. Returns `None` once the connection has closed.
	pub(crate) async fn receive(&mut self) -> Option<Result<Message, WebSocketError>> {
		match self.0.read_frame().await {
			Ok(frame) => match frame.opcode {
				OpCode::Text => match String::from_utf8(frame.payload.to_vec()) {
					Ok(text) => Some(Ok(Message::Text(text))),
					Err(_) => Some(Err(WebSocketError::InvalidUTF8)),
				},
				OpCode::Binary => Some(Ok(Message::Binary(frame.payload.to_vec()))),
				OpCode::Ping => Some(Ok(Message::Ping(frame.payload.to_vec()))),
				OpCode::Pong => Some(Ok(Message::Pong(frame.payload.to_vec()))),
				OpCode::Close => Some(Ok(Message::Close(CloseFrame::parse(&frame.payload)))),
				OpCode::Continuation => Some(Err(WebSocketError::InvalidContinuationFrame)),
			},
			Err(FastWebSocketError::ConnectionClosed) => None,
			Err(error) => Some(Err(error.into())),
		}
	}

	pub(crate) async fn send(&mut self, message: Message) -> Result<(), WebSocketError> {
		let frame = match message {
			Message::Text(text) => WsFrame::text(Payload::Owned(text.into())),
			Message::Binary(binary) => WsFrame::binary(Payload::Owned(binary)),
			Message::Ping(payload) => WsFrame::new(true, OpCode::Ping, None, Payload::Owned(payload)),
			Message::Pong(payload) => WsFrame::pong(Payload::Owned(payload)),
			Message::Close(some_close_frame) => {
				let (code, reason) = some_close_frame
					.map(|CloseFrame { code, reason }| (code, reason))
					.unwrap_or((rpc_core::CloseCode::_1000_Normal, String::new()));

				WsFrame::close(code.into(), reason.as_bytes())
			}
		};

		self.0.write_frame(frame).await.map_err(Into::into)
	}

	pub(crate) async fn close(&mut self, code: rpc_core::CloseCode, reason: &str) {
		let _ = self
			.send(Message::Close(Some(CloseFrame {
				code,
				reason: reason.to_owned(),
			})))
			.await;
	}
}

// --------------------------------------------------
// Message

#[derive(Debug)]
pub(crate) enum Message {
	Text(String),
	Binary(Vec<u8>),
	Ping(Vec<u8>),
	Pong(Vec<u8>),
	Close(Option<CloseFrame>),
}

#[derive(Debug, Clone)]
pub(crate) struct CloseFrame {
	pub(crate) code: rpc_core::CloseCode,
	pub(crate) reason: String,
}

impl CloseFrame {
	fn parse(payload: &[u8]) -> Option<CloseFrame> {
		if payload.len() < 2 {
			return None;
		}

		let code = u16::from_be_bytes([payload[0], payload[1]]);
		let reason = String::from_utf8_lossy(&payload[2..]).into_owned();

		Some(CloseFrame {
			code: code.into(),
			reason,
		})
	}
}

// --------------------------------------------------
// WebSocketError

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub(crate) enum WebSocketError {
	#[error("invalid fragment")]
	InvalidFragment,
	#[error("invalid UTF-8")]
	InvalidUTF8,
	#[error("invalid continuation frame")]
	InvalidContinuationFrame,
	#[error("invalid close frame")]
	InvalidCloseFrame,
	#[error("invalid close code")]
	InvalidCloseCode,
	#[error("unexpected EOF")]
	UnexpectedEOF,
	#[error("non-zero reserved bits")]
	NonZeroReservedBits,
	#[error("fragmented control frame")]
	FragmentedControlFrame,
	#[error("ping frame too large")]
	PingFrameTooLarge,
	#[error("message too large")]
	MessageTooLarge,
	#[error("invalid value")]
	InvalidValue,
	#[error(transparent)]
	Io(#[from] IoError),
	#[error(transparent)]
	Unexpected(Box<dyn std::error::Error + Send + Sync>),
}

impl From<FastWebSocketError> for WebSocketError {
	fn from(error: FastWebSocketError) -> Self {
		match error {
			FastWebSocketError::InvalidFragment => Self::InvalidFragment,
			FastWebSocketError::InvalidUTF8 => Self::InvalidUTF8,
			FastWebSocketError::InvalidContinuationFrame => Self::InvalidContinuationFrame,
			FastWebSocketError::InvalidCloseFrame => Self::InvalidCloseFrame,
			FastWebSocketError::InvalidCloseCode => Self::InvalidCloseCode,
			FastWebSocketError::UnexpectedEOF => Self::UnexpectedEOF,
			FastWebSocketError::ReservedBitsNotZero => Self::NonZeroReservedBits,
			FastWebSocketError::ControlFrameFragmented => Self::FragmentedControlFrame,
			FastWebSocketError::PingFrameTooLarge => Self::PingFrameTooLarge,
			FastWebSocketError::FrameTooLarge => Self::MessageTooLarge,
			FastWebSocketError::InvalidValue => Self::InvalidValue,
			FastWebSocketError::IoError(io_error) => Self::Io(io_error),
			other => Self::Unexpected(other.into()),
		}
	}
}
