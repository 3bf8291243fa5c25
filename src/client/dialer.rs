//! URL construction and the raw HTTP/1.1 upgrade handshake a dial performs
//! (§4.9, C9). No higher-level HTTP client is involved: a `wss://` endpoint
//! is out of scope (see `Non-goals`, §1), so this only ever opens a plain
//! TCP connection and speaks just enough HTTP/1.1 to complete the upgrade.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tokio::{
	io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf},
	net::TcpStream,
};
use url::Url;

use crate::{server::handshake, transport::Role};

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

/// Why a single connection attempt failed.
#[derive(Debug, crate::ImplError)]
pub(crate) enum ConnectError {
	#[error("invalid endpoint: {0}")]
	InvalidEndpoint(String),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error("{0}")]
	Handshake(String),
	/// One of the named fatal conditions from §4.9: retrying would only
	/// reproduce the same failure, so the reconnect loop gives up instead.
	#[error("{0}")]
	Fatal(&'static str),
}

impl ConnectError {
	pub(crate) fn is_fatal(&self) -> bool {
		matches!(self, ConnectError::Fatal(_))
	}
}

/// `endpoint + "/" + urlEncode(identity) + ("?" + query)?`, per §6's URL shape.
fn build_target(endpoint: &str, identity: &str, query: Option<&str>) -> Result<Url, ConnectError> {
	let mut url = Url::parse(endpoint).map_err(|error| ConnectError::InvalidEndpoint(error.to_string()))?;

	match url.scheme() {
		"ws" | "wss" => {}
		other => return Err(ConnectError::InvalidEndpoint(format!("unsupported scheme {other:?}"))),
	}

	if url.scheme() == "wss" {
		return Err(ConnectError::InvalidEndpoint("wss:// endpoints are not supported".to_owned()));
	}

	url
		.path_segments_mut()
		.map_err(|_| ConnectError::InvalidEndpoint("endpoint cannot be a base for relative segments".to_owned()))?
		.pop_if_empty()
		.push(identity);

	url.set_query(query);

	Ok(url)
}

fn generate_sec_websocket_key() -> String {
	thread_local! {
		static RNG: std::cell::RefCell<SmallRng> = std::cell::RefCell::new(SmallRng::from_entropy());
	}

	let bytes: [u8; 16] = RNG.with(|rng| rng.borrow_mut().gen());

	BASE64_STANDARD.encode(bytes)
}

fn build_request(url: &Url, key: &str, protocols: &[String], identity: &str, password: Option<&[u8]>) -> String {
	let host = url.host_str().unwrap_or("");
	let host_header = match url.port() {
		Some(port) => format!("{host}:{port}"),
		None => host.to_owned(),
	};

	let path_and_query = match url.query() {
		Some(query) => format!("{}?{query}", url.path()),
		None => url.path().to_owned(),
	};

	let mut request = format!(
		"GET {path_and_query} HTTP/1.1\r\n\
		 Host: {host_header}\r\n\
		 Upgrade: websocket\r\n\
		 Connection: Upgrade\r\n\
		 Sec-WebSocket-Key: {key}\r\n\
		 Sec-WebSocket-Version: 13\r\n"
	);

	if !protocols.is_empty() {
		request.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", protocols.join(", ")));
	}

	if let Some(password) = password {
		let mut credentials = Vec::with_capacity(identity.len() + 1 + password.len());
		credentials.extend_from_slice(identity.as_bytes());
		credentials.push(b':');
		credentials.extend_from_slice(password);

		request.push_str(&format!("Authorization: Basic {}\r\n", BASE64_STANDARD.encode(credentials)));
	}

	request.push_str("\r\n");

	request
}

/// Reads from `stream` until a full HTTP response head is buffered, parses it
/// with `httparse`, and returns `(status, lower-cased headers, leftover bytes
/// already read past the head)`.
async fn read_response_head(stream: &mut TcpStream) -> Result<(u16, HashMap<String, String>, Vec<u8>), ConnectError> {
	let mut buffer = Vec::with_capacity(1024);
	let mut chunk = [0u8; 1024];

	loop {
		let read = stream.read(&mut chunk).await?;

		if read == 0 {
			return Err(ConnectError::Handshake("connection closed before the upgrade response completed".to_owned()));
		}

		buffer.extend_from_slice(&chunk[..read]);

		if buffer.len() > 16 * 1024 {
			return Err(ConnectError::Handshake("upgrade response head too large".to_owned()));
		}

		let mut header_storage = [httparse::EMPTY_HEADER; 32];
		let mut response = httparse::Response::new(&mut header_storage);

		match response.parse(&buffer) {
			Ok(httparse::Status::Complete(head_len)) => {
				let status = response.code.unwrap_or(0);
				let headers = response
					.headers
					.iter()
					.map(|header| (header.name.to_ascii_lowercase(), String::from_utf8_lossy(header.value).into_owned()))
					.collect();
				let leftover = buffer[head_len..].to_vec();

				return Ok((status, headers, leftover));
			}
			Ok(httparse::Status::Partial) => continue,
			Err(error) => return Err(ConnectError::Handshake(error.to_string())),
		}
	}
}

/// Completes one connection attempt: opens the TCP socket, performs the
/// upgrade handshake, and classifies the server's response. Returns the
/// negotiated subprotocol (`None` means the server didn't pick one, which is
/// only acceptable when nothing was offered).
pub(crate) async fn connect_once(
	endpoint: &str,
	identity: &str,
	query: Option<&str>,
	password: Option<&[u8]>,
	offered_protocols: &[String],
) -> Result<(crate::transport::WebSocket, Option<String>), ConnectError> {
	let url = build_target(endpoint, identity, query)?;
	let host = url.host_str().ok_or_else(|| ConnectError::InvalidEndpoint("endpoint has no host".to_owned()))?;
	let port = url.port_or_known_default().unwrap_or(80);

	let mut stream = TcpStream::connect((host, port)).await?;
	stream.set_nodelay(true).ok();

	let key = generate_sec_websocket_key();
	let request = build_request(&url, &key, offered_protocols, identity, password);
	stream.write_all(request.as_bytes()).await?;

	let (status, headers, leftover) = read_response_head(&mut stream).await?;

	if status != 101 {
		return Err(ConnectError::Handshake(format!("server responded with HTTP status {status}")));
	}

	let accept = headers
		.get("sec-websocket-accept")
		.ok_or_else(|| ConnectError::Fatal("Invalid Sec-WebSocket-Accept header"))?;

	if *accept != handshake::accept_value(key.as_bytes()) {
		return Err(ConnectError::Fatal("Invalid Sec-WebSocket-Accept header"));
	}

	let selected_protocol = headers.get("sec-websocket-protocol").cloned();

	match (&selected_protocol, offered_protocols.is_empty()) {
		(None, false) => return Err(ConnectError::Fatal("Server sent no subprotocol")),
		(Some(protocol), false) if !offered_protocols.iter().any(|offered| offered == protocol) => {
			return Err(ConnectError::Fatal("Server sent an invalid subprotocol"));
		}
		(Some(_), true) => return Err(ConnectError::Fatal("Server sent a subprotocol but none was requested")),
		_ => {}
	}

	let io = RewindStream::new(leftover, stream);
	let websocket = crate::transport::WebSocket::new(Box::new(io), Role::Client);

	Ok((websocket, selected_protocol))
}

// --------------------------------------------------------------------------------
// RewindStream

/// Replays bytes already read off the wire while probing the HTTP response
/// head, then falls through to the live socket. Needed because the upgrade
/// response is read with a plain buffered loop, which can overshoot into the
/// first WebSocket frame.
struct RewindStream {
	leftover: Vec<u8>,
	position: usize,
	inner: TcpStream,
}

impl RewindStream {
	fn new(leftover: Vec<u8>, inner: TcpStream) -> Self {
		Self { leftover, position: 0, inner }
	}
}

impl AsyncRead for RewindStream {
	fn poll_read(
		mut self: std::pin::Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> std::task::Poll<std::io::Result<()>> {
		if self.position < self.leftover.len() {
			let remaining = &self.leftover[self.position..];
			let take = remaining.len().min(buf.remaining());
			buf.put_slice(&remaining[..take]);
			self.position += take;

			return std::task::Poll::Ready(Ok(()));
		}

		std::pin::Pin::new(&mut self.inner).poll_read(cx, buf)
	}
}

impl AsyncWrite for RewindStream {
	fn poll_write(
		mut self: std::pin::Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
		buf: &[u8],
	) -> std::task::Poll<std::io::Result<usize>> {
		std::pin::Pin::new(&mut self.inner).poll_write(cx, buf)
	}

	fn poll_flush(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
		std::pin::Pin::new(&mut self.inner).poll_flush(cx)
	}

	fn poll_shutdown(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
		std::pin::Pin::new(&mut self.inner).poll_shutdown(cx)
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn builds_a_target_url_with_an_encoded_identity_and_query() {
		let url = build_target("ws://h:9000/ocpp", "dev 1", Some("v=2")).unwrap();
		assert_eq!(url.as_str(), "ws://h:9000/ocpp/dev%201?v=2");
	}

	#[test]
	fn rejects_a_wss_endpoint() {
		let error = build_target("wss://h/ocpp", "dev1", None).unwrap_err();
		assert!(matches!(error, ConnectError::InvalidEndpoint(_)));
	}

	#[test]
	fn request_carries_basic_auth_with_a_colon_in_the_password() {
		let url = build_target("ws://h/ocpp", "dev:1", None).unwrap();
		let request = build_request(&url, "dGhlIHNhbXBsZSBub25jZQ==", &[], "dev:1", Some(b"p:q"));

		let expected = BASE64_STANDARD.encode(b"dev:1:p:q");
		assert!(request.contains(&format!("Authorization: Basic {expected}")));
	}

	#[test]
	fn request_omits_the_protocol_header_when_none_are_offered() {
		let url = build_target("ws://h/ocpp", "dev1", None).unwrap();
		let request = build_request(&url, "dGhlIHNhbXBsZSBub25jZQ==", &[], "dev1", None);
		assert!(!request.contains("Sec-WebSocket-Protocol"));
	}
}
