//! The HTTP→WebSocket upgrade handshake (§4.8, C8).
//!
//! Parsing and auth happen entirely against a [`HandshakeRecord`] before any
//! [`crate::peer::Peer`] exists; a rejected handshake never reaches the peer
//! engine at all.

use std::{future::Future, net::SocketAddr, pin::Pin, sync::Arc};

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use http::{
	header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION, UPGRADE},
	HeaderMap, Request,
};
use percent_encoding::percent_decode_str;
use rpc_core::Json;
use sha1::{Digest, Sha1};

use crate::common::{CancelSignal, ReplyOnce};

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Everything known about an inbound upgrade from the first byte of the
/// request until it is either promoted to a peer or aborted.
#[derive(Debug, Clone)]
pub struct HandshakeRecord {
	pub identity: String,
	pub remote_address: Option<SocketAddr>,
	pub headers: HeaderMap,
	pub requested_protocols: Vec<String>,
	pub selected_protocol: Option<String>,
	pub endpoint_path: String,
	pub query: Option<String>,
	/// Present only when an `Authorization: Basic` header parsed successfully
	/// against the expected `identity:` prefix. Kept as raw bytes: the
	/// password portion of Basic auth is an arbitrary byte string.
	pub password: Option<Vec<u8>>,
}

/// Why an upgrade never made it to a [`crate::peer::Peer`].
#[derive(Debug, Clone, crate::ImplError)]
pub enum HandshakeError {
	#[error("request method is not GET")]
	NotGet,
	#[error("invalid Connection header")]
	InvalidConnectionHeader,
	#[error("invalid Upgrade header")]
	InvalidUpgradeHeader,
	#[error("invalid Sec-WebSocket-Version")]
	InvalidSecWebSocketVersion,
	#[error("missing Sec-WebSocket-Key")]
	MissingSecWebSocketKey,
	#[error("rejected by auth callback: {message}")]
	Rejected { status: u16, message: String },
	#[error("requested subprotocol set did not include the one the auth callback selected")]
	ProtocolNotRequested,
	#[error("connection lost during authentication")]
	AuthTransportLost,
}

impl HandshakeError {
	/// The HTTP status this failure should be reported with, absent a more
	/// specific one from an explicit `reject(status, ..)` call.
	pub fn status_code(&self) -> u16 {
		match self {
			HandshakeError::Rejected { status, .. } => *status,
			_ => 400,
		}
	}
}

/// Parses the upgrade request into a [`HandshakeRecord`], or fails before any
/// auth callback runs.
pub(crate) fn parse<B>(
	request: &Request<B>,
	remote_address: Option<SocketAddr>,
) -> Result<HandshakeRecord, HandshakeError> {
	if request.method() != http::Method::GET {
		return Err(HandshakeError::NotGet);
	}

	let headers = request.headers();

	let connection_ok = headers
		.get(CONNECTION)
		.and_then(|value| value.to_str().ok())
		.is_some_and(|value| value.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade")));

	if !connection_ok {
		return Err(HandshakeError::InvalidConnectionHeader);
	}

	if !headers
		.get(UPGRADE)
		.is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"websocket"))
	{
		return Err(HandshakeError::InvalidUpgradeHeader);
	}

	if !headers
		.get(SEC_WEBSOCKET_VERSION)
		.is_some_and(|value| value.as_bytes() == b"13")
	{
		return Err(HandshakeError::InvalidSecWebSocketVersion);
	}

	if headers.get(SEC_WEBSOCKET_KEY).is_none() {
		return Err(HandshakeError::MissingSecWebSocketKey);
	}

	let requested_protocols = headers
		.get(SEC_WEBSOCKET_PROTOCOL)
		.and_then(|value| value.to_str().ok())
		.map(|value| value.split(',').map(|token| token.trim().to_owned()).collect())
		.unwrap_or_default();

	let path = request.uri().path();
	let (endpoint_path, identity) = split_identity_from_path(path);
	let query = request.uri().query().map(str::to_owned);
	let password = parse_basic_auth(headers, &identity);

	Ok(HandshakeRecord {
		identity,
		remote_address,
		headers: headers.clone(),
		requested_protocols,
		selected_protocol: None,
		endpoint_path,
		query,
		password,
	})
}

/// Splits `/a/b/My%20Charger` into (`endpoint = "/a/b"`, `identity = "My Charger"`).
fn split_identity_from_path(path: &str) -> (String, String) {
	let trimmed = path.trim_end_matches('/');
	let (endpoint, last_segment) = match trimmed.rsplit_once('/') {
		Some((rest, segment)) => (rest, segment),
		None => ("", trimmed),
	};

	let identity = percent_decode_str(last_segment).decode_utf8_lossy().into_owned();
	let endpoint = if endpoint.is_empty() { "/".to_owned() } else { endpoint.to_owned() };

	(endpoint, identity)
}

/// Decodes `Authorization: Basic <b64>` against the `identity:` prefix this
/// connection already committed to, per §4.8 step 4. Parse failures are
/// non-fatal; they just leave `password` unset.
fn parse_basic_auth(headers: &HeaderMap, identity: &str) -> Option<Vec<u8>> {
	let header_value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
	let encoded = header_value.strip_prefix("Basic ")?;
	let decoded = BASE64_STANDARD.decode(encoded).ok()?;

	let prefix = format!("{identity}:");
	decoded.strip_prefix(prefix.as_bytes()).map(<[u8]>::to_vec)
}

/// The value for `Sec-WebSocket-Accept`, computed from the client's key.
pub(crate) fn accept_value(key: &[u8]) -> String {
	let mut sha1 = Sha1::new();
	sha1.update(key);
	sha1.update(WEBSOCKET_GUID.as_bytes());

	BASE64_STANDARD.encode(sha1.finalize())
}

/// Picks the subprotocol to report back to the client, per §4.8 step 8.
pub(crate) fn negotiate_protocol(
	requested: &[String],
	server_preference: &[String],
	explicit: Option<&str>,
) -> Result<Option<String>, HandshakeError> {
	if let Some(protocol) = explicit {
		return if requested.iter().any(|candidate| candidate == protocol) {
			Ok(Some(protocol.to_owned()))
		} else {
			Err(HandshakeError::ProtocolNotRequested)
		};
	}

	Ok(server_preference
		.iter()
		.find(|preferred| requested.iter().any(|candidate| candidate == *preferred))
		.cloned())
}

// --------------------------------------------------------------------------------
// Auth callback

/// What an auth callback decided, via [`AuthControl::accept`] or [`AuthControl::reject`].
#[derive(Debug, Clone)]
pub(crate) enum AuthDecision {
	Accept {
		session: Option<Json>,
		protocol: Option<String>,
	},
	Reject {
		status: Option<u16>,
		message: Option<String>,
	},
}

/// Passed to an auth callback so it can resolve the handshake exactly once.
#[derive(Clone)]
pub struct AuthControl(ReplyOnce<AuthDecision>);

impl AuthControl {
	pub fn accept(&self, session: Option<Json>, protocol: Option<String>) {
		self.0.send(AuthDecision::Accept { session, protocol });
	}

	pub fn reject(&self, status: Option<u16>, message: Option<String>) {
		self.0.send(AuthDecision::Reject { status, message });
	}
}

type AuthFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked once per upgrade with `(handshake, control, cancellation)`.
/// Exactly one of [`AuthControl::accept`]/[`AuthControl::reject`] takes
/// effect; later calls are ignored.
pub type AuthCallback =
	Arc<dyn Fn(HandshakeRecord, AuthControl, CancelSignal) -> AuthFuture + Send + Sync>;

/// Runs `callback` (if any) against `handshake`, auto-accepting when there is
/// none, per §4.8 steps 6-7.
pub(crate) async fn authenticate(
	callback: Option<&AuthCallback>,
	handshake: HandshakeRecord,
) -> Result<(Option<Json>, Option<String>), HandshakeError> {
	let Some(callback) = callback else {
		return Ok((None, None));
	};

	let (control, receiver) = ReplyOnce::new();
	let cancel = CancelSignal::new();

	callback(handshake, AuthControl(control), cancel).await;

	match receiver.await {
		Ok(AuthDecision::Accept { session, protocol }) => Ok((session, protocol)),
		Ok(AuthDecision::Reject { status, message }) => {
			let status = status.unwrap_or(401);
			let message = message.unwrap_or_else(|| format!("rejected with status {status}"));

			Err(HandshakeError::Rejected { status, message })
		}
		Err(_) => Err(HandshakeError::AuthTransportLost),
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn splits_identity_from_a_nested_path() {
		let (endpoint, identity) = split_identity_from_path("/ocpp/1.6/My%20Charger");
		assert_eq!(endpoint, "/ocpp/1.6");
		assert_eq!(identity, "My Charger");
	}

	#[test]
	fn splits_identity_from_a_bare_path() {
		let (endpoint, identity) = split_identity_from_path("/CP001");
		assert_eq!(endpoint, "/");
		assert_eq!(identity, "CP001");
	}

	#[test]
	fn parses_basic_auth_with_a_binary_password() {
		let mut headers = HeaderMap::new();
		let credentials = BASE64_STANDARD.encode(b"CP001:\xff\x00binary");
		headers.insert(
			http::header::AUTHORIZATION,
			format!("Basic {credentials}").parse().unwrap(),
		);

		let password = parse_basic_auth(&headers, "CP001").unwrap();
		assert_eq!(password, b"\xff\x00binary");
	}

	#[test]
	fn basic_auth_is_unset_on_username_mismatch() {
		let mut headers = HeaderMap::new();
		let credentials = BASE64_STANDARD.encode(b"SomeoneElse:secret");
		headers.insert(
			http::header::AUTHORIZATION,
			format!("Basic {credentials}").parse().unwrap(),
		);

		assert!(parse_basic_auth(&headers, "CP001").is_none());
	}

	#[test]
	fn accept_value_matches_the_known_rfc6455_example() {
		assert_eq!(
			accept_value(b"dGhlIHNhbXBsZSBub25jZQ=="),
			"s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
		);
	}

	#[test]
	fn negotiate_protocol_picks_first_server_preference_present_in_request() {
		let requested = vec!["ocpp1.6".to_owned(), "ocpp2.0.1".to_owned()];
		let preference = vec!["ocpp2.0.1".to_owned(), "ocpp1.6".to_owned()];

		let selected = negotiate_protocol(&requested, &preference, None).unwrap();
		assert_eq!(selected, Some("ocpp2.0.1".to_owned()));
	}

	#[test]
	fn negotiate_protocol_rejects_an_explicit_choice_not_requested() {
		let requested = vec!["ocpp1.6".to_owned()];
		let error = negotiate_protocol(&requested, &[], Some("ocpp2.0.1")).unwrap_err();
		assert!(matches!(error, HandshakeError::ProtocolNotRequested));
	}
}
