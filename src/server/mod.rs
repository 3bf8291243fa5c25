//! The server side of this system: accepts WebSocket upgrades and promotes
//! each one to a [`crate::peer::Peer`] (§4.8, C8; §2, C10).

pub(crate) mod handshake;
mod registry;

pub use handshake::{AuthCallback, AuthControl, HandshakeError, HandshakeRecord};

use std::{convert::Infallible, net::SocketAddr, pin::pin, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
	rt::{TokioExecutor, TokioIo},
	server::{conn::auto::Builder as ConnectionBuilder, graceful::GracefulShutdown},
};
use rpc_core::CloseCode;
use tokio::net::TcpListener;

use crate::{
	events::{Event, EventReceiver, EventSender},
	peer::{self, CloseOptions, PeerConfig, Router, RouterBuilder},
	validator::{self, StrictMode, StrictModeConfigError, ValidatorRegistry},
};

use registry::Registry;

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

/// Server-wide settings, shared by every connection it accepts.
pub struct ServerConfig {
	/// Subprotocols this server offers, most preferred first. Used when the
	/// auth callback doesn't pick one explicitly.
	pub protocols: Vec<String>,
	pub peer_config: PeerConfig,
	pub validators: ValidatorRegistry,
	pub strict_mode: StrictMode,
	pub auth_callback: Option<AuthCallback>,
	/// How long [`Server::shutdown`] waits for in-flight peers to close
	/// gracefully before the listener's own accept loop is abandoned.
	pub shutdown_grace_period: Duration,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			protocols: Vec::new(),
			peer_config: PeerConfig::default(),
			validators: ValidatorRegistry::new(),
			strict_mode: StrictMode::Disabled,
			auth_callback: None,
			shutdown_grace_period: Duration::from_secs(10),
		}
	}
}

fn server_header_value() -> String {
	format!("ocpp-rpc/{} ({})", env!("CARGO_PKG_VERSION"), std::env::consts::OS)
}

// --------------------------------------------------------------------------------
// Server

/// Accepts WebSocket upgrades on a TCP listener and promotes each one to a peer.
pub struct Server {
	config: Arc<ServerConfig>,
	router: Arc<Router>,
	registry: Arc<Registry>,
	events: EventSender,
}

impl Server {
	pub fn new(config: ServerConfig, routes: RouterBuilder) -> Result<Self, StrictModeConfigError> {
		validator::check_strict_mode_configured(&config.strict_mode, &config.protocols, &config.validators)?;

		let (events, _first_subscriber) = EventSender::new();

		Ok(Self {
			config: Arc::new(config),
			router: Arc::new(routes.build()),
			registry: Registry::new(),
			events,
		})
	}

	pub fn subscribe(&self) -> EventReceiver {
		self.events.subscribe()
	}

	pub fn connected_peer_count(&self) -> usize {
		self.registry.len()
	}

	/// Closes every currently-connected peer; peers that connect afterward
	/// are unaffected (§2, C10).
	pub async fn close_all_peers(&self, options: CloseOptions) {
		self.registry.close_all(options).await;
	}

	/// Binds `address` and serves upgrade requests until `ctrl_c` or, on
	/// Unix, `SIGTERM`.
	pub async fn serve(&self, address: impl Into<SocketAddr>) -> Result<(), ServerError> {
		let listener = TcpListener::bind(address.into()).await?;
		let connection_builder = ConnectionBuilder::new(TokioExecutor::new());
		let graceful = GracefulShutdown::new();

		let mut pinned_ctrl_c = pin!(tokio::signal::ctrl_c());

		#[cfg(unix)]
		let mut terminate_signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler");
		#[cfg(unix)]
		let mut pinned_terminate = pin!(terminate_signal.recv());
		#[cfg(not(unix))]
		let mut pinned_terminate = pin!(std::future::pending::<Option<()>>());

		let mut accept_error_count = 0u32;

		loop {
			tokio::select! {
				accepted = listener.accept() => {
					match accepted {
						Ok((stream, remote_address)) => {
							accept_error_count = 0;

							let io = TokioIo::new(stream);
							let config = self.config.clone();
							let router = self.router.clone();
							let registry = self.registry.clone();
							let events = self.events.clone();

							let service = service_fn(move |request: Request<Incoming>| {
								handle_request(
									request,
									remote_address,
									config.clone(),
									router.clone(),
									registry.clone(),
									events.clone(),
								)
							});

							let connection = connection_builder.serve_connection_with_upgrades(io, service);
							let connection = graceful.watch(connection.into_owned());

							tokio::spawn(connection);
						}
						Err(error) => {
							accept_error_count += 1;
							tokio::time::sleep(Duration::from_secs(1)).await;

							if accept_error_count >= 3 {
								return Err(ServerError::from(error));
							}
						}
					}
				}
				_ = pinned_ctrl_c.as_mut() => break,
				_ = pinned_terminate.as_mut() => break,
			}
		}

		tokio::select! {
			_ = graceful.shutdown() => {}
			_ = tokio::time::sleep(self.config.shutdown_grace_period) => {}
		}

		Ok(())
	}
}

type ResponseBody = BoxBody<Bytes, Infallible>;

fn empty_body() -> ResponseBody {
	Empty::new().map_err(|never| match never {}).boxed()
}

fn full_body(text: String) -> ResponseBody {
	Full::new(Bytes::from(text)).map_err(|never| match never {}).boxed()
}

async fn handle_request(
	mut request: Request<Incoming>,
	remote_address: SocketAddr,
	config: Arc<ServerConfig>,
	router: Arc<Router>,
	registry: Arc<Registry>,
	events: EventSender,
) -> Result<Response<ResponseBody>, Infallible> {
	let handshake = match handshake::parse(&request, Some(remote_address)) {
		Ok(handshake) => handshake,
		Err(error @ handshake::HandshakeError::NotGet) => {
			return Ok(not_found_response(error));
		}
		Err(error) => {
			events.emit(Event::UpgradeAborted {
				identity: None,
				reason: error.to_string(),
			});

			return Ok(error_response(error.status_code(), &error.to_string()));
		}
	};

	let identity = handshake.identity.clone();
	let requested_protocols = handshake.requested_protocols.clone();
	let sec_websocket_key = request
		.headers()
		.get(http::header::SEC_WEBSOCKET_KEY)
		.map(|value| value.as_bytes().to_vec());

	let (session, explicit_protocol) = match handshake::authenticate(config.auth_callback.as_ref(), handshake).await {
		Ok(outcome) => outcome,
		Err(error) => {
			events.emit(Event::UpgradeAborted {
				identity: Some(identity),
				reason: error.to_string(),
			});

			return Ok(error_response(error.status_code(), &error.to_string()));
		}
	};

	let selected_protocol =
		match handshake::negotiate_protocol(&requested_protocols, &config.protocols, explicit_protocol.as_deref()) {
			Ok(protocol) => protocol,
			Err(error) => {
				events.emit(Event::UpgradeAborted {
					identity: Some(identity),
					reason: error.to_string(),
				});

				return Ok(error_response(error.status_code(), &error.to_string()));
			}
		};

	let Some(sec_websocket_key) = sec_websocket_key else {
		let error = handshake::HandshakeError::MissingSecWebSocketKey;
		events.emit(Event::UpgradeAborted {
			identity: Some(identity),
			reason: error.to_string(),
		});

		return Ok(error_response(error.status_code(), &error.to_string()));
	};

	let accept_value = handshake::accept_value(&sec_websocket_key);

	let mut response = Response::builder()
		.status(StatusCode::SWITCHING_PROTOCOLS)
		.header(http::header::CONNECTION, "Upgrade")
		.header(http::header::UPGRADE, "websocket")
		.header(http::header::SEC_WEBSOCKET_ACCEPT, accept_value)
		.header(http::header::SERVER, server_header_value());

	if let Some(protocol) = &selected_protocol {
		response = response.header(http::header::SEC_WEBSOCKET_PROTOCOL, protocol);
	}

	let response = response.body(empty_body()).expect("a valid upgrade response always builds");

	let on_upgrade = hyper::upgrade::on(&mut request);
	let strict = config.strict_mode.requires(selected_protocol.as_deref().unwrap_or(""));
	let validator = selected_protocol.as_deref().filter(|_| strict).and_then(|protocol| config.validators.get(protocol));
	let peer_config = config.peer_config.clone();
	let _ = session;

	tokio::spawn(async move {
		match on_upgrade.await {
			Ok(upgraded) => {
				let io = TokioIo::new(upgraded);
				let websocket = crate::transport::WebSocket::new(Box::new(io), crate::transport::Role::Server);

				let peer = peer::spawn(
					websocket,
					Some(identity.clone()),
					selected_protocol,
					peer_config,
					(*router).clone(),
					validator,
				);

				let peer_id = registry.register(peer.clone());
				events.emit(Event::Client {
					identity,
					remote_address: Some(remote_address),
				});

				let mut peer_events = peer.subscribe();
				let cleanup_registry = registry.clone();
				tokio::spawn(async move {
					while let Some(event) = peer_events.recv().await {
						if matches!(event, Event::Close { .. }) {
							break;
						}
					}

					cleanup_registry.unregister(peer_id);
				});
			}
			Err(error) => {
				events.emit(Event::UpgradeAborted {
					identity: Some(identity),
					reason: error.to_string(),
				});
			}
		}
	});

	Ok(response)
}

fn error_response(status: u16, message: &str) -> Response<ResponseBody> {
	Response::builder()
		.status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST))
		.header(http::header::SERVER, server_header_value())
		.header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
		.body(full_body(message.to_owned()))
		.expect("a valid status and headers always build a response")
}

fn not_found_response(error: handshake::HandshakeError) -> Response<ResponseBody> {
	let _ = error;

	Response::builder()
		.status(StatusCode::NOT_FOUND)
		.header(http::header::SERVER, server_header_value())
		.body(empty_body())
		.expect("a valid status and headers always build a response")
}

// --------------------------------------------------------------------------------
// ServerError

#[derive(Debug, crate::ImplError)]
#[error(transparent)]
pub struct ServerError(#[from] std::io::Error);
