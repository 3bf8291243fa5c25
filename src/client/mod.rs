//! The client side of this system: dials an endpoint, performs the upgrade
//! handshake, and keeps reconnecting with backoff until told to stop (§4.9, C9).

mod dialer;

use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use rpc_core::{CallError, CloseCode, Json};
use tokio::sync::{oneshot, watch};

use crate::{
	common::CancelSignal,
	events::{Event, EventReceiver, EventSender},
	peer::{self, CloseOptions, Peer, PeerConfig, Router, RouterBuilder},
	validator::{self, StrictMode, StrictModeConfigError, ValidatorRegistry},
};

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

/// The decorrelated-jitter exponential backoff schedule the reconnect loop uses.
#[derive(Debug, Clone)]
pub struct Backoff {
	pub initial_delay: Duration,
	pub max_delay: Duration,
	pub factor: f64,
	pub randomisation_factor: f64,
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			initial_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(30),
			factor: 2.0,
			randomisation_factor: 0.25,
		}
	}
}

impl Backoff {
	/// `delay_n = min(maxDelay, initialDelay · factor^(n-1))`, perturbed by
	/// `± randomisationFactor`. `attempt` is 1-based.
	fn delay_for(&self, attempt: u32, rng: &mut SmallRng) -> Duration {
		let exponent = attempt.saturating_sub(1) as i32;
		let nominal = (self.initial_delay.as_secs_f64() * self.factor.powi(exponent)).min(self.max_delay.as_secs_f64());
		let jitter_span = nominal * self.randomisation_factor;
		let jitter = if jitter_span > 0.0 { rng.gen_range(-jitter_span..=jitter_span) } else { 0.0 };

		Duration::from_secs_f64((nominal + jitter).max(0.0))
	}
}

// --------------------------------------------------------------------------------
// ClientConfig

/// Settings for one dialed connection, including the reconnect policy.
pub struct ClientConfig {
	/// `scheme://host[:port][/prefix]`; `identity` is appended as the final
	/// path segment on every dial (§6).
	pub endpoint: String,
	pub identity: String,
	pub query: Option<String>,
	/// Sent as HTTP Basic auth (`identity:password`) on every dial.
	pub password: Option<Vec<u8>>,
	/// Subprotocols offered on the first dial, most preferred first. Pinned to
	/// the negotiated one after the first successful connect.
	pub protocols: Vec<String>,
	pub peer_config: PeerConfig,
	pub validators: ValidatorRegistry,
	pub strict_mode: StrictMode,
	pub reconnect: bool,
	pub max_reconnects: Option<u32>,
	pub backoff: Backoff,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			endpoint: String::new(),
			identity: String::new(),
			query: None,
			password: None,
			protocols: Vec::new(),
			peer_config: PeerConfig::default(),
			validators: ValidatorRegistry::new(),
			strict_mode: StrictMode::Disabled,
			reconnect: true,
			max_reconnects: None,
			backoff: Backoff::default(),
		}
	}
}

// --------------------------------------------------------------------------------
// Client

/// Dials `config.endpoint` and keeps the connection alive, reconnecting on
/// unexpected disconnects until [`Client::close`] is called or the reconnect
/// budget is exhausted.
pub struct Client {
	config: Arc<ClientConfig>,
	router: Arc<Router>,
	current: watch::Sender<Option<Peer>>,
	events: EventSender,
	started: Arc<AtomicBool>,
	shutdown: CancelSignal,
}

impl Client {
	pub fn new(config: ClientConfig, routes: RouterBuilder) -> Result<Self, StrictModeConfigError> {
		validator::check_strict_mode_configured(&config.strict_mode, &config.protocols, &config.validators)?;

		let (events, _first_subscriber) = EventSender::new();
		let (current, _first_current) = watch::channel(None);

		Ok(Self {
			config: Arc::new(config),
			router: Arc::new(routes.build()),
			current,
			events,
			started: Arc::new(AtomicBool::new(false)),
			shutdown: CancelSignal::new(),
		})
	}

	pub fn identity(&self) -> &str {
		&self.config.identity
	}

	pub fn subscribe(&self) -> EventReceiver {
		self.events.subscribe()
	}

	pub fn is_open(&self) -> bool {
		self.current.borrow().as_ref().is_some_and(Peer::is_open)
	}

	/// Dials the endpoint and resolves once the first attempt either
	/// completes the upgrade or fails fatally. Further disconnects are then
	/// handled by a background reconnect loop the caller does not need to
	/// drive itself.
	pub async fn connect(&self) -> Result<(), CallError> {
		if self.started.swap(true, Ordering::SeqCst) {
			return Err(CallError::generic("already connected or connecting"));
		}

		let (ready_tx, ready_rx) = oneshot::channel();

		let driver = ClientDriver {
			config: self.config.clone(),
			router: self.router.clone(),
			events: self.events.clone(),
			current: self.current.clone(),
			shutdown: self.shutdown.clone(),
		};

		tokio::spawn(driver.run(ready_tx));

		ready_rx.await.unwrap_or_else(|_| Err(CallError::disconnected()))
	}

	pub async fn call(&self, method: impl Into<String>, params: Json) -> Result<Json, CallError> {
		self.peer()?.call(method, params).await
	}

	pub async fn call_with_timeout(
		&self,
		method: impl Into<String>,
		params: Json,
		timeout: Duration,
	) -> Result<Json, CallError> {
		self.peer()?.call_with_timeout(method, params, timeout).await
	}

	pub async fn call_no_reply(&self, method: impl Into<String>, params: Json) -> Result<(), CallError> {
		self.peer()?.call_no_reply(method, params).await
	}

	fn peer(&self) -> Result<Peer, CallError> {
		self.current.borrow().clone().ok_or_else(CallError::disconnected)
	}

	/// Stops the reconnect loop and closes the current connection, if any.
	pub async fn close(&self, options: CloseOptions) -> (CloseCode, String) {
		self.shutdown.cancel();

		match self.current.borrow().clone() {
			Some(peer) => peer.close(options).await,
			None => (options.code, options.reason),
		}
	}
}

// --------------------------------------------------------------------------------
// ClientDriver

/// Owns the reconnect loop: dials, hands the connection to a [`Peer`], waits
/// for it to end, and decides whether and when to try again.
struct ClientDriver {
	config: Arc<ClientConfig>,
	router: Arc<Router>,
	events: EventSender,
	current: watch::Sender<Option<Peer>>,
	shutdown: CancelSignal,
}

impl ClientDriver {
	async fn run(self, ready: oneshot::Sender<Result<(), CallError>>) {
		let mut ready = Some(ready);
		let mut offered = self.config.protocols.clone();
		let mut pinned = false;
		let mut attempt = 0u32;
		let mut rng = SmallRng::from_entropy();

		loop {
			if self.shutdown.is_cancelled() {
				break;
			}

			attempt += 1;
			self.events.emit(Event::Connecting);

			let attempt_result = dialer::connect_once(
				&self.config.endpoint,
				&self.config.identity,
				self.config.query.as_deref(),
				self.config.password.as_deref(),
				&offered,
			)
			.await;

			match attempt_result {
				Ok((websocket, selected_protocol)) => {
					attempt = 0;

					if !pinned {
						if let Some(protocol) = &selected_protocol {
							offered = vec![protocol.clone()];
						}

						pinned = true;
					}

					let strict = self.config.strict_mode.requires(selected_protocol.as_deref().unwrap_or(""));
					let validator = selected_protocol
						.as_deref()
						.filter(|_| strict)
						.and_then(|protocol| self.config.validators.get(protocol));

					let peer = peer::spawn(
						websocket,
						Some(self.config.identity.clone()),
						selected_protocol,
						self.config.peer_config.clone(),
						(*self.router).clone(),
						validator,
					);

					self.events.emit(Event::Client {
						identity: self.config.identity.clone(),
						remote_address: None,
					});
					let _ = self.current.send(Some(peer.clone()));

					if let Some(sender) = ready.take() {
						let _ = sender.send(Ok(()));
					}

					self.await_peer_close(&peer).await;
					let _ = self.current.send(None);

					if self.shutdown.is_cancelled() || !self.config.reconnect {
						break;
					}
				}
				Err(error) => {
					tracing::warn!(%error, "connect attempt failed");

					if let Some(sender) = ready.take() {
						let _ = sender.send(Err(CallError::generic(error.to_string())));
					}

					self.events.emit(Event::Error(Arc::new(CallError::generic(error.to_string()))));

					if error.is_fatal() {
						self.give_up();

						break;
					}

					if !self.config.reconnect {
						break;
					}
				}
			}

			if let Some(max) = self.config.max_reconnects {
				if attempt >= max {
					self.give_up();

					break;
				}
			}

			let delay = self.config.backoff.delay_for(attempt.max(1), &mut rng);

			tokio::select! {
				_ = tokio::time::sleep(delay) => {}
				_ = self.shutdown.cancelled() => break,
			}
		}
	}

	async fn await_peer_close(&self, peer: &Peer) {
		let mut peer_events = peer.subscribe();

		loop {
			match peer_events.recv().await {
				Some(event @ Event::Close { .. }) => {
					self.events.emit(event);

					break;
				}
				Some(_) => continue,
				None => break,
			}
		}
	}

	fn give_up(&self) {
		self.events.emit(Event::Close {
			code: CloseCode::_1001_GoingAway,
			reason: "Giving up".to_owned(),
		});
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn backoff_delay_grows_with_attempt_and_respects_the_ceiling() {
		let backoff = Backoff {
			initial_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(10),
			factor: 2.0,
			randomisation_factor: 0.0,
		};
		let mut rng = SmallRng::seed_from_u64(0);

		assert_eq!(backoff.delay_for(1, &mut rng), Duration::from_secs(1));
		assert_eq!(backoff.delay_for(2, &mut rng), Duration::from_secs(2));
		assert_eq!(backoff.delay_for(3, &mut rng), Duration::from_secs(4));
		assert_eq!(backoff.delay_for(5, &mut rng), Duration::from_secs(10));
		assert_eq!(backoff.delay_for(10, &mut rng), Duration::from_secs(10));
	}

	#[test]
	fn client_with_no_connection_rejects_calls_as_disconnected() {
		let client = Client::new(ClientConfig::default(), RouterBuilder::new()).unwrap();
		assert!(client.peer().is_err());
		assert!(!client.is_open());
	}

	#[test]
	fn client_new_fails_when_strict_mode_has_no_validator() {
		let config = ClientConfig {
			strict_mode: StrictMode::All,
			protocols: vec!["ocpp1.6".into()],
			..Default::default()
		};

		assert!(Client::new(config, RouterBuilder::new()).is_err());
	}
}
