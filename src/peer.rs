//! The peer engine (§4.7, C7).
//!
//! A [`Peer`] is a cheaply-cloneable handle to a single connection's driver
//! task. The driver is the only thing that ever touches the WebSocket,
//! the call queue, or either pending-call/pending-response table — every
//! other piece of the system talks to it over an internal mailbox, per the
//! single-writer rule this system is built around.

use std::{
	collections::HashMap,
	future::Future,
	pin::Pin,
	sync::{
		atomic::{AtomicU8, Ordering},
		Arc,
	},
	task::{Context, Poll},
	time::Duration,
};

use futures_util::FutureExt;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rpc_core::{CallError, CloseCode, ErrorCode, ErrorFrame, Frame, Json, MessageId};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
	common::CancelSignal,
	events::{Event, EventReceiver, EventSender},
	keepalive::{KeepaliveAction, KeepaliveEngine},
	pending_call::PendingCallTable,
	pending_response::PendingResponseTable,
	queue::{CallQueue, Submission},
	transport::{Message, WebSocket},
	validator::{ValidationDirection, ValidationFailure, Validator},
};

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

/// Tuning knobs for a single connection's peer engine.
#[derive(Debug, Clone)]
pub struct PeerConfig {
	/// Upper bound on inbound CALLs handled at once (C5) and outbound CALLs
	/// in flight at once (C3). Further work of either kind queues in arrival
	/// order.
	pub call_concurrency: usize,
	/// Default timeout for an outbound call when none is given explicitly.
	pub call_timeout: Duration,
	/// `badMessagesCount` threshold; crossing it forces a `1002` close.
	pub max_bad_messages: u32,
	pub ping_interval: Duration,
	pub defer_pings_on_activity: bool,
	/// How long an orderly close waits for the peer's own close frame before
	/// giving up and tearing down the transport.
	pub close_grace_period: Duration,
	/// Emit the corrected `OccurrenceConstraintViolation` spelling instead of
	/// the legacy `Occurence…` one. Off by default for compatibility.
	pub modern_error_spelling: bool,
	/// Include the underlying message/panic detail in an `InternalError`
	/// CALLERROR's details. Off by default: a handler failure's internals
	/// are not normally safe to hand to the remote peer.
	pub respond_with_detailed_errors: bool,
}

impl Default for PeerConfig {
	fn default() -> Self {
		Self {
			call_concurrency: 1,
			call_timeout: Duration::from_secs(60),
			max_bad_messages: 3,
			ping_interval: Duration::from_secs(30),
			defer_pings_on_activity: true,
			close_grace_period: Duration::from_secs(10),
			modern_error_spelling: false,
			respond_with_detailed_errors: false,
		}
	}
}

// --------------------------------------------------
// Handler / Router

/// The arguments a registered handler receives for one inbound CALL.
pub struct HandlerArgs {
	pub method: String,
	pub params: Json,
	/// The wire `MessageId` this invocation is answering, for correlating a
	/// handler's own logging/tracing with `badMessage` events and replies.
	pub message_id: MessageId,
	/// Resolves once the peer has lost interest in a reply — the connection
	/// dropped, or the peer is closing without waiting for pending work.
	pub cancel: CancelSignal,
}

pub(crate) type HandlerFuture = Pin<Box<dyn Future<Output = Result<Json, CallError>> + Send>>;
pub(crate) type Handler = Arc<dyn Fn(HandlerArgs) -> HandlerFuture + Send + Sync>;

/// A resolved set of method handlers, built once before a peer is spawned.
#[derive(Clone, Default)]
pub(crate) struct Router {
	by_method: HashMap<String, Handler>,
	fallback: Option<Handler>,
}

impl Router {
	pub(crate) fn resolve(&self, method: &str) -> Option<Handler> {
		self.by_method.get(method).cloned().or_else(|| self.fallback.clone())
	}
}

/// Builds a [`Router`] by registering one handler per method, plus an
/// optional fallback for methods with none registered.
#[derive(Default)]
pub struct RouterBuilder(Router);

impl RouterBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn on<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
	where
		F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Json, CallError>> + Send + 'static,
	{
		self.0.by_method.insert(method.into(), Arc::new(move |args| Box::pin(handler(args))));

		self
	}

	/// Registers a handler invoked for any method with no exact match.
	pub fn fallback<F, Fut>(mut self, handler: F) -> Self
	where
		F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Json, CallError>> + Send + 'static,
	{
		self.0.fallback = Some(Arc::new(move |args| Box::pin(handler(args))));

		self
	}

	pub(crate) fn build(self) -> Router {
		self.0
	}
}

// --------------------------------------------------
// State

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
	Open,
	Closing,
	Closed,
}

impl From<u8> for State {
	fn from(value: u8) -> Self {
		match value {
			0 => State::Open,
			1 => State::Closing,
			_ => State::Closed,
		}
	}
}

impl From<State> for u8 {
	fn from(state: State) -> u8 {
		match state {
			State::Open => 0,
			State::Closing => 1,
			State::Closed => 2,
		}
	}
}

// --------------------------------------------------
// CloseOptions

/// Parameters for [`Peer::close`], mirroring the close protocol in §4.7.
#[derive(Debug, Clone)]
pub struct CloseOptions {
	pub code: CloseCode,
	pub reason: String,
	/// Wait for in-flight outbound and inbound calls to drain before sending
	/// the WebSocket close frame, rather than abandoning them immediately.
	pub await_pending: bool,
	/// Skip the WebSocket close handshake and tear down the transport at once.
	pub force: bool,
}

impl Default for CloseOptions {
	fn default() -> Self {
		Self {
			code: CloseCode::_1000_Normal,
			reason: String::new(),
			await_pending: false,
			force: false,
		}
	}
}

// --------------------------------------------------------------------------------
// Peer / PeerHandle

enum DriverMessage {
	Call(Submission),
	Close(CloseOptions),
	HandlerReply {
		message_id: MessageId,
		result: Result<Json, CallError>,
	},
}

/// A cheaply-cloneable handle to a running connection.
///
/// Cloning a `Peer` does not clone the connection — every clone talks to the
/// same driver task over the same mailbox.
#[derive(Clone)]
pub struct Peer {
	identity: Option<String>,
	subprotocol: Option<String>,
	state: Arc<AtomicU8>,
	messages: mpsc::UnboundedSender<DriverMessage>,
	close_rx: watch::Receiver<Option<(CloseCode, String)>>,
	events: EventSender,
	call_timeout: Duration,
}

impl Peer {
	pub fn identity(&self) -> Option<&str> {
		self.identity.as_deref()
	}

	pub fn subprotocol(&self) -> Option<&str> {
		self.subprotocol.as_deref()
	}

	pub fn is_open(&self) -> bool {
		State::from(self.state.load(Ordering::SeqCst)) == State::Open
	}

	pub fn subscribe(&self) -> EventReceiver {
		self.events.subscribe()
	}

	/// Makes a call with the peer's configured default timeout.
	pub async fn call(&self, method: impl Into<String>, params: Json) -> Result<Json, CallError> {
		self.call_with_timeout(method, params, self.call_timeout).await
	}

	pub async fn call_with_timeout(
		&self,
		method: impl Into<String>,
		params: Json,
		timeout: Duration,
	) -> Result<Json, CallError> {
		let (future, _handle) = self.call_cancellable(method, params, timeout, false);

		future.await
	}

	/// Sends a call the peer does not expect a reply to. Resolves once the
	/// frame has been written (or rejects if the connection is gone) rather
	/// than waiting on a response that will never arrive.
	pub async fn call_no_reply(
		&self,
		method: impl Into<String>,
		params: Json,
	) -> Result<(), CallError> {
		let (future, _handle) = self.call_cancellable(method, params, self.call_timeout, true);

		future.await.map(|_| ())
	}

	/// Low-level entry point for [`call`](Self::call) and
	/// [`call_no_reply`](Self::call_no_reply): returns a future resolving to
	/// the eventual reply, plus a [`CallHandle`] the caller can use to abort
	/// it early.
	fn call_cancellable(
		&self,
		method: impl Into<String>,
		params: Json,
		timeout: Duration,
		no_reply: bool,
	) -> (CallFuture, CallHandle) {
		let (respond_to, receiver) = oneshot::channel();
		let cancel = CancelSignal::new();
		let message_id = generate_message_id();

		let submission = Submission {
			message_id,
			method: method.into(),
			params,
			timeout,
			no_reply,
			cancel: cancel.clone(),
			respond_to,
		};

		if self.messages.send(DriverMessage::Call(submission)).is_err() {
			let (immediate_tx, immediate_rx) = oneshot::channel();
			let _ = immediate_tx.send(Err(CallError::disconnected()));

			return (CallFuture(immediate_rx), CallHandle(cancel));
		}

		(CallFuture(receiver), CallHandle(cancel))
	}

	/// Runs the close protocol described in §4.7. Idempotent: a second call
	/// while a close is already in progress observes the same outcome.
	pub async fn close(&self, options: CloseOptions) -> (CloseCode, String) {
		let _ = self.messages.send(DriverMessage::Close(options));

		let mut close_rx = self.close_rx.clone();

		if let Some(result) = close_rx.borrow().clone() {
			return result;
		}

		match close_rx.wait_for(Option::is_some).await {
			Ok(result) => result.clone().expect("wait_for guarantees Some"),
			Err(_) => (CloseCode::_1006_Abnormal, "Connection lost".to_owned()),
		}
	}
}

/// A handle to abort an in-flight [`Peer::call`] before it resolves.
pub struct CallHandle(CancelSignal);

impl CallHandle {
	pub fn cancel(&self) {
		self.0.cancel();
	}
}

struct CallFuture(oneshot::Receiver<Result<Json, CallError>>);

impl Future for CallFuture {
	type Output = Result<Json, CallError>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();

		match Pin::new(&mut this.0).poll(cx) {
			Poll::Ready(Ok(result)) => Poll::Ready(result),
			Poll::Ready(Err(_)) => Poll::Ready(Err(CallError::disconnected())),
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Recovers a printable message from a caught panic payload, the same
/// `&str`/`String` downcast every panic hook performs.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
	if let Some(message) = panic.downcast_ref::<&str>() {
		(*message).to_owned()
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message.clone()
	} else {
		"handler panicked with a non-string payload".to_owned()
	}
}

fn generate_message_id() -> MessageId {
	thread_local! {
		static RNG: std::cell::RefCell<SmallRng> = std::cell::RefCell::new(SmallRng::from_entropy());
	}

	RNG.with(|rng| format!("{:016x}", rng.borrow_mut().gen::<u64>()))
}

// --------------------------------------------------------------------------------
// PeerDriver

/// Spawns the driver task for an already-upgraded WebSocket and returns a
/// handle to it. Called by the server handshake (C8) once it has promoted an
/// upgrade, and by the client dialer (C9) once it has connected.
pub(crate) fn spawn(
	websocket: WebSocket,
	identity: Option<String>,
	subprotocol: Option<String>,
	config: PeerConfig,
	router: Router,
	validator: Option<Arc<dyn Validator>>,
) -> Peer {
	let (messages_tx, messages_rx) = mpsc::unbounded_channel();
	let (close_tx, close_rx) = watch::channel(None);
	let (events, _first_subscriber) = EventSender::new();
	let state = Arc::new(AtomicU8::new(State::Open.into()));

	let handle = Peer {
		identity: identity.clone(),
		subprotocol: subprotocol.clone(),
		state: state.clone(),
		messages: messages_tx.clone(),
		close_rx,
		events: events.clone(),
		call_timeout: config.call_timeout,
	};

	let driver = PeerDriver {
		websocket,
		queue: CallQueue::new(config.call_concurrency),
		pending_calls: PendingCallTable::new(),
		pending_responses: PendingResponseTable::new(config.call_concurrency),
		keepalive: KeepaliveEngine::new(config.ping_interval, config.defer_pings_on_activity),
		validator,
		subprotocol,
		router: Arc::new(router),
		events,
		state,
		bad_messages: 0,
		config,
		messages: messages_rx,
		message_tx: messages_tx,
		close_tx,
	};

	tokio::spawn(driver.run());

	handle
}

struct PeerDriver {
	websocket: WebSocket,
	queue: CallQueue,
	pending_calls: PendingCallTable,
	pending_responses: PendingResponseTable,
	keepalive: KeepaliveEngine,
	validator: Option<Arc<dyn Validator>>,
	subprotocol: Option<String>,
	router: Arc<Router>,
	events: EventSender,
	state: Arc<AtomicU8>,
	bad_messages: u32,
	config: PeerConfig,
	messages: mpsc::UnboundedReceiver<DriverMessage>,
	message_tx: mpsc::UnboundedSender<DriverMessage>,
	close_tx: watch::Sender<Option<(CloseCode, String)>>,
}

impl PeerDriver {
	fn state(&self) -> State {
		State::from(self.state.load(Ordering::SeqCst))
	}

	fn set_state(&self, state: State) {
		self.state.store(state.into(), Ordering::SeqCst);
	}

	fn strict(&self) -> bool {
		self.validator.is_some()
	}

	async fn run(mut self) {
		self.events.emit(Event::Open {
			subprotocol: self.subprotocol.clone(),
		});
		self.events.emit(Event::Protocol(self.subprotocol.clone()));

		loop {
			if self.state() == State::Closed {
				break;
			}

			tokio::select! {
				biased;

				Some(message) = self.messages.recv() => {
					match message {
						DriverMessage::Call(submission) => self.handle_call_submission(submission).await,
						DriverMessage::Close(options) => {
							self.run_close(options).await;
						}
						DriverMessage::HandlerReply { message_id, result } => {
							self.write_handler_reply(message_id, result).await;
						}
					}
				}

				incoming = self.websocket.receive() => {
					match incoming {
						Some(Ok(message)) => self.handle_incoming(message).await,
						Some(Err(_error)) => {
							self.run_close(CloseOptions {
								code: CloseCode::_1002_ProtocolError,
								reason: "Transport error".to_owned(),
								await_pending: false,
								force: true,
							}).await;
						}
						None => {
							self.on_disconnect().await;
						}
					}
				}

				_ = self.keepalive.due() => {
					match self.keepalive.fire() {
						KeepaliveAction::SendPing => {
							let _ = self.websocket.send(Message::Ping(Vec::new())).await;
						}
						KeepaliveAction::TimedOut => {
							self.run_close(CloseOptions {
								code: CloseCode::_1002_ProtocolError,
								reason: "Ping timeout".to_owned(),
								await_pending: false,
								force: false,
							}).await;
						}
					}
				}

				_ = next_pending_call_deadline(&self.pending_calls) => {
					for message_id in self.pending_calls.sweep_expired(tokio::time::Instant::now()) {
						tracing::debug!(%message_id, "outbound call timed out");
						self.admit_next_queued().await;
					}
				}

				message_id = self.pending_calls.next_cancelled() => {
					if self.pending_calls.cancel(&message_id) {
						self.admit_next_queued().await;
					}
				}
			}
		}
	}

	// ----------
	// Outbound calls (C3 → C1)

	async fn handle_call_submission(&mut self, submission: Submission) {
		match self.state() {
			State::Open => {}
			State::Closing => {
				let _ = submission.respond_to.send(Err(CallError::closing()));

				return;
			}
			State::Closed => {
				let _ = submission.respond_to.send(Err(CallError::disconnected()));

				return;
			}
		}

		match self.queue.offer(submission) {
			Some(admitted) => self.write_admitted_call(admitted).await,
			None => {}
		}
	}

	async fn write_admitted_call(&mut self, submission: Submission) {
		let Submission {
			message_id,
			method,
			params,
			timeout,
			no_reply,
			cancel,
			respond_to,
		} = submission;

		let frame = Frame::call(message_id.clone(), method.clone(), params);
		let encoded = frame.encode(self.config.modern_error_spelling);

		if let Err(error) = self.websocket.send(Message::Text(encoded)).await {
			tracing::warn!(%error, "failed to write outbound call");
			let _ = respond_to.send(Err(CallError::disconnected()));
			self.admit_next_queued().await;

			return;
		}

		self.keepalive.on_activity();

		if no_reply {
			let _ = respond_to.send(Ok(Json::Null));
			self.admit_next_queued().await;
		} else {
			self.pending_calls.insert(message_id, method, timeout, cancel, respond_to);
		}
	}

	async fn admit_next_queued(&mut self) {
		if let Some(next) = self.queue.release() {
			Box::pin(self.write_admitted_call(next)).await;
		}
	}

	// ----------
	// Inbound frames (C1 → C7)

	async fn handle_incoming(&mut self, message: Message) {
		match message {
			Message::Text(text) => self.handle_text(&text).await,
			Message::Binary(_) => self.report_bad_message("binary frames are not supported").await,
			Message::Ping(_) => self.keepalive.on_activity(),
			Message::Pong(_) => {
				self.keepalive.on_pong();
				self.keepalive.on_activity();
			}
			Message::Close(close_frame) => {
				let (code, reason) = close_frame
					.map(|frame| (frame.code, frame.reason))
					.unwrap_or((CloseCode::_1005_NoStatusReceived, String::new()));

				self.run_close(CloseOptions {
					code,
					reason,
					await_pending: false,
					force: false,
				})
				.await;
			}
		}
	}

	async fn handle_text(&mut self, text: &str) {
		self.keepalive.on_activity();

		match Frame::decode(text) {
			Ok(Frame::Call(call)) => self.handle_inbound_call(call.message_id, call.method, call.params).await,
			Ok(Frame::Result(result)) => self.handle_inbound_result(result.message_id, result.result).await,
			Ok(Frame::Error(error)) => self.handle_inbound_error(error).await,
			Err(malformed) => self.report_bad_message(&malformed.reason.to_string()).await,
		}
	}

	async fn handle_inbound_call(&mut self, message_id: MessageId, method: String, params: Json) {
		if self.strict() {
			if let Some(failure) =
				self.validate(ValidationDirection::Request, &method, &params)
			{
				self.write_error(message_id, failure.into_call_error()).await;

				return;
			}
		}

		let Some(cancel) = self.pending_responses.begin(message_id.clone()) else {
			self.report_bad_message(&format!("duplicate MessageId {message_id:?}")).await;

			return;
		};

		let Some(handler) = self.router.resolve(&method) else {
			self.pending_responses.end(&message_id);
			self
				.write_error(
					message_id,
					CallError::new(ErrorCode::NotImplemented, format!("no handler for {method}")),
				)
				.await;

			return;
		};

		let permits = self.pending_responses.permits();
		let reply_tx = self.message_tx.clone();
		let detailed_errors = self.config.respond_with_detailed_errors;
		let args = HandlerArgs {
			method,
			params,
			message_id: message_id.clone(),
			cancel,
		};

		tokio::spawn(async move {
			let permit = match permits.acquire_owned().await {
				Ok(permit) => permit,
				Err(_) => return,
			};

			let result = match std::panic::AssertUnwindSafe(handler(args)).catch_unwind().await {
				Ok(result) => result,
				Err(panic) => {
					let detail = panic_message(&panic);
					let error = if detailed_errors {
						CallError::internal(detail)
					} else {
						CallError::internal("handler panicked")
					};

					Err(error)
				}
			};
			drop(permit);

			let _ = reply_tx.send(DriverMessage::HandlerReply { message_id, result });
		});
	}

	async fn write_handler_reply(&mut self, message_id: MessageId, result: Result<Json, CallError>) {
		self.pending_responses.end(&message_id);

		match result {
			Ok(value) => {
				let frame = Frame::result(message_id, value);
				let encoded = frame.encode(self.config.modern_error_spelling);

				if self.websocket.send(Message::Text(encoded)).await.is_ok() {
					self.keepalive.on_activity();
				}
			}
			Err(error) => self.write_error(message_id, error).await,
		}
	}

	async fn write_error(&mut self, message_id: MessageId, error: CallError) {
		let frame = Frame::Error(ErrorFrame {
			message_id,
			error_code: error.code,
			error_description: error.description,
			error_details: error.details,
		});

		if self
			.websocket
			.send(Message::Text(frame.encode(self.config.modern_error_spelling)))
			.await
			.is_ok()
		{
			self.keepalive.on_activity();
		}
	}

	async fn handle_inbound_result(&mut self, message_id: MessageId, result: Json) {
		let Some(method) = self.pending_calls.method_of(&message_id) else {
			self.report_bad_message(&format!("unmatched CALLRESULT for {message_id:?}")).await;

			return;
		};

		if self.strict() {
			if let Some(failure) = self.validate(ValidationDirection::Response, &method, &result) {
				self.pending_calls.reject(&message_id, failure.into_call_error());
				self.admit_next_queued().await;
				self.report_bad_message(&format!("CALLRESULT for {message_id:?} failed schema validation")).await;

				return;
			}
		}

		if self.pending_calls.resolve(&message_id, result) {
			self.admit_next_queued().await;
		} else {
			self.report_bad_message(&format!("unmatched CALLRESULT for {message_id:?}")).await;
		}
	}

	async fn handle_inbound_error(&mut self, error: ErrorFrame) {
		let call_error = CallError::new(error.error_code, error.error_description)
			.with_details(error.error_details);

		if self.pending_calls.reject(&error.message_id, call_error) {
			self.admit_next_queued().await;
		} else {
			self
				.report_bad_message(&format!("unmatched CALLERROR for {:?}", error.message_id))
				.await;
		}
	}

	fn validate(
		&self,
		direction: ValidationDirection,
		method: &str,
		payload: &Json,
	) -> Option<ValidationFailure> {
		self
			.validator
			.as_ref()
			.and_then(|validator| validator.validate(direction, method, payload).err())
	}

	async fn report_bad_message(&mut self, reason: &str) {
		self.bad_messages += 1;
		self.events.emit(Event::BadMessage(reason.to_owned()));

		if self.bad_messages > self.config.max_bad_messages {
			self
				.run_close(CloseOptions {
					code: CloseCode::_1002_ProtocolError,
					reason: "Too many bad messages".to_owned(),
					await_pending: false,
					force: false,
				})
				.await;
		}
	}

	// ----------
	// Close protocol (§4.7)

	async fn run_close(&mut self, options: CloseOptions) {
		if self.state() != State::Open {
			return;
		}

		self.set_state(State::Closing);
		self.events.emit(Event::Closing);

		if options.await_pending {
			let deadline = tokio::time::Instant::now() + self.config.close_grace_period;

			while tokio::time::Instant::now() < deadline
				&& (!self.pending_calls.is_empty() || self.pending_responses.len() > 0)
			{
				tokio::time::sleep(Duration::from_millis(20)).await;
			}
		} else {
			self.pending_calls.reject_all(CallError::closing());
			self.pending_responses.cancel_all();

			for submission in self.queue.drain() {
				let _ = submission.respond_to.send(Err(CallError::closing()));
			}
		}

		let observed = if options.force {
			(options.code, options.reason)
		} else {
			self.websocket.close(options.code, &options.reason).await;

			tokio::time::timeout(self.config.close_grace_period, self.wait_for_peer_close())
				.await
				.unwrap_or((CloseCode::_1006_Abnormal, "Close handshake timed out".to_owned()))
		};

		self.set_state(State::Closed);
		self.events.emit(Event::Close {
			code: observed.0,
			reason: observed.1.clone(),
		});
		let _ = self.close_tx.send(Some(observed));
	}

	async fn wait_for_peer_close(&mut self) -> (CloseCode, String) {
		loop {
			match self.websocket.receive().await {
				Some(Ok(Message::Close(Some(frame)))) => return (frame.code, frame.reason),
				Some(Ok(Message::Close(None))) => {
					return (CloseCode::_1005_NoStatusReceived, String::new())
				}
				Some(Ok(_)) => continue,
				Some(Err(_)) | None => return (CloseCode::_1006_Abnormal, "Connection lost".to_owned()),
			}
		}
	}

	async fn on_disconnect(&mut self) {
		if self.state() == State::Closed {
			return;
		}

		self.pending_calls.reject_all(CallError::disconnected());
		self.pending_responses.cancel_all();

		self.set_state(State::Closed);
		self.events.emit(Event::Disconnect);
		self.events.emit(Event::Close {
			code: CloseCode::_1006_Abnormal,
			reason: "Connection lost".to_owned(),
		});
		let _ = self
			.close_tx
			.send(Some((CloseCode::_1006_Abnormal, "Connection lost".to_owned())));
	}
}

async fn next_pending_call_deadline(table: &PendingCallTable) {
	match table.next_deadline() {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending::<()>().await,
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn state_round_trips_through_u8() {
		for state in [State::Open, State::Closing, State::Closed] {
			assert_eq!(State::from(u8::from(state)), state);
		}
	}

	#[test]
	fn router_falls_back_when_no_exact_method_matches() {
		let router = RouterBuilder::new()
			.on("Heartbeat", |_args| async { Ok(Json::Null) })
			.fallback(|_args| async { Err(CallError::generic("no such method")) })
			.build();

		assert!(router.resolve("Heartbeat").is_some());
		assert!(router.resolve("SomethingElse").is_some());
	}

	#[test]
	fn router_has_no_fallback_by_default() {
		let router = RouterBuilder::new().on("Heartbeat", |_args| async { Ok(Json::Null) }).build();

		assert!(router.resolve("SomethingElse").is_none());
	}
}
