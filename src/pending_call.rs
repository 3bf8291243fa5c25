//! The outbound pending-call table (§4.4, C4).
//!
//! Once a [`crate::queue::Submission`] is admitted and its CALL frame written
//! to the wire, it moves here to await a matching CALLRESULT or CALLERROR.
//! Like [`crate::queue::CallQueue`], this table is owned outright by the peer
//! driver task — no internal locking.

use std::{collections::HashMap, time::Duration};

use futures_util::{stream::FuturesUnordered, StreamExt};
use rpc_core::{CallError, Json, MessageId};
use tokio::{sync::oneshot, time::Instant};

use crate::common::CancelSignal;

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

pub(crate) struct PendingCall {
	pub(crate) method: String,
	pub(crate) deadline: Instant,
	cancel: CancelSignal,
	respond_to: oneshot::Sender<Result<Json, CallError>>,
}

/// Outbound calls awaiting a response, keyed by the `MessageId` they were
/// sent with.
#[derive(Default)]
pub(crate) struct PendingCallTable {
	entries: HashMap<MessageId, PendingCall>,
}

impl PendingCallTable {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	pub(crate) fn insert(
		&mut self,
		message_id: MessageId,
		method: String,
		timeout: Duration,
		cancel: CancelSignal,
		respond_to: oneshot::Sender<Result<Json, CallError>>,
	) {
		self.entries.insert(
			message_id,
			PendingCall {
				method,
				deadline: Instant::now() + timeout,
				cancel,
				respond_to,
			},
		);
	}

	/// Resolves a pending call with a CALLRESULT. Returns whether anything
	/// was waiting on `message_id` — a miss means a late or spurious reply
	/// and should be surfaced as a `badMessage` event by the caller.
	pub(crate) fn resolve(&mut self, message_id: &str, result: Json) -> bool {
		match self.entries.remove(message_id) {
			Some(pending) => {
				let _ = pending.respond_to.send(Ok(result));

				true
			}
			None => false,
		}
	}

	/// Rejects a pending call with a CALLERROR.
	pub(crate) fn reject(&mut self, message_id: &str, error: CallError) -> bool {
		match self.entries.remove(message_id) {
			Some(pending) => {
				let _ = pending.respond_to.send(Err(error));

				true
			}
			None => false,
		}
	}

	/// Removes a pending call without resolving it — used when its caller's
	/// future was dropped or its cancellation signal fired.
	pub(crate) fn remove(&mut self, message_id: &str) -> Option<PendingCall> {
		self.entries.remove(message_id)
	}

	/// Aborts an admitted call whose [`CallHandle::cancel`](crate::peer::CallHandle::cancel)
	/// fired after it was already admitted, rejecting it with `"Call aborted"`.
	/// Returns whether anything was removed.
	pub(crate) fn cancel(&mut self, message_id: &str) -> bool {
		self.reject(message_id, CallError::aborted())
	}

	/// Resolves once any live entry's cancellation signal has fired, yielding
	/// that entry's `MessageId`. Rebuilt fresh on every call — safe to await
	/// in a loop since [`CancelSignal::cancelled`] re-checks its flag before
	/// registering a waiter, so no signal fired between polls is ever missed.
	/// Never resolves while the table is empty.
	pub(crate) async fn next_cancelled(&self) -> MessageId {
		if self.entries.is_empty() {
			std::future::pending::<()>().await;
		}

		let mut waiters: FuturesUnordered<_> = self
			.entries
			.iter()
			.map(|(message_id, pending)| {
				let cancel = pending.cancel.clone();
				let message_id = message_id.clone();

				async move {
					cancel.cancelled().await;

					message_id
				}
			})
			.collect();

		waiters.next().await.expect("at least one waiter was just built")
	}

	/// The method a pending call was made with, needed to look up the
	/// response schema when validating its eventual CALLRESULT.
	pub(crate) fn method_of(&self, message_id: &str) -> Option<String> {
		self.entries.get(message_id).map(|pending| pending.method.clone())
	}

	/// The earliest deadline among all pending calls, for the driver loop to
	/// sleep until.
	pub(crate) fn next_deadline(&self) -> Option<Instant> {
		self.entries.values().map(|pending| pending.deadline).min()
	}

	/// Removes and rejects every call whose deadline has passed as of `now`,
	/// returning their message IDs for logging.
	pub(crate) fn sweep_expired(&mut self, now: Instant) -> Vec<MessageId> {
		let expired: Vec<MessageId> = self
			.entries
			.iter()
			.filter(|(_, pending)| pending.deadline <= now)
			.map(|(message_id, _)| message_id.clone())
			.collect();

		for message_id in &expired {
			if let Some(pending) = self.entries.remove(message_id) {
				let _ = pending.respond_to.send(Err(CallError::timeout()));
			}
		}

		expired
	}

	/// Removes and rejects every pending call, e.g. on disconnect.
	pub(crate) fn reject_all(&mut self, error: CallError) {
		for (_, pending) in self.entries.drain() {
			let _ = pending.respond_to.send(Err(error.clone()));
		}
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	fn insert_with_timeout(
		table: &mut PendingCallTable,
		message_id: &str,
		timeout: Duration,
	) -> oneshot::Receiver<Result<Json, CallError>> {
		let (tx, rx) = oneshot::channel();
		table.insert(message_id.into(), "Foo".into(), timeout, CancelSignal::new(), tx);

		rx
	}

	#[tokio::test]
	async fn cancel_rejects_an_admitted_call_as_aborted() {
		let mut table = PendingCallTable::new();
		let rx = insert_with_timeout(&mut table, "id1", Duration::from_secs(5));

		assert!(table.cancel("id1"));
		assert_eq!(rx.await.unwrap().unwrap_err().description, "Call aborted");
		assert!(table.is_empty());
	}

	#[tokio::test]
	async fn next_cancelled_resolves_once_an_entry_fires_its_signal() {
		let mut table = PendingCallTable::new();
		let (tx, _rx) = oneshot::channel();
		let cancel = CancelSignal::new();
		table.insert("id1".into(), "Foo".into(), Duration::from_secs(5), cancel.clone(), tx);

		cancel.cancel();
		let message_id = table.next_cancelled().await;
		assert_eq!(message_id, "id1");
	}

	#[test]
	fn resolve_delivers_result_and_reports_a_hit() {
		let mut table = PendingCallTable::new();
		let rx = insert_with_timeout(&mut table, "id1", Duration::from_secs(5));

		assert!(table.resolve("id1", Json::String("ok".into())));
		assert_eq!(rx.blocking_recv().unwrap().unwrap(), Json::String("ok".into()));
	}

	#[test]
	fn resolve_reports_a_miss_for_unknown_message_id() {
		let mut table = PendingCallTable::new();
		assert!(!table.resolve("nope", Json::Null));
	}

	#[test]
	fn sweep_expired_rejects_with_timeout_and_clears_entry() {
		let mut table = PendingCallTable::new();
		let now = Instant::now();
		let rx = insert_with_timeout(&mut table, "id1", Duration::from_secs(0));

		let expired = table.sweep_expired(now + Duration::from_millis(1));
		assert_eq!(expired, vec!["id1".to_string()]);
		assert_eq!(rx.blocking_recv().unwrap().unwrap_err().description, "Call timeout");
		assert!(table.is_empty());
	}

	#[test]
	fn reject_all_drains_every_entry() {
		let mut table = PendingCallTable::new();
		let rx1 = insert_with_timeout(&mut table, "id1", Duration::from_secs(5));
		let rx2 = insert_with_timeout(&mut table, "id2", Duration::from_secs(5));

		table.reject_all(CallError::disconnected());

		assert_eq!(rx1.blocking_recv().unwrap().unwrap_err().description, "Client disconnected");
		assert_eq!(rx2.blocking_recv().unwrap().unwrap_err().description, "Client disconnected");
		assert!(table.is_empty());
	}
}
