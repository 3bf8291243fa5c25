//! The inbound pending-response table (§4.5, C5).
//!
//! Tracks inbound CALLs currently out for handling, from the moment a
//! concurrency permit is acquired to the moment a CALLRESULT or CALLERROR is
//! written back. Unlike [`crate::pending_call::PendingCallTable`], handler
//! concurrency here is bounded by a `tokio::sync::Semaphore` rather than the
//! driver's own counter, since handlers run concurrently on the runtime
//! rather than one at a time on the driver task.

use std::{collections::HashMap, sync::Arc};

use rpc_core::MessageId;
use tokio::sync::Semaphore;

use crate::common::CancelSignal;

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

pub(crate) struct PendingResponseTable {
	permits: Arc<Semaphore>,
	in_flight: HashMap<MessageId, CancelSignal>,
}

impl PendingResponseTable {
	pub(crate) fn new(concurrency: usize) -> Self {
		Self {
			permits: Arc::new(Semaphore::new(concurrency.max(1))),
			in_flight: HashMap::new(),
		}
	}

	/// The semaphore handlers acquire an owned permit from before running,
	/// enforcing FIFO admission the same way [`crate::queue::CallQueue`] does
	/// for outbound calls.
	pub(crate) fn permits(&self) -> Arc<Semaphore> {
		self.permits.clone()
	}

	/// Registers an inbound CALL as in flight, returning the [`CancelSignal`]
	/// its handler should observe. Returns `None` if `message_id` is already
	/// in flight — a duplicate CALL, which the caller should reject rather
	/// than hand to a second handler invocation.
	pub(crate) fn begin(&mut self, message_id: MessageId) -> Option<CancelSignal> {
		if self.in_flight.contains_key(&message_id) {
			return None;
		}

		let cancel = CancelSignal::new();
		self.in_flight.insert(message_id, cancel.clone());

		Some(cancel)
	}

	/// Marks an inbound CALL as answered, whether by CALLRESULT or CALLERROR.
	pub(crate) fn end(&mut self, message_id: &str) {
		self.in_flight.remove(message_id);
	}

	pub(crate) fn is_in_flight(&self, message_id: &str) -> bool {
		self.in_flight.contains_key(message_id)
	}

	/// Signals every in-flight handler to abandon its reply, e.g. on
	/// disconnect; does not itself remove the entries, since handlers call
	/// [`end`](Self::end) on their own unwind.
	pub(crate) fn cancel_all(&self) {
		for cancel in self.in_flight.values() {
			cancel.cancel();
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.in_flight.len()
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn begin_rejects_a_duplicate_message_id() {
		let mut table = PendingResponseTable::new(4);

		assert!(table.begin("id1".into()).is_some());
		assert!(table.begin("id1".into()).is_none());
	}

	#[test]
	fn end_frees_the_message_id_for_reuse() {
		let mut table = PendingResponseTable::new(4);

		table.begin("id1".into());
		table.end("id1");

		assert!(!table.is_in_flight("id1"));
		assert!(table.begin("id1".into()).is_some());
	}

	#[test]
	fn cancel_all_cancels_every_in_flight_signal_without_removing_it() {
		let mut table = PendingResponseTable::new(4);
		let cancel = table.begin("id1".into()).unwrap();

		table.cancel_all();

		assert!(cancel.is_cancelled());
		assert!(table.is_in_flight("id1"));
	}
}
