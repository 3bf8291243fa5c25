//! The per-peer outbound call queue (§4.3, C3).
//!
//! `CallQueue` itself does no I/O and takes no locks — it is owned outright
//! by the single peer driver task (§5's "mailbox" model) and only tracks how
//! many outbound calls are currently admitted versus waiting their turn.

use std::{collections::VecDeque, time::Duration};

use rpc_core::{CallError, Json, MessageId};
use tokio::sync::oneshot;

use crate::common::CancelSignal;

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

/// One outbound call waiting for (or holding) an admission slot.
pub(crate) struct Submission {
	pub(crate) message_id: MessageId,
	pub(crate) method: String,
	pub(crate) params: Json,
	pub(crate) timeout: Duration,
	pub(crate) no_reply: bool,
	pub(crate) cancel: CancelSignal,
	pub(crate) respond_to: oneshot::Sender<Result<Json, CallError>>,
}

/// A FIFO admission gate bounded by `callConcurrency`.
pub(crate) struct CallQueue {
	concurrency: usize,
	admitted: usize,
	waiting: VecDeque<Submission>,
}

impl CallQueue {
	pub(crate) fn new(concurrency: usize) -> Self {
		Self {
			concurrency: concurrency.max(1),
			admitted: 0,
			waiting: VecDeque::new(),
		}
	}

	/// Admits `submission` immediately if a slot is free; otherwise queues it
	/// and returns `None`.
	pub(crate) fn offer(&mut self, submission: Submission) -> Option<Submission> {
		if self.admitted < self.concurrency {
			self.admitted += 1;

			Some(submission)
		} else {
			self.waiting.push_back(submission);

			None
		}
	}

	/// Call this once an admitted call has stopped occupying its slot
	/// (response received, timed out, cancelled, or written with `no_reply`).
	/// Returns the next submission to admit, skipping any that were cancelled
	/// while still waiting.
	pub(crate) fn release(&mut self) -> Option<Submission> {
		self.admitted = self.admitted.saturating_sub(1);

		while let Some(next) = self.waiting.pop_front() {
			if next.cancel.is_cancelled() {
				let _ = next.respond_to.send(Err(CallError::aborted()));

				continue;
			}

			self.admitted += 1;

			return Some(next);
		}

		None
	}

	/// Removes a still-waiting submission (its caller cancelled before it was
	/// ever admitted). Returns whether anything was removed.
	pub(crate) fn cancel_waiting(&mut self, message_id: &str) -> bool {
		let before = self.waiting.len();
		self.waiting.retain(|submission| submission.message_id != message_id);

		before != self.waiting.len()
	}

	/// Drains every waiting submission, admitted or not, for a non-graceful
	/// close: the caller rejects each with the same disconnect error.
	pub(crate) fn drain(&mut self) -> Vec<Submission> {
		self.waiting.drain(..).collect()
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.admitted == 0 && self.waiting.is_empty()
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	fn submission(id: &str) -> (Submission, oneshot::Receiver<Result<Json, CallError>>) {
		let (tx, rx) = oneshot::channel();

		(
			Submission {
				message_id: id.into(),
				method: "Foo".into(),
				params: Json::Object(Default::default()),
				timeout: Duration::from_secs(1),
				no_reply: false,
				cancel: CancelSignal::new(),
				respond_to: tx,
			},
			rx,
		)
	}

	#[test]
	fn admits_up_to_concurrency_then_queues() {
		let mut queue = CallQueue::new(2);

		let (a, _rx_a) = submission("a");
		let (b, _rx_b) = submission("b");
		let (c, _rx_c) = submission("c");

		assert!(queue.offer(a).is_some());
		assert!(queue.offer(b).is_some());
		assert!(queue.offer(c).is_none(), "third call should queue, not admit");
	}

	#[test]
	fn release_admits_next_waiting_in_fifo_order() {
		let mut queue = CallQueue::new(1);

		let (a, _rx_a) = submission("a");
		let (b, _rx_b) = submission("b");

		assert!(queue.offer(a).is_some());
		assert!(queue.offer(b).is_none());

		let admitted = queue.release().expect("b should now be admitted");
		assert_eq!(admitted.message_id, "b");
	}

	#[test]
	fn release_skips_submissions_cancelled_while_waiting() {
		let mut queue = CallQueue::new(1);

		let (a, _rx_a) = submission("a");
		let (b, rx_b) = submission("b");

		queue.offer(a);
		let b_cancel = b.cancel.clone();
		queue.offer(b);
		b_cancel.cancel();

		assert!(queue.release().is_none());
		assert_eq!(rx_b.blocking_recv().unwrap().unwrap_err().description, "Call aborted");
	}

	#[test]
	fn cancel_waiting_removes_by_message_id() {
		let mut queue = CallQueue::new(1);

		let (a, _rx_a) = submission("a");
		let (b, _rx_b) = submission("b");

		queue.offer(a);
		queue.offer(b);

		assert!(queue.cancel_waiting("b"));
		assert!(!queue.cancel_waiting("b"));
	}
}
