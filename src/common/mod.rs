//! Common types and functions shared across the peer engine, server and client.

// ----------

pub(crate) mod timer;

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

// --------------------------------------------------
// CancelSignal

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use tokio::sync::Notify;

/// A cooperative cancellation signal fired exactly once, observable by any
/// number of clones. Used to tell an in-flight handler or call that its
/// peer has gone away.
#[derive(Clone)]
pub struct CancelSignal(Arc<CancelInner>);

struct CancelInner {
	cancelled: AtomicBool,
	notify: Notify,
}

impl CancelSignal {
	pub(crate) fn new() -> Self {
		Self(Arc::new(CancelInner {
			cancelled: AtomicBool::new(false),
			notify: Notify::new(),
		}))
	}

	pub(crate) fn cancel(&self) {
		if !self.0.cancelled.swap(true, Ordering::SeqCst) {
			self.0.notify.notify_waiters();
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.cancelled.load(Ordering::SeqCst)
	}

	/// Resolves once [`cancel`](Self::cancel) has been called.
	pub async fn cancelled(&self) {
		if self.is_cancelled() {
			return;
		}

		let notified = self.0.notify.notified();

		if self.is_cancelled() {
			return;
		}

		notified.await;
	}
}

// --------------------------------------------------------------------------------
// ReplyOnce

/// A reply slot that accepts at most one value; later attempts are silently
/// ignored, matching the wire protocol's "first reply wins" handler contract.
#[derive(Clone)]
pub(crate) struct ReplyOnce<T> {
	taken: Arc<AtomicBool>,
	sender: Arc<std::sync::Mutex<Option<tokio::sync::oneshot::Sender<T>>>>,
}

impl<T> ReplyOnce<T> {
	pub(crate) fn new() -> (Self, tokio::sync::oneshot::Receiver<T>) {
		let (sender, receiver) = tokio::sync::oneshot::channel();

		(
			Self {
				taken: Arc::new(AtomicBool::new(false)),
				sender: Arc::new(std::sync::Mutex::new(Some(sender))),
			},
			receiver,
		)
	}

	/// Sends `value` if this is the first call; returns whether it took effect.
	pub(crate) fn send(&self, value: T) -> bool {
		if self.taken.swap(true, Ordering::SeqCst) {
			return false;
		}

		if let Some(sender) = self.sender.lock().expect("reply mutex poisoned").take() {
			let _ = sender.send(value);
		}

		true
	}

	pub(crate) fn has_replied(&self) -> bool {
		self.taken.load(Ordering::SeqCst)
	}
}

// --------------------------------------------------------------------------------
// Deferred

pub(crate) struct Deferred<Func: FnMut()>(Func);

impl<Func: FnMut()> Deferred<Func> {
	pub(crate) fn call(func: Func) -> Self {
		Self(func)
	}
}

impl<Func: FnMut()> Drop for Deferred<Func> {
	fn drop(&mut self) {
		(self.0)()
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn cancel_signal_wakes_waiters() {
		let signal = CancelSignal::new();
		let waiter = signal.clone();

		let handle = tokio::spawn(async move {
			waiter.cancelled().await;
		});

		assert!(!signal.is_cancelled());
		signal.cancel();
		handle.await.unwrap();
		assert!(signal.is_cancelled());
	}

	#[test]
	fn reply_once_ignores_second_send() {
		let (reply, receiver) = ReplyOnce::new();

		assert!(reply.send(1));
		assert!(!reply.send(2));
		assert_eq!(receiver.blocking_recv(), Ok(1));
	}
}
