//! A reusable, resettable deadline, used by the keepalive engine and by the
//! per-call timeout tracked in the pending-call table.

use std::time::{Duration, Instant};

use tokio::time::{sleep_until, Sleep};

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

pub(crate) struct Deadline {
	duration: Duration,
	sleep: std::pin::Pin<Box<Sleep>>,
}

impl Deadline {
	pub(crate) fn new(duration: Duration) -> Self {
		Self {
			duration,
			sleep: Box::pin(sleep_until((Instant::now() + duration).into())),
		}
	}

	/// Pushes the deadline `self.duration` out from now.
	pub(crate) fn restart(&mut self) {
		self.restart_with_duration(self.duration)
	}

	pub(crate) fn restart_with_duration(&mut self, duration: Duration) {
		self.duration = duration;
		self.sleep.as_mut().reset((Instant::now() + duration).into());
	}

	/// Resolves once the deadline has elapsed. Cancel-safe; may be awaited
	/// repeatedly inside a `select!` loop.
	pub(crate) async fn elapsed(&mut self) {
		self.sleep.as_mut().await
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn fires_after_duration_and_can_be_restarted() {
		let mut deadline = Deadline::new(Duration::from_millis(50));

		tokio::time::timeout(Duration::from_millis(60), deadline.elapsed())
			.await
			.expect("deadline should have elapsed by 60ms");

		deadline.restart();

		let result = tokio::time::timeout(Duration::from_millis(10), deadline.elapsed()).await;
		assert!(result.is_err(), "restarted deadline fired too early");
	}
}
