//! The keepalive engine (§4.6, C6).
//!
//! Owned by the peer driver and driven from its `select!` loop: the driver
//! awaits [`KeepaliveEngine::due`] alongside frame I/O, and tells the engine
//! about every inbound/outbound message and every pong it sees.

use std::time::Duration;

use crate::common::timer::Deadline;

// --------------------------------------------------------------------------------
// --------------------------------------------------------------------------------

/// What the driver should do once a keepalive deadline fires.
pub(crate) enum KeepaliveAction {
	/// Send a ping and arm the pong deadline.
	SendPing,
	/// No pong arrived in time; the connection should be closed with
	/// `1002 Ping timeout`.
	TimedOut,
}

pub(crate) struct KeepaliveEngine {
	ping_interval: Duration,
	defer_on_activity: bool,
	pending_pong: bool,
	deadline: Deadline,
}

impl KeepaliveEngine {
	pub(crate) fn new(ping_interval: Duration, defer_on_activity: bool) -> Self {
		Self {
			ping_interval,
			defer_on_activity,
			pending_pong: false,
			deadline: Deadline::new(ping_interval),
		}
	}

	/// Resolves when the next ping or pong-timeout check is due.
	pub(crate) async fn due(&mut self) {
		self.deadline.elapsed().await
	}

	/// Call once [`due`](Self::due) resolves. Decides whether to ping or to
	/// report a timed-out pong, and rearms the deadline either way.
	pub(crate) fn fire(&mut self) -> KeepaliveAction {
		self.deadline.restart();

		if self.pending_pong {
			KeepaliveAction::TimedOut
		} else {
			self.pending_pong = true;

			KeepaliveAction::SendPing
		}
	}

	/// Call when a pong frame is received.
	pub(crate) fn on_pong(&mut self) {
		self.pending_pong = false;
	}

	/// Call on every inbound or outbound message, ping or pong included.
	/// When `deferPingsOnActivity` is set, this pushes the next ping out
	/// without clearing a pong already in flight.
	pub(crate) fn on_activity(&mut self) {
		if self.defer_on_activity {
			self.deadline.restart_with_duration(self.ping_interval);
		}
	}
}

// --------------------------------------------------------------------------------

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn fires_a_ping_then_times_out_if_no_pong_arrives() {
		let mut engine = KeepaliveEngine::new(Duration::from_millis(10), false);

		engine.due().await;
		assert!(matches!(engine.fire(), KeepaliveAction::SendPing));

		engine.due().await;
		assert!(matches!(engine.fire(), KeepaliveAction::TimedOut));
	}

	#[tokio::test(start_paused = true)]
	async fn a_pong_clears_the_pending_flag_before_the_next_fire() {
		let mut engine = KeepaliveEngine::new(Duration::from_millis(10), false);

		engine.due().await;
		assert!(matches!(engine.fire(), KeepaliveAction::SendPing));

		engine.on_pong();

		engine.due().await;
		assert!(matches!(engine.fire(), KeepaliveAction::SendPing));
	}

	#[tokio::test(start_paused = true)]
	async fn activity_defers_the_next_ping_without_clearing_pending_pong() {
		let mut engine = KeepaliveEngine::new(Duration::from_millis(10), true);

		engine.due().await;
		assert!(matches!(engine.fire(), KeepaliveAction::SendPing));

		tokio::time::sleep(Duration::from_millis(5)).await;
		engine.on_activity();

		let timed_out = tokio::time::timeout(Duration::from_millis(8), engine.due()).await;
		assert!(timed_out.is_err(), "activity should have pushed the deadline out");
	}
}
