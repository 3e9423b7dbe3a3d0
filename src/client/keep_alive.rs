use std::time::{Duration, Instant};

/// A deadline-based keep alive ticker.
///
/// The ticker never spawns anything; it is advanced by whoever owns the
/// session calling [`poll`](KeepAlive::poll) with the current time.
#[derive(Debug, Default)]
pub struct KeepAlive {
	period: Option<Duration>,
	deadline: Option<Instant>,
}

impl KeepAlive {
	/// Creates a stopped ticker. A `period` of `None` never fires.
	pub fn new(period: Option<Duration>) -> Self {
		Self {
			period,
			deadline: None,
		}
	}

	#[inline]
	pub fn period(&self) -> Option<Duration> {
		self.period
	}

	/// Changes the period. A running ticker is restarted from `now`.
	pub fn set_period(&mut self, period: Option<Duration>, now: Instant) {
		self.period = period;
		if self.is_running() {
			self.start(now);
		}
	}

	/// Arms the ticker so it first fires one period after `now`.
	pub fn start(&mut self, now: Instant) {
		self.deadline = self.period.map(|period| now + period);
	}

	pub fn stop(&mut self) {
		self.deadline = None;
	}

	#[inline]
	pub fn is_running(&self) -> bool {
		self.deadline.is_some()
	}

	/// Returns `true` at most once per elapsed period.
	///
	/// Periods missed entirely while nobody polled are collapsed into a single
	/// tick.
	pub fn poll(&mut self, now: Instant) -> bool {
		match (self.deadline, self.period) {
			(Some(deadline), Some(period)) if now >= deadline => {
				let mut next = deadline + period;
				if next <= now {
					next = now + period;
				}
				self.deadline = Some(next);
				true
			}
			_ => false,
		}
	}

	/// Time left until the next tick, or `None` while stopped.
	pub fn remaining(&self, now: Instant) -> Option<Duration> {
		self.deadline
			.map(|deadline| deadline.saturating_duration_since(now))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const PERIOD: Duration = Duration::from_secs(60);

	#[test]
	fn fires_once_per_period() {
		let start = Instant::now();
		let mut ticker = KeepAlive::new(Some(PERIOD));
		assert!(!ticker.poll(start + PERIOD), "stopped ticker fired");

		ticker.start(start);
		assert!(!ticker.poll(start + PERIOD / 2));
		assert_eq!(ticker.remaining(start + PERIOD / 2), Some(PERIOD / 2));
		assert!(ticker.poll(start + PERIOD));
		assert!(!ticker.poll(start + PERIOD));
		assert!(ticker.poll(start + PERIOD * 2));
	}

	#[test]
	fn missed_periods_collapse() {
		let start = Instant::now();
		let mut ticker = KeepAlive::new(Some(PERIOD));
		ticker.start(start);

		let late = start + PERIOD * 5 + Duration::from_secs(1);
		assert!(ticker.poll(late));
		assert!(!ticker.poll(late));
		assert_eq!(ticker.remaining(late), Some(PERIOD));
	}

	#[test]
	fn disabled_and_stopped() {
		let start = Instant::now();
		let mut disabled = KeepAlive::new(None);
		disabled.start(start);
		assert!(!disabled.is_running());
		assert!(!disabled.poll(start + PERIOD * 10));

		let mut ticker = KeepAlive::new(Some(PERIOD));
		ticker.start(start);
		ticker.stop();
		assert!(!ticker.poll(start + PERIOD));
		assert_eq!(ticker.remaining(start), None);
	}
}
