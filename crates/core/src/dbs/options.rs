use std::time::Duration;

use crate::cnf::STATEMENT_TIMEOUT_MS;

/// Per-request execution options.
#[derive(Debug, Clone)]
pub struct Options {
	/// How many sibling tasks drive a parallelizable scan step. The
	/// tasks share a strand so storage access stays serialized while
	/// other strands run in parallel.
	pub scan_parallelism: usize,
	/// The request deadline; `None` disables the timeout.
	pub timeout: Option<Duration>,
	/// Lightweight requests route to the serial scheduler under the
	/// hybrid policy.
	pub lightweight: bool,
	/// The global zone offset in minutes applied to zoneless temporal
	/// casts in this request.
	pub zone_offset_minutes: i16,
}

impl Default for Options {
	fn default() -> Self {
		let timeout = match *STATEMENT_TIMEOUT_MS {
			0 => None,
			ms => Some(Duration::from_millis(ms)),
		};
		Self {
			scan_parallelism: 1,
			timeout,
			lightweight: false,
			zone_offset_minutes: 0,
		}
	}
}

impl Options {
	/// Options with an explicit scan parallelism.
	pub fn with_scan_parallelism(mut self, parallelism: usize) -> Self {
		self.scan_parallelism = parallelism.max(1);
		self
	}

	/// Options with an explicit timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Flag the request lightweight.
	pub fn with_lightweight(mut self, lightweight: bool) -> Self {
		self.lightweight = lightweight;
		self
	}
}
