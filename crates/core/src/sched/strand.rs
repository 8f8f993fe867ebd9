use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sched::task::Task;

/// A strand serializes a subset of tasks inside one job while other
/// strands run in parallel: within a strand, submission order equals
/// execution order. Tasks join a strand at construction and never
/// change strands.
#[derive(Clone)]
pub struct Strand {
	inner: Arc<StrandInner>,
}

struct StrandInner {
	queue: Mutex<VecDeque<Task>>,
	/// Whether a drainer for this strand is currently scheduled
	scheduled: AtomicBool,
}

impl Strand {
	/// Create a new empty strand.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(StrandInner {
				queue: Mutex::new(VecDeque::new()),
				scheduled: AtomicBool::new(false),
			}),
		}
	}

	/// Enqueue a task on the strand. Returns whether the caller must
	/// schedule a drainer: only one drainer is in flight per strand.
	pub(crate) fn enqueue(&self, task: Task) -> bool {
		self.inner.queue.lock().push_back(task);
		self.inner
			.scheduled
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	/// Push a yielded task back to the tail of the strand queue.
	pub(crate) fn requeue(&self, task: Task) {
		self.inner.queue.lock().push_back(task);
	}

	/// Pop the next task in submission order.
	pub(crate) fn pop(&self) -> Option<Task> {
		self.inner.queue.lock().pop_front()
	}

	/// Mark the drainer finished. Returns whether new work arrived in
	/// the meantime and the caller must schedule another drainer.
	pub(crate) fn finish_drain(&self) -> bool {
		self.inner.scheduled.store(false, Ordering::Release);
		// Re-check for tasks enqueued between the last pop and the
		// flag reset; exactly one caller wins the re-schedule
		if !self.inner.queue.lock().is_empty() {
			return self
				.inner
				.scheduled
				.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
				.is_ok();
		}
		false
	}

	/// Whether the strand has no queued tasks.
	pub fn is_drained(&self) -> bool {
		self.inner.queue.lock().is_empty()
	}
}

impl Default for Strand {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for Strand {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Strand").field("drained", &self.is_drained()).finish()
	}
}
