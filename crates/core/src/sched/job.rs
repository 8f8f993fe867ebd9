use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ctx::Context;
use crate::err::{CancelReason, Error, ErrorInfo};
use crate::sched::task::TaskBody;

static JOB_IDS: AtomicU64 = AtomicU64::new(0);

/// The lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
	Created = 0,
	Submitted = 1,
	Running = 2,
	WaitingOnDurability = 3,
	Finishing = 4,
	Done = 5,
	CancelRequested = 6,
	Aborted = 7,
}

impl JobState {
	fn from_u8(value: u8) -> JobState {
		match value {
			1 => Self::Submitted,
			2 => Self::Running,
			3 => Self::WaitingOnDurability,
			4 => Self::Finishing,
			5 => Self::Done,
			6 => Self::CancelRequested,
			7 => Self::Aborted,
			_ => Self::Created,
		}
	}
}

/// The callback fired exactly once when a job's teardown publishes
/// its result. `None` reports success.
pub type CompletionCallback = Box<dyn FnOnce(Option<ErrorInfo>) + Send>;

/// One executing statement: task accounting, the teardown trigger and
/// the completion callback.
pub struct Job {
	id: u64,
	context: Context,
	state: AtomicU8,
	/// Tasks submitted but not yet completed, teardown excluded
	live_tasks: AtomicUsize,
	teardown_submitted: AtomicBool,
	callback_fired: AtomicBool,
	/// The teardown body, taken exactly once when the live count
	/// drains to zero
	teardown: Mutex<Option<TaskBody>>,
	completion: Mutex<Option<CompletionCallback>>,
}

impl Job {
	/// Create a job for a request with its teardown body and
	/// completion callback.
	pub fn new(context: Context, teardown: TaskBody, completion: CompletionCallback) -> Arc<Self> {
		Arc::new(Self {
			id: JOB_IDS.fetch_add(1, Ordering::Relaxed) + 1,
			context,
			state: AtomicU8::new(JobState::Created as u8),
			live_tasks: AtomicUsize::new(0),
			teardown_submitted: AtomicBool::new(false),
			callback_fired: AtomicBool::new(false),
			teardown: Mutex::new(Some(teardown)),
			completion: Mutex::new(Some(completion)),
		})
	}

	/// The job id.
	pub fn id(&self) -> u64 {
		self.id
	}

	/// The request context of the job.
	pub fn context(&self) -> &Context {
		&self.context
	}

	/// The lifecycle state.
	pub fn state(&self) -> JobState {
		JobState::from_u8(self.state.load(Ordering::Acquire))
	}

	pub(crate) fn set_state(&self, state: JobState) {
		self.state.store(state as u8, Ordering::Release);
	}

	/// Request cancellation: flips the per-job flag; tasks observe it
	/// on entry and short-circuit to completion.
	pub fn cancel(&self, reason: CancelReason) {
		self.context.cancel(reason);
		self.set_state(JobState::CancelRequested);
	}

	/// Whether cancellation has been requested.
	pub fn is_cancel_requested(&self) -> bool {
		self.context.is_cancelled()
	}

	/// Record the cancellation error on the request if no earlier
	/// error claimed the slot.
	pub(crate) fn record_cancellation(&self) {
		if !self.context.has_error() {
			let reason = match self.context.done_reason() {
				Some(crate::ctx::Reason::Timedout) => CancelReason::Deadline,
				Some(crate::ctx::Reason::Canceled(reason)) => reason,
				None => CancelReason::User,
			};
			self.context.record_error(error_info!(Error::Cancelled {
				reason
			}));
		}
	}

	/// Account a newly submitted task.
	pub(crate) fn task_submitted(&self) {
		self.live_tasks.fetch_add(1, Ordering::AcqRel);
		if self.state() == JobState::Created || self.state() == JobState::Submitted {
			self.set_state(JobState::Running);
		}
	}

	/// Account a completed task. Returns the teardown body when this
	/// was the last live task: the teardown is enqueued exactly once
	/// per job.
	pub(crate) fn task_finished(&self) -> Option<TaskBody> {
		let remaining = self.live_tasks.fetch_sub(1, Ordering::AcqRel) - 1;
		if remaining > 0 {
			return None;
		}
		self.take_teardown()
	}

	/// Take the teardown body if it has not been taken yet.
	pub(crate) fn take_teardown(&self) -> Option<TaskBody> {
		if self
			.teardown_submitted
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
		{
			self.set_state(JobState::Finishing);
			self.teardown.lock().take()
		} else {
			None
		}
	}

	/// Publish the job result and fire the completion callback. Fires
	/// exactly once regardless of how many times it is called.
	pub fn publish_result(&self) {
		if self
			.callback_fired
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			return;
		}
		let error = self.context.take_error();
		let aborted = matches!(error.as_ref().map(|e| e.error()), Some(Error::Cancelled { .. }));
		self.set_state(if aborted {
			JobState::Aborted
		} else {
			JobState::Done
		});
		if let Some(callback) = self.completion.lock().take() {
			callback(error);
		}
	}

	/// The number of live tasks, teardown excluded.
	pub fn live_tasks(&self) -> usize {
		self.live_tasks.load(Ordering::Acquire)
	}
}

impl std::fmt::Debug for Job {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Job")
			.field("id", &self.id)
			.field("state", &self.state())
			.field("live_tasks", &self.live_tasks())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ctx::RequestContext;
	use crate::sched::task::TaskResult;

	fn job(flag: Arc<AtomicUsize>) -> Arc<Job> {
		Job::new(
			Arc::new(RequestContext::background()),
			Box::new(|| TaskResult::Complete),
			Box::new(move |_| {
				flag.fetch_add(1, Ordering::AcqRel);
			}),
		)
	}

	#[test]
	fn teardown_is_taken_exactly_once() {
		let fired = Arc::new(AtomicUsize::new(0));
		let job = job(fired);
		job.task_submitted();
		job.task_submitted();
		assert!(job.task_finished().is_none());
		assert!(job.task_finished().is_some());
		// A later drain to zero cannot take the teardown again
		job.task_submitted();
		assert!(job.task_finished().is_none());
	}

	#[test]
	fn completion_fires_exactly_once() {
		let fired = Arc::new(AtomicUsize::new(0));
		let job = job(fired.clone());
		job.publish_result();
		job.publish_result();
		assert_eq!(fired.load(Ordering::Acquire), 1);
		assert_eq!(job.state(), JobState::Done);
	}

	#[test]
	fn cancellation_records_a_distinguished_error() {
		let fired = Arc::new(AtomicUsize::new(0));
		let job = job(fired);
		job.cancel(CancelReason::User);
		job.record_cancellation();
		assert!(job.context().has_error());
		job.publish_result();
		assert_eq!(job.state(), JobState::Aborted);
	}
}
