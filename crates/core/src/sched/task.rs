use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::sched::job::Job;
use crate::sched::strand::Strand;

/// The global task id counter.
static TASK_IDS: AtomicU64 = AtomicU64::new(0);

/// A stable task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
	fn next() -> Self {
		Self(TASK_IDS.fetch_add(1, Ordering::Relaxed) + 1)
	}

	/// The numeric id.
	pub fn get(&self) -> u64 {
		self.0
	}
}

impl std::fmt::Display for TaskId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "task-{}", self.0)
	}
}

/// What a task body tells the scheduler after a slot of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
	/// The task is finished
	Complete,
	/// Re-queue the task and give the worker back
	Yield,
	/// Run the body again immediately
	Proceed,
}

/// The kind of a scheduled unit. Every unit of work in the engine is
/// one of these flat variants; dispatch is by match, never downcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
	/// Advances the step-graph controller on notifications
	DagEvents,
	/// The first task of a job; prepares operator state
	Bootstrap,
	/// The final task of a job; publishes the result
	Teardown,
	/// Resolves a late-bound prepared statement
	Resolve,
	/// An operator task with a closure body
	Wrapped,
	/// A bulk write statement driver
	Write,
	/// A streaming loader
	Load,
	/// A custom asynchronous body, e.g. the durability fan-out
	AsyncCommon,
}

impl TaskKind {
	/// Whether a task of this kind short-circuits on a cancelled job.
	/// Teardown and async bodies still run so results get published
	/// and durability responses fire.
	pub fn observes_cancellation(self) -> bool {
		!matches!(self, TaskKind::Teardown | TaskKind::AsyncCommon)
	}
}

/// A summary of the transactional reach of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionCapability {
	pub reads: bool,
	pub writes: bool,
}

impl TransactionCapability {
	/// A task which performs no transactional IO.
	pub const NONE: TransactionCapability = TransactionCapability {
		reads: false,
		writes: false,
	};

	/// A task which only reads.
	pub const READ: TransactionCapability = TransactionCapability {
		reads: true,
		writes: false,
	};

	/// A task which reads and writes.
	pub const READ_WRITE: TransactionCapability = TransactionCapability {
		reads: true,
		writes: true,
	};
}

/// The body of a task: a closure driven repeatedly by the scheduler
/// until it reports completion.
pub type TaskBody = Box<dyn FnMut() -> TaskResult + Send>;

/// A flat scheduled unit.
pub struct Task {
	id: TaskId,
	kind: TaskKind,
	body: TaskBody,
	transactional_io: bool,
	capability: TransactionCapability,
	strand: Option<Strand>,
	job: Option<Arc<Job>>,
}

impl Task {
	/// Create a task of the given kind.
	pub fn new(kind: TaskKind, body: TaskBody) -> Self {
		Self {
			id: TaskId::next(),
			kind,
			body,
			transactional_io: false,
			capability: TransactionCapability::NONE,
			strand: None,
			job: None,
		}
	}

	/// Create a one-shot task from a plain closure.
	pub fn once(kind: TaskKind, body: impl FnOnce() + Send + 'static) -> Self {
		let mut body = Some(body);
		Self::new(
			kind,
			Box::new(move || {
				if let Some(body) = body.take() {
					body();
				}
				TaskResult::Complete
			}),
		)
	}

	/// Declare the transactional IO of this task.
	pub fn with_capability(mut self, capability: TransactionCapability) -> Self {
		self.transactional_io = capability.reads || capability.writes;
		self.capability = capability;
		self
	}

	/// Attach the task to a strand. Strands are assigned at
	/// construction and never changed afterwards.
	pub fn with_strand(mut self, strand: Strand) -> Self {
		self.strand = Some(strand);
		self
	}

	/// Attach the task to a job for lifecycle accounting.
	pub fn with_job(mut self, job: Arc<Job>) -> Self {
		self.job = Some(job);
		self
	}

	/// The stable id of this task.
	pub fn id(&self) -> TaskId {
		self.id
	}

	/// The kind of this task.
	pub fn kind(&self) -> TaskKind {
		self.kind
	}

	/// Whether the task performs transactional IO.
	pub fn has_transactional_io(&self) -> bool {
		self.transactional_io
	}

	/// The transactional reach of this task.
	pub fn transaction_capability(&self) -> TransactionCapability {
		self.capability
	}

	/// The strand this task is a member of, if any.
	pub(crate) fn strand(&self) -> Option<&Strand> {
		self.strand.as_ref()
	}

	pub(crate) fn take_strand(&mut self) -> Option<Strand> {
		self.strand.take()
	}

	pub(crate) fn job(&self) -> Option<&Arc<Job>> {
		self.job.as_ref()
	}

	/// Drive the body one slot.
	pub(crate) fn run_slot(&mut self) -> TaskResult {
		(self.body)()
	}
}

impl std::fmt::Debug for Task {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Task")
			.field("id", &self.id)
			.field("kind", &self.kind)
			.field("transactional_io", &self.transactional_io)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn task_ids_are_unique() {
		let a = Task::new(TaskKind::Wrapped, Box::new(|| TaskResult::Complete));
		let b = Task::new(TaskKind::Wrapped, Box::new(|| TaskResult::Complete));
		assert_ne!(a.id(), b.id());
	}

	#[test]
	fn capability_implies_transactional_io() {
		let task = Task::new(TaskKind::Write, Box::new(|| TaskResult::Complete))
			.with_capability(TransactionCapability::READ_WRITE);
		assert!(task.has_transactional_io());
		assert!(task.transaction_capability().writes);
	}

	#[test]
	fn teardown_ignores_cancellation() {
		assert!(TaskKind::Wrapped.observes_cancellation());
		assert!(TaskKind::Bootstrap.observes_cancellation());
		assert!(!TaskKind::Teardown.observes_cancellation());
		assert!(!TaskKind::AsyncCommon.observes_cancellation());
	}
}
