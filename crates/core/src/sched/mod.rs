//! The task scheduler: a bounded worker pool plus submission
//! policies.
//!
//! Three variants are selectable: `Parallel` runs tasks on a worker
//! pool, `Serial` runs everything on one worker in FIFO order, and
//! `Hybrid` routes lightweight requests to the serial worker while
//! everything else runs in parallel. Tasks are cooperative: a body
//! runs to completion or returns [`TaskResult::Yield`] to be
//! re-queued; nothing is pre-empted. Cancellation and deadlines are
//! observed at task boundaries.

mod job;
mod strand;
mod task;

pub use job::{CompletionCallback, Job, JobState};
pub use strand::Strand;
pub use task::{Task, TaskBody, TaskId, TaskKind, TaskResult, TransactionCapability};

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::cnf::{STRAND_DRAIN_LIMIT, WORKER_THREADS};

/// The submission policy of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
	/// A worker pool; tasks run in parallel
	Parallel,
	/// One worker; tasks run in FIFO order
	Serial,
	/// Lightweight requests run serially, the rest in parallel
	Hybrid,
}

/// A handle to a scheduler. Cloning shares the same worker pool.
#[derive(Clone)]
pub struct Scheduler {
	inner: Arc<Inner>,
}

struct Inner {
	policy: SchedulerPolicy,
	parallel: Option<Pool>,
	serial: Option<Pool>,
}

struct Pool {
	sender: async_channel::Sender<Task>,
	workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
	/// Spawn a pool with the given number of workers.
	fn spawn(name: &str, threads: usize) -> Pool {
		let (sender, receiver) = async_channel::unbounded::<Task>();
		let mut workers = Vec::with_capacity(threads);
		for index in 0..threads {
			let receiver = receiver.clone();
			let sender = sender.clone();
			let worker = std::thread::Builder::new()
				.name(format!("{name}-{index}"))
				.spawn(move || {
					while let Ok(task) = receiver.recv_blocking() {
						execute(task, &sender);
					}
				})
				.expect("failed to spawn a scheduler worker");
			workers.push(worker);
		}
		Pool {
			sender,
			workers: Mutex::new(workers),
		}
	}

	fn submit(&self, task: Task) {
		submit_to(&self.sender, task);
	}

	fn shutdown(&self) {
		self.sender.close();
		for worker in self.workers.lock().drain(..) {
			let _ = worker.join();
		}
	}
}

/// Submit a task to a pool queue, routing strand members through
/// their strand so only one member runs at a time.
fn submit_to(sender: &async_channel::Sender<Task>, mut task: Task) {
	if let Some(job) = task.job() {
		job.task_submitted();
	}
	if let Some(strand) = task.strand().cloned() {
		if strand.enqueue(task) {
			// This submission won the right to schedule the drainer
			let drainer = drainer_task(strand, sender.clone());
			let _ = sender.send_blocking(drainer);
		}
		return;
	}
	let _ = sender.send_blocking(task);
}

/// Build the task which drains a strand serially. The drainer itself
/// never short-circuits on cancellation: its member tasks observe the
/// flag individually so their accounting still runs.
fn drainer_task(strand: Strand, sender: async_channel::Sender<Task>) -> Task {
	Task::new(
		TaskKind::AsyncCommon,
		Box::new(move || {
			let mut drained = 0;
			while drained < *STRAND_DRAIN_LIMIT {
				match strand.pop() {
					Some(member) => {
						execute_member(member, &strand, &sender);
						drained += 1;
					}
					None => break,
				}
			}
			if strand.finish_drain() {
				// More work arrived; run another drain slot
				let again = drainer_task(strand.clone(), sender.clone());
				let _ = sender.send_blocking(again);
			}
			TaskResult::Complete
		}),
	)
}

/// Run one pool task to a boundary.
fn execute(mut task: Task, sender: &async_channel::Sender<Task>) {
	if observe_boundary(&task) {
		finish(task, sender);
		return;
	}
	loop {
		match task.run_slot() {
			TaskResult::Proceed => continue,
			TaskResult::Yield => {
				let _ = sender.send_blocking(task);
				return;
			}
			TaskResult::Complete => {
				finish(task, sender);
				return;
			}
		}
	}
}

/// Run one strand member to a boundary; yields go back to the strand
/// tail so submission order is preserved.
fn execute_member(mut task: Task, strand: &Strand, sender: &async_channel::Sender<Task>) {
	if observe_boundary(&task) {
		finish(task, sender);
		return;
	}
	loop {
		match task.run_slot() {
			TaskResult::Proceed => continue,
			TaskResult::Yield => {
				strand.requeue(task);
				return;
			}
			TaskResult::Complete => {
				finish(task, sender);
				return;
			}
		}
	}
}

/// The per-boundary checks: deadline expiry and the cancel flag.
/// Returns whether the task short-circuits to completion.
fn observe_boundary(task: &Task) -> bool {
	let Some(job) = task.job() else {
		return false;
	};
	job.context().check_deadline();
	if task.kind().observes_cancellation() && job.is_cancel_requested() {
		trace!("{} short-circuits on a cancelled job", task.id());
		job.record_cancellation();
		return true;
	}
	false
}

/// Complete a task: job accounting runs, and the teardown is enqueued
/// when this was the last live task of its job. The teardown publishes
/// the job result and fires the completion callback exactly once.
fn finish(mut task: Task, sender: &async_channel::Sender<Task>) {
	// Dropping the strand handle here keeps yielded members intact
	task.take_strand();
	if let Some(job) = task.job().cloned() {
		if let Some(mut teardown) = job.task_finished() {
			debug!("job {} drained; scheduling teardown", job.id());
			let body: TaskBody = Box::new(move || {
				let result = teardown();
				if result == TaskResult::Complete {
					job.publish_result();
				}
				result
			});
			let _ = sender.send_blocking(Task::new(TaskKind::Teardown, body));
		}
	}
}

impl Scheduler {
	/// Create a scheduler with the given policy. The parallel pool is
	/// sized from configuration.
	pub fn new(policy: SchedulerPolicy) -> Self {
		Self::with_threads(policy, *WORKER_THREADS)
	}

	/// Create a scheduler with an explicit parallel pool size.
	pub fn with_threads(policy: SchedulerPolicy, threads: usize) -> Self {
		let threads = threads.max(1);
		let (parallel, serial) = match policy {
			SchedulerPolicy::Parallel => (Some(Pool::spawn("trellis-worker", threads)), None),
			SchedulerPolicy::Serial => (None, Some(Pool::spawn("trellis-serial", 1))),
			SchedulerPolicy::Hybrid => (
				Some(Pool::spawn("trellis-worker", threads)),
				Some(Pool::spawn("trellis-serial", 1)),
			),
		};
		info!("starting {policy:?} scheduler with {threads} worker threads");
		Self {
			inner: Arc::new(Inner {
				policy,
				parallel,
				serial,
			}),
		}
	}

	/// The policy of this scheduler.
	pub fn policy(&self) -> SchedulerPolicy {
		self.inner.policy
	}

	/// Submit a task. Recursive submission from inside a running task
	/// is supported by every policy.
	pub fn submit(&self, task: Task) {
		match self.inner.policy {
			SchedulerPolicy::Parallel => {
				self.inner.parallel.as_ref().expect("parallel pool").submit(task)
			}
			SchedulerPolicy::Serial => {
				self.inner.serial.as_ref().expect("serial pool").submit(task)
			}
			SchedulerPolicy::Hybrid => {
				// Route per request: lightweight requests run serially
				let lightweight = task
					.job()
					.map(|job| job.context().is_lightweight())
					.unwrap_or(false);
				if lightweight {
					self.inner.serial.as_ref().expect("serial pool").submit(task)
				} else {
					self.inner.parallel.as_ref().expect("parallel pool").submit(task)
				}
			}
		}
	}

	/// Stop accepting tasks and join every worker.
	pub fn shutdown(&self) {
		if let Some(pool) = &self.inner.parallel {
			pool.shutdown();
		}
		if let Some(pool) = &self.inner.serial {
			pool.shutdown();
		}
	}
}
