//! Statement execution: turns an executable statement into a job on
//! the scheduler.
//!
//! For each statement a job is created; the bootstrap task
//! instantiates per-step flows, which submit the operator tasks that
//! read from upstream exchange sources and write to downstream sinks.
//! When the last live task completes, a teardown task publishes the
//! job result and fires the completion callback exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ctx::{Context, RequestContext};
use crate::dbs::channel::DataChannel;
use crate::dbs::options::Options;
use crate::dbs::response::Response;
use crate::err::{CancelReason, Error, ErrorInfo};
use crate::exch::Exchange;
use crate::exec::{analyze, Downstream, ProcessContext, Processor, SharedScan};
use crate::fnc::Registry;
use crate::kvs::{Datastore, Transaction};
use crate::plan::{
	ExecutableStatement, Operator, PreparedStatementCache, StepId, StepKind,
};
use crate::sched::{Job, Scheduler, Strand, Task, TaskKind, TaskResult, TransactionCapability};
use crate::val::Value;

/// The statement executor: the datastore, the scheduler and the
/// prepared statement cache, wired together.
pub struct Executor {
	ds: Datastore,
	scheduler: Scheduler,
	registry: Arc<Registry>,
	prepared: PreparedStatementCache,
}

/// A handle to a running job; resolves when the teardown publishes.
pub struct JobHandle {
	job: Arc<Job>,
	receiver: async_channel::Receiver<(Option<ErrorInfo>, u64)>,
}

impl JobHandle {
	/// The underlying job.
	pub fn job(&self) -> &Arc<Job> {
		&self.job
	}

	/// Request cancellation of the job.
	pub fn cancel(&self) {
		self.job.cancel(CancelReason::User);
	}

	/// Block until the job result is published.
	pub fn wait(&self) -> Response {
		match self.receiver.recv_blocking() {
			Ok((None, rows)) => Response::ok(rows),
			Ok((Some(error), _)) => Response::error(error),
			Err(_) => Response::error(ErrorInfo::from(Error::Unreachable(
				"the job completion channel closed without a result".to_owned(),
			))),
		}
	}
}

impl Executor {
	/// Create an executor over a datastore and scheduler. The
	/// durability manager fans out through `AsyncCommon` tasks on this
	/// scheduler.
	pub fn new(ds: Datastore, scheduler: Scheduler) -> Self {
		{
			let scheduler = scheduler.clone();
			ds.durability().set_submitter(Arc::new(move |body| {
				scheduler.submit(Task::once(TaskKind::AsyncCommon, body));
			}));
		}
		Self {
			ds,
			scheduler,
			registry: Registry::with_builtins(),
			prepared: PreparedStatementCache::new(),
		}
	}

	/// The datastore.
	pub fn datastore(&self) -> &Datastore {
		&self.ds
	}

	/// The scheduler.
	pub fn scheduler(&self) -> &Scheduler {
		&self.scheduler
	}

	/// The function registry.
	pub fn registry(&self) -> &Arc<Registry> {
		&self.registry
	}

	/// The prepared statement cache.
	pub fn prepared(&self) -> &PreparedStatementCache {
		&self.prepared
	}

	/// Execute a statement under a transaction, streaming any result
	/// records into `channel`. Returns a handle resolving when the
	/// job's teardown has published.
	pub fn execute(
		&self,
		statement: &ExecutableStatement,
		tx: Arc<Transaction>,
		parameters: Arc<HashMap<String, Value>>,
		channel: Option<Arc<dyn DataChannel>>,
		options: &Options,
	) -> Result<JobHandle, Error> {
		// The request context carries deadline and cancellation
		let request: Context = Arc::new(
			RequestContext::new(tx.context().session_id(), options.timeout)
				.with_lightweight(options.lightweight)
				.with_zone_offset(options.zone_offset_minutes),
		);
		if !tx.context().state().get().is_active() {
			return Err(Error::InactiveTransaction);
		}
		// Decide the parallelism of every process step up front
		let graph = &statement.graph;
		let mut parallelism: Vec<usize> = vec![1; graph.len()];
		for step in graph.steps() {
			if let StepKind::Process {
				operators,
				..
			} = &step.kind
			{
				if matches!(operators.first(), Some(Operator::Scan { .. })) {
					parallelism[step.id.0] = options.scan_parallelism.max(1);
				}
			}
		}
		// A take-flat step matches the lane count of its forward input
		for step in graph.steps() {
			if let StepKind::Process {
				operators,
				..
			} = &step.kind
			{
				if let Some(Operator::TakeFlat {
					exchange,
					..
				}) = operators.first()
				{
					if let Some(upstream) = graph.step(*exchange).inputs.first() {
						parallelism[step.id.0] = parallelism[upstream.0];
					}
				}
			}
		}
		// Instantiate the exchanges: the sink count is the combined
		// parallelism of the upstream process steps
		let mut exchanges: HashMap<StepId, Exchange> = HashMap::new();
		for step in graph.steps() {
			if let StepKind::Exchange {
				spec,
				meta,
			} = &step.kind
			{
				let sink_count: usize =
					step.inputs.iter().map(|input| parallelism[input.0]).sum::<usize>().max(1);
				let exchange =
					Exchange::from_spec(spec, meta.clone(), sink_count, channel.clone())?;
				exchanges.insert(step.id, exchange);
			}
		}
		let process_ctx = ProcessContext::new(
			request.clone(),
			tx.clone(),
			self.registry.clone(),
			parameters,
			channel,
			exchanges,
		);
		// The job: teardown publishes the result and rolls the
		// transaction back on a true abort
		let (done_tx, done_rx) = async_channel::bounded(1);
		let teardown_ctx = process_ctx.clone();
		let teardown_tx = tx.clone();
		let teardown = Box::new(move || {
			// A failing statement aborts the transaction unless the
			// error is a statement error or warning
			let aborts = teardown_ctx
				.request
				.with_error(|info| info.error().aborts_transaction())
				.unwrap_or(false);
			if aborts {
				if let Err(abort_error) = teardown_tx.abort() {
					warn!("rollback after a failed statement failed: {abort_error}");
				}
			}
			TaskResult::Complete
		});
		let completion_ctx = process_ctx.clone();
		let completion_tx = tx.clone();
		let completion = Box::new(move |error: Option<ErrorInfo>| {
			let error = error.map(|info| {
				let status = completion_tx.context().state().get();
				info.with_tx_status(status)
			});
			let _ = done_tx.send_blocking((error, completion_ctx.rows_affected()));
		});
		let job = Job::new(request.clone(), teardown, completion);
		// Bootstrap: instantiate per-step flows and publish their
		// tasks. A literal-row insert publishes a single write driver
		// task instead of a graph flow.
		let scheduler = self.scheduler.clone();
		let graph = statement.graph.clone();
		let bootstrap_job = job.clone();
		let bootstrap_ctx = process_ctx;
		let writes = statement.kind == crate::plan::StatementKind::Write;
		let write_values = statement.write_values.clone();
		let bootstrap = Task::once(TaskKind::Bootstrap, move || {
			let spawned = match write_values {
				Some(write) => {
					spawn_write_driver(&scheduler, write, &bootstrap_ctx, &bootstrap_job);
					Ok(())
				}
				None => spawn_flows(
					&scheduler,
					&graph,
					&parallelism,
					&bootstrap_ctx,
					&bootstrap_job,
					writes,
				),
			};
			if let Err(error) = spawned {
				record_failure(&bootstrap_ctx, &error);
				bootstrap_job.cancel(CancelReason::Fatal);
			}
		})
		.with_job(job.clone());
		self.scheduler.submit(bootstrap);
		Ok(JobHandle {
			job,
			receiver: done_rx,
		})
	}
}

/// Record a task failure: the first error wins on the request, and a
/// true abort also lands on the transaction context.
fn record_failure(ctx: &Arc<ProcessContext>, error: &Error) {
	let info = error_info!(clone_error(error));
	let tx_state = ctx.tx.context().state().get();
	ctx.tx.context().record_error(error_info!(clone_error(error)));
	ctx.request.record_error(info.with_tx_status(tx_state));
}

/// Errors are not `Clone`; rebuild the ones task bodies can surface.
fn clone_error(error: &Error) -> Error {
	match error {
		Error::ExpressionEvaluation {
			kind,
			expression,
		} => Error::ExpressionEvaluation {
			kind: *kind,
			expression: expression.clone(),
		},
		Error::UniqueConstraintViolation {
			table,
		} => Error::UniqueConstraintViolation {
			table: table.clone(),
		},
		Error::NotNullViolation {
			column,
		} => Error::NotNullViolation {
			column: column.clone(),
		},
		Error::Cancelled {
			reason,
		} => Error::Cancelled {
			reason: *reason,
		},
		Error::TableNotFound {
			name,
		} => Error::TableNotFound {
			name: name.clone(),
		},
		Error::ColumnNotFound {
			name,
		} => Error::ColumnNotFound {
			name: name.clone(),
		},
		Error::WriteWithoutPreserve {
			table,
		} => Error::WriteWithoutPreserve {
			table: table.clone(),
		},
		Error::WritePreserveConflict {
			table,
		} => Error::WritePreserveConflict {
			table: table.clone(),
		},
		Error::ReadAreaViolation {
			table,
		} => Error::ReadAreaViolation {
			table: table.clone(),
		},
		Error::TypeMismatch {
			expected,
			actual,
		} => Error::TypeMismatch {
			expected: expected.clone(),
			actual: actual.clone(),
		},
		Error::InactiveTransaction => Error::InactiveTransaction,
		Error::NotFound => Error::NotFound,
		Error::TxRetryable => Error::TxRetryable,
		Error::TxKeyAlreadyExists => Error::TxKeyAlreadyExists,
		Error::TxReadonly => Error::TxReadonly,
		Error::MismatchKey => Error::MismatchKey,
		Error::IncompleteColumns => Error::IncompleteColumns,
		Error::Timeout => Error::Timeout,
		Error::UserRollback => Error::UserRollback,
		Error::WaitingForOtherTransaction => Error::WaitingForOtherTransaction,
		Error::SequenceOutOfBounds {
			name,
		} => Error::SequenceOutOfBounds {
			name: name.clone(),
		},
		Error::UnboundPlaceholder {
			name,
		} => Error::UnboundPlaceholder {
			name: name.clone(),
		},
		other => Error::Unreachable(other.to_string()),
	}
}

/// Submit the single bulk write driver task of an INSERT ... VALUES
/// statement.
fn spawn_write_driver(
	scheduler: &Scheduler,
	write: crate::plan::WriteValues,
	ctx: &Arc<ProcessContext>,
	job: &Arc<Job>,
) {
	let task_ctx = ctx.clone();
	let task_job = job.clone();
	// The statement has no block variables; expressions evaluate
	// against an empty table
	let variables = crate::exec::VariableTable::new(
		Arc::new(crate::record::RecordMeta::new(Vec::new(), Vec::new())),
		Vec::new(),
	);
	let body = Box::new(move || {
		let run = || -> Result<(), Error> {
			let handle = task_ctx.table(&write.table)?;
			let failed = parking_lot::Mutex::new(None);
			let eval_ctx = crate::exec::EvalContext {
				variables: &variables,
				registry: &task_ctx.registry,
				parameters: &task_ctx.parameters,
				tx_start: task_ctx.tx.context().started_at(),
				zone_offset_minutes: task_ctx.request.zone_offset_minutes(),
				loss_policy: crate::val::LossPolicy::Error,
				lenient: false,
				failed: &failed,
			};
			for row in &write.rows {
				let values = row
					.iter()
					.map(|expr| crate::exec::evaluate_checked(expr, &eval_ctx))
					.collect::<Result<Vec<_>, Error>>()?;
				if handle.insert(&task_ctx.tx, &values, write.kind)? {
					task_ctx.add_rows_affected(1);
				}
			}
			Ok(())
		};
		if let Err(error) = run() {
			record_failure(&task_ctx, &error);
			task_job.cancel(CancelReason::Fatal);
		}
		TaskResult::Complete
	});
	scheduler.submit(
		Task::new(TaskKind::Write, body)
			.with_capability(TransactionCapability::READ_WRITE)
			.with_job(job.clone()),
	);
}

/// Instantiate the flows of every process step and submit their
/// tasks.
fn spawn_flows(
	scheduler: &Scheduler,
	graph: &crate::plan::StepGraph,
	parallelism: &[usize],
	ctx: &Arc<ProcessContext>,
	job: &Arc<Job>,
	writes: bool,
) -> Result<(), Error> {
	for step in graph.steps() {
		let StepKind::Process {
			operators,
			variables,
		} = &step.kind
		else {
			continue;
		};
		let blocks = analyze(operators, variables)?;
		let Some(block) = blocks.into_iter().next() else {
			continue;
		};
		let block = Arc::new(block);
		let operators = Arc::new(operators.clone());
		let tasks = parallelism[step.id.0];
		// The exchanges this step offers into close when the last
		// sibling task completes
		let offers: Vec<Exchange> = operators
			.iter()
			.filter_map(|op| match op {
				Operator::Offer {
					exchange,
					..
				} => ctx.exchange(*exchange).ok().cloned(),
				_ => None,
			})
			.collect();
		let downstream = Downstream::new(tasks, offers);
		// Sibling tasks of a parallelized step share a strand so the
		// transaction sees serialized access
		let strand = (tasks > 1).then(Strand::new);
		let shared_scan = (tasks > 1).then(SharedScan::new);
		let capability = if writes {
			TransactionCapability::READ_WRITE
		} else {
			TransactionCapability::READ
		};
		for lane in 0..tasks {
			let mut processor = Processor::new(
				ctx.clone(),
				operators.clone(),
				block.clone(),
				lane,
				shared_scan.clone(),
				downstream.clone(),
			);
			let task_ctx = ctx.clone();
			let task_job = job.clone();
			let body = Box::new(move || match processor.run_slot() {
				Ok(result) => result,
				Err(error) => {
					record_failure(&task_ctx, &error);
					task_job.cancel(CancelReason::Fatal);
					if let Err(cleanup) = processor.finish() {
						debug!("processor cleanup after failure failed: {cleanup}");
					}
					TaskResult::Complete
				}
			});
			let mut task = Task::new(TaskKind::Wrapped, body)
				.with_capability(capability)
				.with_job(job.clone());
			if let Some(strand) = &strand {
				task = task.with_strand(strand.clone());
			}
			scheduler.submit(task);
		}
	}
	Ok(())
}
