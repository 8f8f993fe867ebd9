//! The flow processor: interprets a process step's operator pipeline
//! as a cooperative task body.
//!
//! The first operator of a block drives it: a scan pulls batches from
//! the storage engine, a take polls its exchange, a find looks up one
//! row. Every produced row runs through the downstream operators in
//! order; filters drop rows under three-valued logic, joins may fan
//! one row out into several, and terminal operators hand records to
//! an exchange sink, the result channel or the index target. A task
//! yields whenever its input is not ready and completes when its
//! driver is exhausted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cnf::SCAN_BATCH_SIZE;
use crate::err::Error;
use crate::exch::{Exchange, GroupSource, Poll};
use crate::exec::block::Block;
use crate::exec::context::ProcessContext;
use crate::exec::eval::{evaluate_checked, EvalContext};
use crate::exec::variables::VariableTable;
use crate::fnc::AggregateFn;
use crate::mem::{Arena, Discipline};
use crate::plan::{AggregateSpec, Operator, ScanBounds, WritePartialKind};
use crate::sched::TaskResult;
use crate::val::arith::Truth;
use crate::val::{LossPolicy, Value};

/// The shared cursor of a parallelized scan: tasks claim batches
/// under the strand so every key is read exactly once.
pub struct SharedScan {
	resume_after: Option<Vec<u8>>,
	exhausted: bool,
}

impl SharedScan {
	/// A fresh cursor.
	pub fn new() -> Arc<Mutex<SharedScan>> {
		Arc::new(Mutex::new(SharedScan {
			resume_after: None,
			exhausted: false,
		}))
	}
}

/// What still has to happen when the driver of a processor finishes:
/// downstream sinks close when the last sibling task completes.
pub struct Downstream {
	/// Sibling tasks still running this step
	remaining: Arc<AtomicUsize>,
	/// Exchanges this step offers into
	offers: Vec<Exchange>,
}

impl Downstream {
	/// Track a step executed by `parallelism` sibling tasks offering
	/// into the given exchanges.
	pub fn new(parallelism: usize, offers: Vec<Exchange>) -> Arc<Self> {
		Arc::new(Self {
			remaining: Arc::new(AtomicUsize::new(parallelism.max(1))),
			offers,
		})
	}

	/// Declare one sibling finished; the last one closes every sink.
	fn finish(&self) -> Result<(), Error> {
		if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
			return Ok(());
		}
		for exchange in &self.offers {
			match exchange {
				Exchange::Forward(e) => {
					for lane in 0..e.lane_count() {
						e.end_of_input(lane);
					}
				}
				Exchange::Group(e) => e.end_of_input(),
				Exchange::Broadcast(e) => e.end_of_input(),
				Exchange::Aggregate(e) => e.end_of_input()?,
				Exchange::Deliver(_) => {}
			}
		}
		Ok(())
	}
}

/// Per-operator scratch inside one block, keyed by operator index.
/// Holds open cursors and cached handles; dropping the container
/// releases them.
enum Scratch {
	None,
	/// A grouped reader over a shuffle
	Group(GroupSource),
	/// A folded reader over an aggregate exchange
	Aggregate(crate::exch::aggregate::AggregateSource),
	/// The read cursor over a sealed broadcast sequence
	Broadcast(usize),
	/// An open sink feeding records to the data channel
	Sink(crate::exch::deliver::DeliverSink),
}

/// One executing flow task over a process step.
pub struct Processor {
	ctx: Arc<ProcessContext>,
	operators: Arc<Vec<Operator>>,
	block: Arc<Block>,
	variables: VariableTable,
	scratch: Vec<Scratch>,
	/// The lane of this task among its siblings
	lane: usize,
	shared_scan: Option<Arc<Mutex<SharedScan>>>,
	downstream: Arc<Downstream>,
	finished: bool,
}

impl Processor {
	/// Create the processor for one task of a process step.
	pub fn new(
		ctx: Arc<ProcessContext>,
		operators: Arc<Vec<Operator>>,
		block: Arc<Block>,
		lane: usize,
		shared_scan: Option<Arc<Mutex<SharedScan>>>,
		downstream: Arc<Downstream>,
	) -> Self {
		let variables = VariableTable::new(block.meta.clone(), block.mapping.clone());
		let scratch = (0..operators.len()).map(|_| Scratch::None).collect();
		Self {
			ctx,
			operators,
			block,
			variables,
			scratch,
			lane,
			shared_scan,
			downstream,
			finished: false,
		}
	}

	/// Drive one cooperative slot. Errors are handled by the caller's
	/// task wrapper.
	pub fn run_slot(&mut self) -> Result<TaskResult, Error> {
		if self.finished {
			return Ok(TaskResult::Complete);
		}
		let driver_index = self.block.operators.start;
		let driver = self.operators[driver_index].clone();
		match driver {
			Operator::Scan {
				table,
				index,
				bounds,
				columns,
			} => self.drive_scan(&table, index.as_deref(), &bounds, &columns),
			Operator::Find {
				table,
				index: _,
				key,
				columns,
			} => {
				let handle = self.ctx.table(&table)?;
				let key_values = self.eval_all(&key)?;
				let arena = Arena::new(Discipline::Monotonic);
				if let Some(row) = handle.find(&self.ctx.tx, &key_values, &arena)? {
					self.write_columns(&columns, &row)?;
					self.push_row(driver_index + 1)?;
				}
				self.complete()
			}
			Operator::TakeFlat {
				exchange,
				columns,
			} => match self.ctx.exchange(exchange)?.clone() {
				Exchange::Forward(forward) => loop {
					match forward.poll(self.lane) {
						Poll::Pending => return Ok(TaskResult::Yield),
						Poll::End => return self.complete(),
						Poll::Ready(record) => {
							let row = crate::record::unpack(forward.meta(), record);
							self.write_columns(&columns, &row)?;
							self.push_row(driver_index + 1)?;
						}
					}
				},
				// Every broadcast consumer walks the same sealed
				// sequence with its own cursor
				Exchange::Broadcast(broadcast) => {
					if matches!(self.scratch[driver_index], Scratch::None) {
						match broadcast.reader() {
							Poll::Pending => return Ok(TaskResult::Yield),
							_ => self.scratch[driver_index] = Scratch::Broadcast(0),
						}
					}
					loop {
						let cursor = match &self.scratch[driver_index] {
							Scratch::Broadcast(cursor) => *cursor,
							_ => unreachable!(),
						};
						let Some(record) = broadcast.get(cursor) else {
							return self.complete();
						};
						self.scratch[driver_index] = Scratch::Broadcast(cursor + 1);
						let row = crate::record::unpack(broadcast.meta(), record);
						self.write_columns(&columns, &row)?;
						self.push_row(driver_index + 1)?;
					}
				}
				_ => {
					Err(Error::Unreachable(
						"take-flat expects a forward or broadcast exchange".into(),
					))
				}
			},
			Operator::TakeGroup {
				exchange,
				columns,
			} => self.drive_take_group(driver_index, exchange, &columns),
			Operator::TakeCogroup {
				exchanges,
				columns,
			} => self.drive_take_cogroup(driver_index, &exchanges, &columns),
			other => fail!("operator {other:?} cannot drive a block"),
		}
	}

	/// Release operator scratch, closing any open sinks and cursors.
	pub fn finish(&mut self) -> Result<(), Error> {
		if self.finished {
			return Ok(());
		}
		self.finished = true;
		for scratch in self.scratch.iter_mut() {
			if let Scratch::Sink(_) = scratch {
				let Scratch::Sink(sink) = std::mem::replace(scratch, Scratch::None) else {
					unreachable!();
				};
				sink.end_of_input()?;
			}
		}
		self.downstream.finish()
	}

	fn complete(&mut self) -> Result<TaskResult, Error> {
		self.finish()?;
		Ok(TaskResult::Complete)
	}

	fn drive_scan(
		&mut self,
		table: &str,
		index: Option<&str>,
		bounds: &ScanBounds,
		columns: &[usize],
	) -> Result<TaskResult, Error> {
		let handle = self.ctx.table(table)?;
		let driver_index = self.block.operators.start;
		// Secondary index scans materialise their matching rows in one
		// batch through the index prefix
		if let Some(index) = index {
			let prefix = self.eval_all(bounds.lower.as_slice())?;
			let arena = Arena::new(Discipline::Monotonic);
			let rows = handle.scan_secondary(&self.ctx.tx, index, &prefix, &arena)?;
			for row in rows {
				self.write_columns(columns, &row)?;
				self.push_row(driver_index + 1)?;
			}
			return self.complete();
		}
		let lower = self.eval_all(bounds.lower.as_slice())?;
		let upper = self.eval_all(bounds.upper.as_slice())?;
		// Every scan runs off a batch cursor; parallel siblings share
		// one under their strand so each key is claimed exactly once
		let cursor = self.shared_scan.get_or_insert_with(SharedScan::new).clone();
		let resume = {
			let cursor = cursor.lock();
			if cursor.exhausted {
				return self.complete();
			}
			cursor.resume_after.clone()
		};
		let arena = Arena::new(Discipline::Monotonic);
		let batch = handle.scan_primary(
			&self.ctx.tx,
			(!lower.is_empty()).then_some((lower.as_slice(), bounds.lower_inclusive)),
			(!upper.is_empty()).then_some((upper.as_slice(), bounds.upper_inclusive)),
			Some(*SCAN_BATCH_SIZE),
			resume.as_deref(),
			&arena,
		)?;
		let exhausted = batch.len() < *SCAN_BATCH_SIZE as usize;
		{
			let mut cursor = cursor.lock();
			if let Some((key, _)) = batch.last() {
				cursor.resume_after = Some(key.clone());
			}
			cursor.exhausted |= exhausted;
		}
		for (_, row) in batch {
			self.write_columns(columns, &row)?;
			self.push_row(driver_index + 1)?;
		}
		if exhausted {
			self.complete()
		} else {
			// More batches may remain; hand the worker back
			Ok(TaskResult::Yield)
		}
	}

	fn drive_take_group(
		&mut self,
		driver_index: usize,
		exchange: crate::plan::StepId,
		columns: &[usize],
	) -> Result<TaskResult, Error> {
		// Open the grouped reader once the transfer has completed
		if matches!(self.scratch[driver_index], Scratch::None) {
			match self.ctx.exchange(exchange)?.clone() {
				Exchange::Group(group) => match group.source() {
					Poll::Pending => return Ok(TaskResult::Yield),
					Poll::Ready(source) => self.scratch[driver_index] = Scratch::Group(source),
					Poll::End => return self.complete(),
				},
				Exchange::Aggregate(aggregate) => match aggregate.source() {
					Poll::Pending => return Ok(TaskResult::Yield),
					Poll::Ready(source) => {
						self.scratch[driver_index] = Scratch::Aggregate(source)
					}
					Poll::End => return self.complete(),
				},
				_ => {
					return Err(Error::Unreachable(
						"take-group expects a group or aggregate exchange".into(),
					))
				}
			}
		}
		// Folded aggregate output: one record per group
		if let Scratch::Aggregate(_) = &self.scratch[driver_index] {
			loop {
				let record = match &mut self.scratch[driver_index] {
					Scratch::Aggregate(source) => source.next_group(),
					_ => unreachable!(),
				};
				let Some(record) = record else {
					return self.complete();
				};
				let Exchange::Aggregate(aggregate) = self.ctx.exchange(exchange)?.clone() else {
					unreachable!();
				};
				let row = crate::record::unpack(aggregate.meta(), record);
				self.write_columns(columns, &row)?;
				self.push_row(driver_index + 1)?;
			}
		}
		// Grouped shuffle output: fold members when the block
		// aggregates, otherwise stream them
		let Exchange::Group(group) = self.ctx.exchange(exchange)?.clone() else {
			unreachable!();
		};
		let aggregate_at = self.operators[self.block.operators.clone()]
			.iter()
			.position(|op| {
				matches!(
					op,
					Operator::AggregateGroup {
						..
					}
				)
			})
			.map(|offset| self.block.operators.start + offset);
		let mut saw_group = false;
		loop {
			let first = match &mut self.scratch[driver_index] {
				Scratch::Group(source) => source.next_group(),
				_ => unreachable!(),
			};
			let Some(first) = first else {
				// A global aggregate over empty input still produces
				// one row from the empty-value generators
				if !saw_group {
					if let Some(aggregate_index) = aggregate_at {
						let Operator::AggregateGroup {
							keys,
							aggregations,
						} = self.operators[aggregate_index].clone()
						else {
							unreachable!();
						};
						if keys.is_empty() {
							for spec in &aggregations {
								let function = self.ctx.registry.aggregate(&spec.function)?;
								let result =
									function.empty.map(|empty| empty()).unwrap_or(Value::Empty);
								self.variables.set(spec.output, &result)?;
							}
							self.push_row(aggregate_index + 1)?;
						}
					}
				}
				return self.complete();
			};
			saw_group = true;
			match aggregate_at {
				Some(aggregate_index) => {
					let Operator::AggregateGroup {
						keys,
						aggregations,
					} = self.operators[aggregate_index].clone()
					else {
						unreachable!();
					};
					self.fold_group(
						driver_index,
						aggregate_index,
						&group,
						columns,
						first,
						&keys,
						&aggregations,
					)?;
				}
				None => {
					// Stream every member through the block
					let mut member = Some(first);
					while let Some(record) = member {
						let row = crate::record::unpack(group.meta(), record);
						self.write_columns(columns, &row)?;
						self.push_row(driver_index + 1)?;
						member = match &mut self.scratch[driver_index] {
							Scratch::Group(source) => source.next_member(),
							_ => unreachable!(),
						};
					}
				}
			}
		}
	}

	/// Fold one group's members through the block's aggregate
	/// operator, then run the operators beyond it once.
	#[allow(clippy::too_many_arguments)]
	fn fold_group(
		&mut self,
		driver_index: usize,
		aggregate_index: usize,
		group: &Arc<crate::exch::GroupExchange>,
		columns: &[usize],
		first: crate::record::RecordRef,
		keys: &[usize],
		aggregations: &[AggregateSpec],
	) -> Result<(), Error> {
		struct Fold {
			spec: AggregateSpec,
			function: AggregateFn,
			accumulator: Value,
			/// Seen set for holistic DISTINCT folding
			seen: Vec<Value>,
		}
		let mut folds = Vec::with_capacity(aggregations.len());
		for spec in aggregations {
			folds.push(Fold {
				function: self.ctx.registry.aggregate(&spec.function)?,
				spec: spec.clone(),
				accumulator: Value::Empty,
				seen: Vec::new(),
			});
		}
		let mut member = Some(first);
		let mut key_row: Option<Vec<Value>> = None;
		while let Some(record) = member {
			let row = crate::record::unpack(group.meta(), record);
			self.write_columns(columns, &row)?;
			if key_row.is_none() {
				key_row = Some(keys.iter().map(|&k| self.variables.get(k)).collect::<Result<_, _>>()?);
			}
			for fold in folds.iter_mut() {
				let incoming = match fold.spec.input {
					Some(var) => self.variables.get(var)?,
					None => Value::Bool(true),
				};
				if incoming.is_empty() {
					continue;
				}
				if fold.spec.distinct {
					if fold.seen.iter().any(|seen| {
						seen.partial_cmp_value(&incoming) == Some(std::cmp::Ordering::Equal)
					}) {
						continue;
					}
					fold.seen.push(incoming);
				}
				fold.accumulator = if fold.accumulator.is_empty() {
					(fold.function.init)(&incoming)
				} else {
					(fold.function.fold)(&fold.accumulator, &incoming)
				};
			}
			member = match &mut self.scratch[driver_index] {
				Scratch::Group(source) => source.next_member(),
				_ => unreachable!(),
			};
		}
		// Restore the group key and publish the accumulators
		if let Some(key_row) = key_row {
			for (&var, value) in keys.iter().zip(key_row.iter()) {
				self.variables.set(var, value)?;
			}
		}
		for fold in &folds {
			let result = match (&fold.accumulator, fold.function.empty) {
				(Value::Empty, Some(empty)) => empty(),
				(value, _) => *value,
			};
			self.variables.set(fold.spec.output, &result)?;
		}
		self.push_row(aggregate_index + 1)
	}

	fn drive_take_cogroup(
		&mut self,
		driver_index: usize,
		exchanges: &[crate::plan::StepId],
		columns: &[Vec<usize>],
	) -> Result<TaskResult, Error> {
		// All inputs must have transferred
		let mut groups = Vec::with_capacity(exchanges.len());
		for step in exchanges {
			let Exchange::Group(group) = self.ctx.exchange(*step)?.clone() else {
				return Err(Error::Unreachable("take-cogroup expects group exchanges".into()));
			};
			if !group.transfer_completed() {
				return Ok(TaskResult::Yield);
			}
			groups.push(group);
		}
		let mut sources: Vec<GroupSource> = Vec::with_capacity(groups.len());
		for group in &groups {
			match group.source() {
				Poll::Ready(source) => sources.push(source),
				_ => return Ok(TaskResult::Yield),
			}
		}
		// Walk the aligned key space: collect each side's members per
		// key and emit the matching combinations
		let mut heads: Vec<Option<Vec<Vec<Value>>>> = Vec::with_capacity(sources.len());
		let mut head_keys: Vec<Option<Vec<Value>>> = Vec::with_capacity(sources.len());
		for (side, source) in sources.iter_mut().enumerate() {
			let (members, key) = next_cogroup(source, &groups[side]);
			heads.push(members);
			head_keys.push(key);
		}
		loop {
			// The minimum key across sides which still have input
			let mut min_key: Option<Vec<Value>> = None;
			for key in head_keys.iter().flatten() {
				min_key = match min_key {
					None => Some(key.clone()),
					Some(best) => {
						if compare_key_rows(key, &best) == std::cmp::Ordering::Less {
							Some(key.clone())
						} else {
							Some(best)
						}
					}
				};
			}
			let Some(min_key) = min_key else {
				return self.complete();
			};
			let mut matched: Vec<Option<Vec<Vec<Value>>>> = vec![None; sources.len()];
			for side in 0..sources.len() {
				if let Some(key) = &head_keys[side] {
					if compare_key_rows(key, &min_key) == std::cmp::Ordering::Equal {
						matched[side] = heads[side].take();
						let (members, key) = next_cogroup(&mut sources[side], &groups[side]);
						heads[side] = members;
						head_keys[side] = key;
					}
				}
			}
			// Inner co-grouping: every side must contribute
			if matched.iter().all(|m| m.is_some()) {
				let member_sets: Vec<Vec<Vec<Value>>> =
					matched.into_iter().map(|m| m.unwrap()).collect();
				self.emit_combinations(driver_index, columns, &member_sets, 0)?;
			}
		}
	}

	/// Recurse over the cartesian combinations of co-grouped members.
	fn emit_combinations(
		&mut self,
		driver_index: usize,
		columns: &[Vec<usize>],
		member_sets: &[Vec<Vec<Value>>],
		side: usize,
	) -> Result<(), Error> {
		if side == member_sets.len() {
			return self.push_row(driver_index + 1);
		}
		for row in &member_sets[side] {
			self.write_columns(&columns[side], row)?;
			self.emit_combinations(driver_index, columns, member_sets, side + 1)?;
		}
		Ok(())
	}

	/// Run one produced row through the operators from `start` to the
	/// end of the block.
	fn push_row(&mut self, start: usize) -> Result<(), Error> {
		for index in start..self.block.operators.end {
			match self.operators[index].clone() {
				Operator::Filter {
					predicate,
				} => {
					let value = self.eval(&predicate)?;
					match Truth::from_value(&value) {
						Ok(truth) if truth.admits() => {}
						Ok(_) => return Ok(()),
						Err(kind) => {
							return Err(Error::ExpressionEvaluation {
								kind,
								expression: predicate.describe(),
							})
						}
					}
				}
				Operator::Project {
					assignments,
				} => {
					for (var, expr) in &assignments {
						let value = self.eval(expr)?;
						self.variables.set(*var, &value)?;
					}
				}
				Operator::JoinFind {
					table,
					index: _,
					key,
					columns,
					left_outer,
				} => {
					let handle = self.ctx.table(&table)?;
					let key_values = self.eval_all(&key)?;
					let arena = Arena::new(Discipline::Monotonic);
					match handle.find(&self.ctx.tx, &key_values, &arena)? {
						Some(row) => self.write_columns(&columns, &row)?,
						None if left_outer => {
							let nulls = vec![Value::Empty; columns.len()];
							self.write_columns(&columns, &nulls)?;
						}
						None => return Ok(()),
					}
				}
				Operator::JoinScan {
					table,
					index: inner_index,
					prefix,
					columns,
					left_outer,
				} => {
					let handle = self.ctx.table(&table)?;
					let prefix_values = self.eval_all(&prefix)?;
					let arena = Arena::new(Discipline::Monotonic);
					let rows = match inner_index.as_deref() {
						Some(name) => {
							handle.scan_secondary(&self.ctx.tx, name, &prefix_values, &arena)?
						}
						None => handle
							.scan_primary(
								&self.ctx.tx,
								Some((prefix_values.as_slice(), true)),
								Some((prefix_values.as_slice(), true)),
								None,
								None,
								&arena,
							)?
							.into_iter()
							.map(|(_, row)| row)
							.collect(),
					};
					if rows.is_empty() && left_outer {
						let nulls = vec![Value::Empty; columns.len()];
						self.write_columns(&columns, &nulls)?;
						self.push_row(index + 1)?;
						return Ok(());
					}
					for row in rows {
						self.write_columns(&columns, &row)?;
						self.push_row(index + 1)?;
					}
					return Ok(());
				}
				Operator::Offer {
					exchange,
					columns,
				} => {
					let values = self.variables.read(&columns)?;
					match self.ctx.exchange(exchange)?.clone() {
						Exchange::Forward(e) => e.offer_values(self.lane, &values)?,
						Exchange::Group(e) => e.offer_values(&values)?,
						Exchange::Broadcast(e) => e.offer_values(&values)?,
						Exchange::Aggregate(e) => e.offer_values(&values)?,
						Exchange::Deliver(e) => {
							// The deliver sink is per-task scratch
							if matches!(self.scratch[index], Scratch::None) {
								self.scratch[index] = Scratch::Sink(e.sink()?);
							}
							self.offer_to_sink(index, &values)?;
						}
					}
				}
				Operator::Emit {
					columns,
				} => {
					let values = self.variables.read(&columns)?;
					if matches!(self.scratch[index], Scratch::None) {
						// Emit converts to the external record shape
						// and writes to the request data channel
						let channel = self.ctx.channel.clone().ok_or_else(|| {
							Error::InvalidState("no data channel for this request".into())
						})?;
						let meta = self.variables.meta().clone();
						let exchange = crate::exch::DeliverExchange::new(meta, channel);
						self.scratch[index] = Scratch::Sink(exchange.sink()?);
					}
					self.offer_to_sink(index, &values)?;
				}
				Operator::WriteFull {
					table,
					kind,
					columns,
				} => {
					let handle = self.ctx.table(&table)?;
					let row = self.eval_all(&columns)?;
					if handle.insert(&self.ctx.tx, &row, kind)? {
						self.ctx.add_rows_affected(1);
					}
				}
				Operator::WritePartial {
					table,
					kind,
					key,
					assignments,
				} => {
					let handle = self.ctx.table(&table)?;
					let key_values = self.variables.read(&key)?;
					match kind {
						WritePartialKind::Delete => {
							if handle.delete(&self.ctx.tx, &key_values)? {
								self.ctx.add_rows_affected(1);
							}
						}
						WritePartialKind::Update => {
							let arena = Arena::new(Discipline::Monotonic);
							let mut row = handle
								.find(&self.ctx.tx, &key_values, &arena)?
								.ok_or(Error::NotFound)?;
							for (column, expr) in &assignments {
								row[*column] = self.eval(expr)?;
							}
							handle.update(&self.ctx.tx, &key_values, &row)?;
							self.ctx.add_rows_affected(1);
						}
					}
				}
				Operator::AggregateGroup {
					..
				} => {
					// Folded by the take-group driver
				}
				other => fail!("driver operator {other:?} appeared mid-block"),
			}
		}
		Ok(())
	}

	fn offer_to_sink(&mut self, index: usize, values: &[Value]) -> Result<(), Error> {
		let Scratch::Sink(sink) = &self.scratch[index] else {
			return Err(Error::Unreachable("emit sink scratch missing".into()));
		};
		sink.offer_values(values)
	}

	fn eval(&self, expr: &crate::plan::Expression) -> Result<Value, Error> {
		let failed = Mutex::new(None);
		let tx_ctx = self.ctx.tx.context();
		let eval_ctx = EvalContext {
			variables: &self.variables,
			registry: &self.ctx.registry,
			parameters: &self.ctx.parameters,
			tx_start: tx_ctx.started_at(),
			zone_offset_minutes: self.ctx.request.zone_offset_minutes(),
			loss_policy: LossPolicy::Error,
			lenient: false,
			failed: &failed,
		};
		evaluate_checked(expr, &eval_ctx)
	}

	fn eval_all(&self, exprs: &[crate::plan::Expression]) -> Result<Vec<Value>, Error> {
		exprs.iter().map(|expr| self.eval(expr)).collect()
	}

	fn write_columns(&self, columns: &[usize], row: &[Value]) -> Result<(), Error> {
		// Rows decoded from storage may reference a short-lived arena;
		// writing into the variable table copies the payloads
		self.variables.write(columns, row)
	}

}

/// Read one whole group from a source: its members and its key.
fn next_cogroup(
	source: &mut GroupSource,
	group: &Arc<crate::exch::GroupExchange>,
) -> (Option<Vec<Vec<Value>>>, Option<Vec<Value>>) {
	let Some(first) = source.next_group() else {
		return (None, None);
	};
	let meta = group.meta().clone();
	let mut members = vec![crate::record::unpack(&meta, first)];
	while let Some(member) = source.next_member() {
		members.push(crate::record::unpack(&meta, member));
	}
	let key: Vec<Value> =
		group.key_fields().iter().map(|&field| members[0][field]).collect();
	(Some(members), Some(key))
}

fn compare_key_rows(a: &[Value], b: &[Value]) -> std::cmp::Ordering {
	use std::cmp::Ordering;
	for (va, vb) in a.iter().zip(b.iter()) {
		let ord = match (va.is_empty(), vb.is_empty()) {
			(true, true) => Ordering::Equal,
			(true, false) => Ordering::Less,
			(false, true) => Ordering::Greater,
			(false, false) => va.partial_cmp_value(vb).unwrap_or(Ordering::Equal),
		};
		if ord != Ordering::Equal {
			return ord;
		}
	}
	std::cmp::Ordering::Equal
}
