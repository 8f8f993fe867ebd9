use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::err::Error;
use crate::exch::{Poll, RunInfo};
use crate::fnc::{AggregateFn, Registry};
use crate::key::{encode_key_prefix, Direction};
use crate::mem::{Arena, Discipline};
use crate::plan::AggregateSpec;
use crate::record::{compare_fields_directed, PointerTable, RecordMeta, RecordRef, RecordStore};
use crate::val::Value;

/// A resolved aggregation: the plan spec plus its registry function.
struct Aggregation {
	spec: AggregateSpec,
	function: AggregateFn,
}

/// One partition of the incremental aggregate: the folded rows keyed
/// by their encoded key, plus the sorted output materialised at
/// transfer.
struct Partition {
	/// Accumulator rows while input arrives
	folding: Mutex<HashMap<Vec<u8>, Vec<Value>>>,
	/// Owns the copied input payloads and the materialised output
	store: RecordStore,
	table: PointerTable,
}

/// An incremental aggregate exchange: like a shuffle, but values fold
/// into their group's accumulator as they arrive instead of being
/// kept. Only distributive and algebraic aggregates run here;
/// holistic aggregates such as `COUNT(DISTINCT ...)` fall back to a
/// plain group exchange.
pub struct AggregateExchange {
	meta: Arc<RecordMeta>,
	key_fields: Vec<usize>,
	aggregations: Vec<Aggregation>,
	partitions: Vec<Partition>,
	open_sinks: AtomicUsize,
	transferred: AtomicBool,
	run_info: Mutex<Option<RunInfo>>,
}

impl std::fmt::Debug for AggregateExchange {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AggregateExchange")
			.field("key_fields", &self.key_fields)
			.field("partitions", &self.partitions.len())
			.finish_non_exhaustive()
	}
}

impl AggregateExchange {
	/// Create an aggregate exchange. The record shape covers the key
	/// fields and one accumulator slot per aggregation.
	pub fn new(
		meta: Arc<RecordMeta>,
		key_fields: Vec<usize>,
		aggregations: Vec<AggregateSpec>,
		partitions: usize,
		sink_count: usize,
	) -> Result<Self, Error> {
		let registry = Registry::with_builtins();
		let aggregations = aggregations
			.into_iter()
			.map(|spec| {
				if spec.distinct {
					// Holistic; the planner routes these to a group
					// exchange instead
					return Err(Error::IllegalOperation(
						"distinct aggregation cannot fold incrementally".to_owned(),
					));
				}
				let function = registry.aggregate(&spec.function)?;
				Ok(Aggregation {
					spec,
					function,
				})
			})
			.collect::<Result<Vec<_>, Error>>()?;
		let partitions = (0..partitions.max(1))
			.map(|_| Partition {
				folding: Mutex::new(HashMap::new()),
				store: RecordStore::new(meta.clone(), Some(Arena::new(Discipline::Monotonic))),
				table: PointerTable::new(),
			})
			.collect();
		Ok(Self {
			meta,
			key_fields,
			aggregations,
			partitions,
			open_sinks: AtomicUsize::new(sink_count.max(1)),
			transferred: AtomicBool::new(false),
			run_info: Mutex::new(None),
		})
	}

	/// The record shape crossing this exchange.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		&self.meta
	}

	/// Fold a row of values into its group's accumulator.
	pub fn offer_values(&self, values: &[Value]) -> Result<(), Error> {
		let key_values: Vec<Value> =
			self.key_fields.iter().map(|&field| values[field]).collect();
		let directions = vec![Direction::Ascending; key_values.len()];
		let key = encode_key_prefix(&key_values, &directions)?;
		let index = {
			use std::hash::{Hash, Hasher};
			let mut hasher = ahash::AHasher::default();
			key.hash(&mut hasher);
			hasher.finish() as usize % self.partitions.len()
		};
		let partition = &self.partitions[index];
		// Stash the incoming row so its varlen payloads outlive the
		// producer, then fold the owned copy
		let stored = partition.store.append_values(values)?;
		let owned = crate::record::unpack(&self.meta, stored);
		let mut folding = partition.folding.lock();
		match folding.get_mut(&key) {
			Some(accumulator) => {
				for aggregation in &self.aggregations {
					let incoming = match aggregation.spec.input {
						Some(field) => owned[field],
						// COUNT(*) counts the row itself
						None => Value::Bool(true),
					};
					if incoming.is_empty() {
						// Null inputs do not participate
						continue;
					}
					let slot = &mut accumulator[aggregation.spec.output];
					if slot.is_empty() {
						*slot = (aggregation.function.init)(&incoming);
					} else {
						*slot = (aggregation.function.fold)(slot, &incoming);
					}
				}
			}
			None => {
				let mut accumulator = owned.clone();
				for aggregation in &self.aggregations {
					let incoming = match aggregation.spec.input {
						Some(field) => owned[field],
						None => Value::Bool(true),
					};
					accumulator[aggregation.spec.output] = if incoming.is_empty() {
						Value::Empty
					} else {
						(aggregation.function.init)(&incoming)
					};
				}
				folding.insert(key, accumulator);
			}
		}
		Ok(())
	}

	/// Declare one sink's end-of-input. On the last close the folded
	/// accumulators materialise into sorted partition output.
	pub fn end_of_input(&self) -> Result<(), Error> {
		if self.open_sinks.fetch_sub(1, Ordering::AcqRel) != 1 {
			return Ok(());
		}
		let mut count = 0u64;
		let mut input_seen = false;
		for partition in &self.partitions {
			let folded: Vec<Vec<Value>> = {
				let mut folding = partition.folding.lock();
				input_seen |= !folding.is_empty() || partition.store.count() > 0;
				folding.drain().map(|(_, row)| row).collect()
			};
			for row in folded {
				let record = partition.store.append_values(&row)?;
				partition.table.append(record);
				count += 1;
			}
			let meta = self.meta.clone();
			let fields = self.key_fields.clone();
			partition.table.sort_by(move |a, b| {
				compare_fields_directed(
					&meta,
					a,
					b,
					&fields,
					&[],
				)
			});
		}
		// A global aggregate over empty input still produces one row
		// from the empty-value generators
		if count == 0 && self.key_fields.is_empty() {
			let mut row = vec![Value::Empty; self.meta.field_count()];
			for aggregation in &self.aggregations {
				if let Some(empty) = aggregation.function.empty {
					row[aggregation.spec.output] = empty();
				}
			}
			let partition = &self.partitions[0];
			let record = partition.store.append_values(&row)?;
			partition.table.append(record);
			count = 1;
		}
		*self.run_info.lock() = Some(RunInfo {
			was_empty: !input_seen,
			record_count: count,
		});
		self.transferred.store(true, Ordering::Release);
		trace!("aggregate exchange transferred {count} folded records");
		Ok(())
	}

	/// Whether the transfer has completed.
	pub fn transfer_completed(&self) -> bool {
		self.transferred.load(Ordering::Acquire)
	}

	/// The run info, immutable after the transfer.
	pub fn run_info(&self) -> Option<RunInfo> {
		*self.run_info.lock()
	}

	/// Open the grouped reader over the folded output. Each group has
	/// exactly one member.
	pub fn source(self: &Arc<Self>) -> Poll<AggregateSource> {
		if !self.transfer_completed() {
			return Poll::Pending;
		}
		Poll::Ready(AggregateSource {
			exchange: self.clone(),
			partition: 0,
			position: 0,
		})
	}
}

/// The reader over folded aggregate output: one record per group.
pub struct AggregateSource {
	exchange: Arc<AggregateExchange>,
	partition: usize,
	position: usize,
}

impl AggregateSource {
	/// The next folded group record.
	pub fn next_group(&mut self) -> Option<RecordRef> {
		while self.partition < self.exchange.partitions.len() {
			let table = &self.exchange.partitions[self.partition].table;
			if let Some(record) = table.get(self.position) {
				self.position += 1;
				return Some(record);
			}
			self.partition += 1;
			self.position = 0;
		}
		None
	}
}
