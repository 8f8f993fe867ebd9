use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::err::Error;
use crate::exch::{Poll, RunInfo};
use crate::key::Direction;
use crate::mem::{Arena, Discipline};
use crate::record::{
	compare_fields_directed, hash_fields, PointerTable, RecordMeta, RecordRef, RecordStore,
};
use crate::val::Value;

/// One partition of a shuffle: a record store backing the copied
/// records plus a pointer table that gets sorted at transfer.
struct Partition {
	store: RecordStore,
	table: PointerTable,
}

/// A shuffle exchange: the write side hashes the key columns onto a
/// partition and stashes the record; when every sink has declared
/// end-of-input the partitions are sorted by key (nulls first,
/// stable); the read side merges the partitions into grouped output.
///
/// Key equality implies hash equality, so a group lives entirely in
/// one partition; the merge only interleaves distinct groups.
pub struct GroupExchange {
	meta: Arc<RecordMeta>,
	key_fields: Vec<usize>,
	directions: Vec<Direction>,
	partitions: Vec<Partition>,
	/// Sinks which have not yet declared end-of-input
	open_sinks: AtomicUsize,
	transferred: AtomicBool,
	run_info: Mutex<Option<RunInfo>>,
}

impl GroupExchange {
	/// Create a shuffle over `partitions` partitions fed by
	/// `sink_count` sinks.
	pub fn new(
		meta: Arc<RecordMeta>,
		key_fields: Vec<usize>,
		directions: Vec<Direction>,
		partitions: usize,
		sink_count: usize,
	) -> Self {
		let partitions = (0..partitions.max(1))
			.map(|_| Partition {
				store: RecordStore::new(meta.clone(), Some(Arena::new(Discipline::Monotonic))),
				table: PointerTable::new(),
			})
			.collect();
		Self {
			meta,
			key_fields,
			directions,
			partitions,
			open_sinks: AtomicUsize::new(sink_count.max(1)),
			transferred: AtomicBool::new(false),
			run_info: Mutex::new(None),
		}
	}

	/// The record shape crossing this exchange.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		&self.meta
	}

	/// The key fields of the shuffle.
	pub fn key_fields(&self) -> &[usize] {
		&self.key_fields
	}

	/// Write a row of values through a sink: hash the key columns
	/// onto a partition and stash a deep copy.
	pub fn offer_values(&self, values: &[Value]) -> Result<(), Error> {
		// Pack into the target partition's own store
		let hash_input = self.partition_of_values(values);
		let partition = &self.partitions[hash_input];
		let record = partition.store.append_values(values)?;
		partition.table.append(record);
		Ok(())
	}

	/// Write a record through a sink.
	pub fn offer(&self, record: RecordRef) {
		let index =
			hash_fields(&self.meta, record, &self.key_fields) as usize % self.partitions.len();
		let partition = &self.partitions[index];
		let copy = partition.store.append(record);
		partition.table.append(copy);
	}

	fn partition_of_values(&self, values: &[Value]) -> usize {
		use std::hash::{Hash, Hasher};
		let mut hasher = ahash::AHasher::default();
		for &field in &self.key_fields {
			match values.get(field) {
				Some(value) => crate::record::hash_value_into(value, &mut hasher),
				None => 0u8.hash(&mut hasher),
			}
		}
		hasher.finish() as usize % self.partitions.len()
	}

	/// Declare one sink's end-of-input. The transfer runs when the
	/// last sink closes: every partition's pointer table is sorted by
	/// the key comparator with nulls first.
	pub fn end_of_input(&self) {
		if self.open_sinks.fetch_sub(1, Ordering::AcqRel) != 1 {
			return;
		}
		let mut count = 0u64;
		for partition in &self.partitions {
			let meta = self.meta.clone();
			let fields = self.key_fields.clone();
			let directions = self.directions.clone();
			partition
				.table
				.sort_by(move |a, b| compare_fields_directed(&meta, a, b, &fields, &directions));
			count += partition.table.len() as u64;
		}
		*self.run_info.lock() = Some(RunInfo {
			was_empty: count == 0,
			record_count: count,
		});
		self.transferred.store(true, Ordering::Release);
		trace!("group exchange transferred {count} records");
	}

	/// Whether the transfer has completed.
	pub fn transfer_completed(&self) -> bool {
		self.transferred.load(Ordering::Acquire)
	}

	/// The run info, immutable after the transfer.
	pub fn run_info(&self) -> Option<RunInfo> {
		*self.run_info.lock()
	}

	/// Open the grouped reader. Pending until the transfer completes.
	pub fn source(self: &Arc<Self>) -> Poll<GroupSource> {
		if !self.transfer_completed() {
			return Poll::Pending;
		}
		Poll::Ready(GroupSource {
			exchange: self.clone(),
			positions: vec![0; self.partitions.len()],
			current: None,
		})
	}
}

/// The grouped reader over a transferred shuffle: `next_group` pops
/// the minimum key across partitions, `next_member` walks the group's
/// members in their stable order.
pub struct GroupSource {
	exchange: Arc<GroupExchange>,
	/// The cursor into each partition's sorted pointer table
	positions: Vec<usize>,
	/// The partition and key record of the open group
	current: Option<(usize, RecordRef)>,
}

impl GroupSource {
	fn head(&self, partition: usize) -> Option<RecordRef> {
		self.exchange.partitions[partition].table.get(self.positions[partition])
	}

	/// Advance to the next group, returning its first member.
	pub fn next_group(&mut self) -> Option<RecordRef> {
		// Skip any unread members of the previous group
		if let Some((partition, key)) = self.current.take() {
			while let Some(record) = self.head(partition) {
				if self.same_key(key, record) {
					self.positions[partition] += 1;
				} else {
					break;
				}
			}
		}
		// Find the partition whose head carries the minimum key
		let mut min: Option<(usize, RecordRef)> = None;
		for partition in 0..self.positions.len() {
			let Some(candidate) = self.head(partition) else {
				continue;
			};
			min = match min {
				None => Some((partition, candidate)),
				Some((best_partition, best)) => {
					let ord = compare_fields_directed(
						&self.exchange.meta,
						candidate,
						best,
						&self.exchange.key_fields,
						&self.exchange.directions,
					);
					if ord == std::cmp::Ordering::Less {
						Some((partition, candidate))
					} else {
						Some((best_partition, best))
					}
				}
			};
		}
		let (partition, record) = min?;
		self.positions[partition] += 1;
		self.current = Some((partition, record));
		Some(record)
	}

	/// The next member of the open group, in stable input order.
	pub fn next_member(&mut self) -> Option<RecordRef> {
		let (partition, key) = self.current?;
		let record = self.head(partition)?;
		if self.same_key(key, record) {
			self.positions[partition] += 1;
			Some(record)
		} else {
			None
		}
	}

	fn same_key(&self, a: RecordRef, b: RecordRef) -> bool {
		compare_fields_directed(
			&self.exchange.meta,
			a,
			b,
			&self.exchange.key_fields,
			&self.exchange.directions,
		) == std::cmp::Ordering::Equal
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::record::FieldType;

	fn exchange(partitions: usize) -> Arc<GroupExchange> {
		Arc::new(GroupExchange::new(
			Arc::new(RecordMeta::new(
				vec![FieldType::Int4, FieldType::Int4],
				vec![true, false],
			)),
			vec![0],
			vec![Direction::Ascending],
			partitions,
			1,
		))
	}

	fn collect_groups(exchange: &Arc<GroupExchange>) -> Vec<Vec<(Value, Value)>> {
		let Poll::Ready(mut source) = exchange.source() else {
			panic!("transfer must be complete");
		};
		let meta = exchange.meta().clone();
		let mut groups = Vec::new();
		while let Some(first) = source.next_group() {
			let mut group = vec![(first.get_value(&meta, 0), first.get_value(&meta, 1))];
			while let Some(member) = source.next_member() {
				group.push((member.get_value(&meta, 0), member.get_value(&meta, 1)));
			}
			groups.push(group);
		}
		groups
	}

	#[test]
	fn output_is_sorted_by_key_with_nulls_first() {
		let exchange = exchange(4);
		for (key, tag) in [(Some(3), 0), (Some(1), 1), (None, 2), (Some(3), 3), (Some(2), 4)] {
			let key = key.map(Value::Int4).unwrap_or(Value::Empty);
			exchange.offer_values(&[key, Value::Int4(tag)]).unwrap();
		}
		exchange.end_of_input();
		let groups = collect_groups(&exchange);
		let keys: Vec<Value> = groups.iter().map(|g| g[0].0).collect();
		assert_eq!(keys, vec![Value::Empty, Value::Int4(1), Value::Int4(2), Value::Int4(3)]);
		// Members of the key-3 group preserve their input order
		let three = &groups[3];
		assert_eq!(three.len(), 2);
		assert_eq!(three[0].1, Value::Int4(0));
		assert_eq!(three[1].1, Value::Int4(3));
	}

	#[test]
	fn source_is_pending_until_every_sink_closes() {
		let exchange = Arc::new(GroupExchange::new(
			Arc::new(RecordMeta::new(vec![FieldType::Int4], vec![false])),
			vec![0],
			vec![Direction::Ascending],
			2,
			2,
		));
		exchange.end_of_input();
		assert!(matches!(exchange.source(), Poll::Pending));
		exchange.end_of_input();
		assert!(matches!(exchange.source(), Poll::Ready(_)));
		assert!(exchange.run_info().unwrap().was_empty);
	}

	#[test]
	fn descending_keys_reverse_group_order() {
		let exchange = Arc::new(GroupExchange::new(
			Arc::new(RecordMeta::new(
				vec![FieldType::Int4, FieldType::Int4],
				vec![false, false],
			)),
			vec![0],
			vec![Direction::Descending],
			2,
			1,
		));
		for key in [1, 3, 2] {
			exchange.offer_values(&[Value::Int4(key), Value::Int4(0)]).unwrap();
		}
		exchange.end_of_input();
		let groups = collect_groups(&exchange);
		let keys: Vec<Value> = groups.iter().map(|g| g[0].0).collect();
		assert_eq!(keys, vec![Value::Int4(3), Value::Int4(2), Value::Int4(1)]);
	}
}
