use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::err::Error;
use crate::mem::{Arena, Discipline};
use crate::record::reference::{pack, RecordRef, RecordRefMut};
use crate::record::RecordMeta;
use crate::val::Value;

/// An append-only, paged record store. Records are packed into an
/// arena owned by the store; when a secondary varlen arena is
/// attached, variable-length payloads are deep-copied through it so
/// appended records own their payloads.
pub struct RecordStore {
	meta: Arc<RecordMeta>,
	arena: Arena,
	varlen: Option<Arena>,
	records: Mutex<Vec<RecordRef>>,
}

impl RecordStore {
	/// Create a store for the given record shape. Pass a varlen arena
	/// to deep-copy variable-length payloads on append.
	pub fn new(meta: Arc<RecordMeta>, varlen: Option<Arena>) -> Self {
		Self {
			meta,
			arena: Arena::new(Discipline::Monotonic),
			varlen,
			records: Mutex::new(Vec::new()),
		}
	}

	/// The record shape of this store.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		&self.meta
	}

	/// The arena varlen payloads spill into.
	fn varlen_arena(&self) -> &Arena {
		self.varlen.as_ref().unwrap_or(&self.arena)
	}

	/// Append a copy of an existing record, deep-copying any heap
	/// varlen payload so the copy owns its data. Returns the stored
	/// record.
	pub fn append(&self, src: RecordRef) -> RecordRef {
		let size = self.meta.storage_size();
		let ptr = self.arena.alloc(size, self.meta.record_alignment().max(1));
		// SAFETY: the freshly allocated region spans the storage size
		unsafe {
			std::ptr::copy_nonoverlapping(src.as_ptr(), ptr, self.meta.record_size());
		}
		let mut dst = unsafe { RecordRefMut::from_raw_parts(ptr, self.meta.record_size()) };
		// Re-point heap varlen payloads into our own arena
		if self.meta.has_varlen() {
			for index in 0..self.meta.field_count() {
				if !self.meta.field_type(index).is_varlen() || src.is_null(&self.meta, index) {
					continue;
				}
				let value = src.get_value(&self.meta, index);
				// Rewriting the image through set_value performs the
				// deep copy; inline payloads are copied by the memcpy
				// above already
				let _ = dst.set_value(&self.meta, index, &value, self.varlen_arena());
			}
		}
		let record = dst.freeze();
		self.records.lock().push(record);
		record
	}

	/// Pack a row of values into a new record. Returns the stored
	/// record.
	pub fn append_values(&self, values: &[Value]) -> Result<RecordRef, Error> {
		let size = self.meta.storage_size();
		let ptr = self.arena.alloc(size, self.meta.record_alignment().max(1));
		let dst = unsafe { RecordRefMut::from_raw_parts(ptr, self.meta.record_size()) };
		let record = pack(&self.meta, values, dst, self.varlen_arena())?;
		self.records.lock().push(record);
		Ok(record)
	}

	/// The record stored at `index`, in insertion order.
	pub fn get(&self, index: usize) -> Option<RecordRef> {
		self.records.lock().get(index).copied()
	}

	/// The number of records appended so far.
	pub fn count(&self) -> usize {
		self.records.lock().len()
	}

	/// Drop every record. Callers must ensure no reference into the
	/// store is still live.
	pub fn reset(&self) {
		self.records.lock().clear();
		self.arena.reset();
		if let Some(varlen) = &self.varlen {
			varlen.reset();
		}
	}
}

/// A record store with a forward iterator that traverses records in
/// insertion order.
pub struct IterableRecordStore {
	inner: RecordStore,
}

impl IterableRecordStore {
	/// Create an iterable store for the given record shape.
	pub fn new(meta: Arc<RecordMeta>, varlen: Option<Arena>) -> Self {
		Self {
			inner: RecordStore::new(meta, varlen),
		}
	}

	/// The underlying record store.
	pub fn store(&self) -> &RecordStore {
		&self.inner
	}

	/// The record shape of this store.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		self.inner.meta()
	}

	/// Append a copy of an existing record.
	pub fn append(&self, src: RecordRef) -> RecordRef {
		self.inner.append(src)
	}

	/// Pack a row of values into a new record.
	pub fn append_values(&self, values: &[Value]) -> Result<RecordRef, Error> {
		self.inner.append_values(values)
	}

	/// The number of records appended so far.
	pub fn count(&self) -> usize {
		self.inner.count()
	}

	/// A forward iterator over the stored records.
	pub fn iter(&self) -> RecordIter<'_> {
		RecordIter {
			store: &self.inner,
			next: 0,
		}
	}
}

/// A forward iterator over a record store.
pub struct RecordIter<'a> {
	store: &'a RecordStore,
	next: usize,
}

impl Iterator for RecordIter<'_> {
	type Item = RecordRef;

	fn next(&mut self) -> Option<RecordRef> {
		let record = self.store.get(self.next)?;
		self.next += 1;
		Some(record)
	}
}

/// A one-record store with an optional scratch slot, backing variable
/// tables and single-row operator state.
pub struct SmallRecordStore {
	meta: Arc<RecordMeta>,
	arena: Arena,
	varlen: Arena,
	slot: Mutex<Option<RecordRef>>,
	scratch: Mutex<Option<RecordRef>>,
}

impl SmallRecordStore {
	/// Create a small store for the given record shape.
	pub fn new(meta: Arc<RecordMeta>) -> Self {
		Self {
			meta,
			arena: Arena::new(Discipline::Monotonic),
			varlen: Arena::new(Discipline::Lifo),
			slot: Mutex::new(None),
			scratch: Mutex::new(None),
		}
	}

	/// The record shape of this store.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		&self.meta
	}

	/// The arena varlen payloads written into the slot spill into.
	pub fn varlen_arena(&self) -> &Arena {
		&self.varlen
	}

	fn allocate(&self) -> RecordRef {
		let size = self.meta.storage_size();
		let ptr = self.arena.alloc(size, self.meta.record_alignment().max(1));
		// SAFETY: the region was just allocated with the storage size
		unsafe {
			std::ptr::write_bytes(ptr, 0, size);
			RecordRefMut::from_raw_parts(ptr, self.meta.record_size()).freeze()
		}
	}

	/// The single record slot, allocated on first use.
	pub fn record(&self) -> RecordRef {
		let mut slot = self.slot.lock();
		*slot.get_or_insert_with(|| self.allocate())
	}

	/// A mutable view of the record slot.
	pub fn record_mut(&self) -> RecordRefMut {
		let record = self.record();
		// SAFETY: the slot region is owned by this store and stays
		// allocated for the store's lifetime
		unsafe { RecordRefMut::from_raw_parts(record.as_ptr() as *mut u8, record.len()) }
	}

	/// The scratch slot, allocated on first use.
	pub fn scratch(&self) -> RecordRef {
		let mut scratch = self.scratch.lock();
		*scratch.get_or_insert_with(|| self.allocate())
	}

	/// A mutable view of the scratch slot.
	pub fn scratch_mut(&self) -> RecordRefMut {
		let record = self.scratch();
		// SAFETY: as for `record_mut`
		unsafe { RecordRefMut::from_raw_parts(record.as_ptr() as *mut u8, record.len()) }
	}
}

/// A paged array of record pointers, used as an index over a record
/// store. Sorting the table reorders the pointers, never the records.
pub struct PointerTable {
	entries: Mutex<Vec<RecordRef>>,
}

impl PointerTable {
	/// Create an empty pointer table.
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(Vec::new()),
		}
	}

	/// Append a record pointer.
	pub fn append(&self, record: RecordRef) {
		self.entries.lock().push(record);
	}

	/// The pointer at `index`.
	pub fn get(&self, index: usize) -> Option<RecordRef> {
		self.entries.lock().get(index).copied()
	}

	/// The number of pointers in the table.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Whether the table is empty.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	/// Sort the pointers with the given comparator. The sort is
	/// stable: ties preserve insertion order.
	pub fn sort_by<F>(&self, mut compare: F)
	where
		F: FnMut(RecordRef, RecordRef) -> std::cmp::Ordering,
	{
		self.entries.lock().sort_by(|a, b| compare(*a, *b));
	}

	/// Snapshot the current pointers in order.
	pub fn snapshot(&self) -> Vec<RecordRef> {
		self.entries.lock().clone()
	}
}

impl Default for PointerTable {
	fn default() -> Self {
		Self::new()
	}
}

/// A partitioned result store. Each partition is an iterable record
/// store; partitions can be added concurrently while a job runs and
/// the store never shrinks until the job completes.
pub struct ResultStore {
	meta: Arc<RecordMeta>,
	partitions: RwLock<Vec<Arc<IterableRecordStore>>>,
}

impl ResultStore {
	/// Create an empty result store for the given record shape.
	pub fn new(meta: Arc<RecordMeta>) -> Self {
		Self {
			meta,
			partitions: RwLock::new(Vec::new()),
		}
	}

	/// The record shape of this store.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		&self.meta
	}

	/// Add a partition. Partition addition is serialized; the returned
	/// store is owned by the caller side for writing.
	pub fn add_partition(&self) -> Arc<IterableRecordStore> {
		let partition = Arc::new(IterableRecordStore::new(
			self.meta.clone(),
			Some(Arena::new(Discipline::Monotonic)),
		));
		self.partitions.write().push(partition.clone());
		partition
	}

	/// The partition at `index`.
	pub fn partition(&self, index: usize) -> Option<Arc<IterableRecordStore>> {
		self.partitions.read().get(index).cloned()
	}

	/// The number of partitions.
	pub fn partition_count(&self) -> usize {
		self.partitions.read().len()
	}

	/// The total number of records across all partitions.
	pub fn total_count(&self) -> usize {
		self.partitions.read().iter().map(|p| p.count()).sum()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::record::FieldType;
	use crate::val::Text;

	fn meta() -> Arc<RecordMeta> {
		Arc::new(RecordMeta::new(
			vec![FieldType::Int4, FieldType::varchar(None)],
			vec![false, true],
		))
	}

	#[test]
	fn append_preserves_insertion_order() {
		let store = IterableRecordStore::new(meta(), Some(Arena::new(Discipline::Monotonic)));
		for i in 0..10 {
			store
				.append_values(&[Value::Int4(i), Value::Text(Text::inline("x"))])
				.unwrap();
		}
		let read: Vec<i64> = store
			.iter()
			.map(|r| r.get_value(store.meta(), 0).as_int().unwrap())
			.collect();
		assert_eq!(read, (0..10).collect::<Vec<_>>());
	}

	#[test]
	fn append_deep_copies_heap_payloads() {
		let source = RecordStore::new(meta(), Some(Arena::new(Discipline::Monotonic)));
		let long = "a payload comfortably longer than fifteen bytes";
		let arena = Arena::new(Discipline::Monotonic);
		let src = source
			.append_values(&[Value::Int4(1), Value::Text(Text::new(long, &arena))])
			.unwrap();
		let target = RecordStore::new(meta(), Some(Arena::new(Discipline::Monotonic)));
		let copy = target.append(src);
		// Dropping the source arena must not invalidate the copy
		source.reset();
		match copy.get_value(&target.meta, 1) {
			Value::Text(text) => assert_eq!(text.as_str(), long),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn zero_size_records_keep_distinct_pointers() {
		let empty = Arc::new(RecordMeta::new(vec![], vec![]));
		let store = RecordStore::new(empty, None);
		let a = store.append_values(&[]).unwrap();
		let b = store.append_values(&[]).unwrap();
		assert_ne!(a.as_ptr(), b.as_ptr());
		assert_eq!(a.len(), 0);
	}

	#[test]
	fn pointer_table_sorts_stably() {
		let store = RecordStore::new(meta(), None);
		let table = PointerTable::new();
		for (i, key) in [3, 1, 3, 2].iter().enumerate() {
			let r = store
				.append_values(&[Value::Int4(*key), Value::Text(Text::inline(&i.to_string()))])
				.unwrap();
			table.append(r);
		}
		let m = store.meta().clone();
		table.sort_by(|a, b| crate::record::compare_fields(&m, a, b, &[0]));
		let keys: Vec<i64> =
			(0..table.len()).map(|i| table.get(i).unwrap().get_value(&m, 0).as_int().unwrap()).collect();
		assert_eq!(keys, vec![1, 2, 3, 3]);
		// The two records with key 3 keep their input order
		let tags: Vec<String> = (0..table.len())
			.map(|i| match table.get(i).unwrap().get_value(&m, 1) {
				Value::Text(t) => t.as_str().to_owned(),
				_ => unreachable!(),
			})
			.collect();
		assert_eq!(tags, vec!["1", "3", "0", "2"]);
	}

	#[test]
	fn result_store_partitions_accumulate() {
		let results = ResultStore::new(meta());
		let p0 = results.add_partition();
		let p1 = results.add_partition();
		p0.append_values(&[Value::Int4(1), Value::Empty]).unwrap();
		p1.append_values(&[Value::Int4(2), Value::Empty]).unwrap();
		p1.append_values(&[Value::Int4(3), Value::Empty]).unwrap();
		assert_eq!(results.partition_count(), 2);
		assert_eq!(results.total_count(), 3);
	}

	#[test]
	fn small_store_reuses_its_slot() {
		let small = SmallRecordStore::new(meta());
		let first = small.record();
		let second = small.record();
		assert_eq!(first.as_ptr(), second.as_ptr());
		let mut slot = small.record_mut();
		slot.set_value(small.meta(), 0, &Value::Int4(9), small.varlen_arena()).unwrap();
		assert_eq!(small.record().get_value(small.meta(), 0), Value::Int4(9));
	}
}
