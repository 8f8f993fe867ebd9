use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::err::Error;
use crate::exch::Poll;
use crate::mem::{Arena, Discipline};
use crate::record::{IterableRecordStore, RecordMeta, RecordRef};
use crate::val::Value;

/// A write-once, read-everywhere exchange: every downstream source
/// sees the same materialized sequence once all sinks have closed.
pub struct BroadcastExchange {
	store: IterableRecordStore,
	open_sinks: AtomicUsize,
	sealed: AtomicBool,
}

impl BroadcastExchange {
	/// Create a broadcast fed by `sink_count` sinks.
	pub fn new(meta: Arc<RecordMeta>, sink_count: usize) -> Self {
		Self {
			store: IterableRecordStore::new(meta, Some(Arena::new(Discipline::Monotonic))),
			open_sinks: AtomicUsize::new(sink_count.max(1)),
			sealed: AtomicBool::new(false),
		}
	}

	/// The record shape crossing this exchange.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		self.store.meta()
	}

	/// Write a row of values. Across sinks no ordering is defined.
	pub fn offer_values(&self, values: &[Value]) -> Result<(), Error> {
		self.store.append_values(values)?;
		Ok(())
	}

	/// Write a deep copy of a record.
	pub fn offer(&self, record: RecordRef) {
		self.store.append(record);
	}

	/// Declare one sink's end-of-input; the sequence seals when the
	/// last sink closes.
	pub fn end_of_input(&self) {
		if self.open_sinks.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.sealed.store(true, Ordering::Release);
		}
	}

	/// The sealed record at `index`, for cursor-based consumers.
	pub fn get(&self, index: usize) -> Option<RecordRef> {
		if !self.sealed.load(Ordering::Acquire) {
			return None;
		}
		self.store.store().get(index)
	}

	/// Open a reader over the sealed sequence. Every reader sees the
	/// same records.
	pub fn reader(&self) -> Poll<BroadcastReader<'_>> {
		if !self.sealed.load(Ordering::Acquire) {
			return Poll::Pending;
		}
		Poll::Ready(BroadcastReader {
			exchange: self,
			next: 0,
		})
	}
}

/// A cursor over a sealed broadcast sequence.
pub struct BroadcastReader<'a> {
	exchange: &'a BroadcastExchange,
	next: usize,
}

impl Iterator for BroadcastReader<'_> {
	type Item = RecordRef;

	fn next(&mut self) -> Option<RecordRef> {
		let record = self.exchange.store.store().get(self.next)?;
		self.next += 1;
		Some(record)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::record::FieldType;

	#[test]
	fn every_reader_sees_the_same_sequence() {
		let exchange = BroadcastExchange::new(
			Arc::new(RecordMeta::new(vec![FieldType::Int4], vec![false])),
			2,
		);
		exchange.offer_values(&[Value::Int4(1)]).unwrap();
		exchange.end_of_input();
		assert!(matches!(exchange.reader(), Poll::Pending));
		exchange.offer_values(&[Value::Int4(2)]).unwrap();
		exchange.end_of_input();
		for _ in 0..2 {
			let Poll::Ready(reader) = exchange.reader() else {
				panic!("sealed");
			};
			let read: Vec<Value> =
				reader.map(|r| r.get_value(exchange.meta(), 0)).collect();
			assert_eq!(read, vec![Value::Int4(1), Value::Int4(2)]);
		}
	}
}
