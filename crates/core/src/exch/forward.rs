use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::err::Error;
use crate::exch::Poll;
use crate::mem::{Arena, Discipline};
use crate::record::{RecordMeta, RecordRef, RecordStore};
use crate::val::Value;

/// One sink/source lane of a forward exchange.
struct Lane {
	/// Owns the copied records and their varlen payloads
	store: RecordStore,
	queue: Mutex<VecDeque<RecordRef>>,
	eoi: AtomicBool,
}

/// A one-to-one pass-through exchange: sink `i` feeds source `i` in
/// insertion order. Used where the parallelism degree matches on both
/// sides; across lanes no ordering is defined.
pub struct ForwardExchange {
	meta: Arc<RecordMeta>,
	lanes: Vec<Lane>,
}

impl ForwardExchange {
	/// Create an exchange with one lane per upstream sink.
	pub fn new(meta: Arc<RecordMeta>, sink_count: usize) -> Self {
		let lanes = (0..sink_count.max(1))
			.map(|_| Lane {
				store: RecordStore::new(meta.clone(), Some(Arena::new(Discipline::Monotonic))),
				queue: Mutex::new(VecDeque::new()),
				eoi: AtomicBool::new(false),
			})
			.collect();
		Self {
			meta,
			lanes,
		}
	}

	/// The record shape crossing this exchange.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		&self.meta
	}

	/// The number of lanes.
	pub fn lane_count(&self) -> usize {
		self.lanes.len()
	}

	/// Enqueue a row of values on a lane.
	pub fn offer_values(&self, lane: usize, values: &[Value]) -> Result<(), Error> {
		let lane = &self.lanes[lane];
		let record = lane.store.append_values(values)?;
		lane.queue.lock().push_back(record);
		Ok(())
	}

	/// Enqueue a deep copy of a record on a lane.
	pub fn offer(&self, lane: usize, record: RecordRef) {
		let lane = &self.lanes[lane];
		let copy = lane.store.append(record);
		lane.queue.lock().push_back(copy);
	}

	/// Declare that a lane will receive no further records.
	pub fn end_of_input(&self, lane: usize) {
		self.lanes[lane].eoi.store(true, Ordering::Release);
	}

	/// Dequeue the next record of a lane in insertion order.
	pub fn poll(&self, lane: usize) -> Poll<RecordRef> {
		let lane = &self.lanes[lane];
		if let Some(record) = lane.queue.lock().pop_front() {
			return Poll::Ready(record);
		}
		if lane.eoi.load(Ordering::Acquire) {
			// Re-check: a record may have raced the flag
			match lane.queue.lock().pop_front() {
				Some(record) => Poll::Ready(record),
				None => Poll::End,
			}
		} else {
			Poll::Pending
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::record::FieldType;

	fn meta() -> Arc<RecordMeta> {
		Arc::new(RecordMeta::new(vec![FieldType::Int4], vec![false]))
	}

	#[test]
	fn lanes_preserve_insertion_order() {
		let exchange = ForwardExchange::new(meta(), 1);
		for i in 0..5 {
			exchange.offer_values(0, &[Value::Int4(i)]).unwrap();
		}
		exchange.end_of_input(0);
		let mut read = Vec::new();
		loop {
			match exchange.poll(0) {
				Poll::Ready(record) => read.push(record.get_value(exchange.meta(), 0)),
				Poll::End => break,
				Poll::Pending => unreachable!("input was complete"),
			}
		}
		assert_eq!(read, (0..5).map(Value::Int4).collect::<Vec<_>>());
	}

	#[test]
	fn pending_before_end_of_input() {
		let exchange = ForwardExchange::new(meta(), 1);
		assert!(matches!(exchange.poll(0), Poll::Pending));
		exchange.end_of_input(0);
		assert!(matches!(exchange.poll(0), Poll::End));
	}
}
