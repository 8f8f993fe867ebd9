use std::sync::Arc;

use parking_lot::Mutex;

use crate::dbs::channel::{DataChannel, Writer};
use crate::err::Error;
use crate::key::encode_row;
use crate::record::{unpack, RecordMeta, RecordRef};
use crate::val::Value;

/// The terminal exchange: a sink with no source. Each sink writes
/// records to the request's data channel through an acquired writer;
/// the writer is released on end-of-input.
pub struct DeliverExchange {
	meta: Arc<RecordMeta>,
	channel: Arc<dyn DataChannel>,
}

impl DeliverExchange {
	/// Create a deliver exchange over the request data channel.
	pub fn new(meta: Arc<RecordMeta>, channel: Arc<dyn DataChannel>) -> Self {
		Self {
			meta,
			channel,
		}
	}

	/// The record shape delivered to the channel.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		&self.meta
	}

	/// Open a sink: acquires a writer from the channel.
	pub fn sink(&self) -> Result<DeliverSink, Error> {
		Ok(DeliverSink {
			meta: self.meta.clone(),
			channel: self.channel.clone(),
			writer: Mutex::new(Some(self.channel.acquire()?)),
		})
	}
}

/// A writing handle of the deliver exchange.
pub struct DeliverSink {
	meta: Arc<RecordMeta>,
	channel: Arc<dyn DataChannel>,
	writer: Mutex<Option<Box<dyn Writer>>>,
}

impl DeliverSink {
	/// Serialize a record and commit it as one consumable unit.
	pub fn offer(&self, record: RecordRef) -> Result<(), Error> {
		self.offer_values(&unpack(&self.meta, record))
	}

	/// Serialize a row of values and commit it as one unit.
	pub fn offer_values(&self, values: &[Value]) -> Result<(), Error> {
		let payload = encode_row(values)?;
		let mut guard = self.writer.lock();
		let writer = guard.as_mut().ok_or_else(|| {
			Error::InvalidState("the deliver sink is already closed".to_owned())
		})?;
		writer.write(&payload)?;
		writer.commit()
	}

	/// Close the sink, releasing the writer so committed records
	/// become visible.
	pub fn end_of_input(&self) -> Result<(), Error> {
		if let Some(writer) = self.writer.lock().take() {
			self.channel.release(writer)?;
		}
		Ok(())
	}
}

impl Drop for DeliverSink {
	fn drop(&mut self) {
		let _ = self.end_of_input();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dbs::channel::ResultStoreChannel;
	use crate::record::{FieldType, ResultStore};

	#[test]
	fn records_land_on_the_data_channel() {
		let meta = Arc::new(RecordMeta::new(vec![FieldType::Int8], vec![false]));
		let store = Arc::new(ResultStore::new(meta.clone()));
		let channel = Arc::new(ResultStoreChannel::new(store.clone()));
		let exchange = DeliverExchange::new(meta, channel.clone());
		let sink = exchange.sink().unwrap();
		for i in 0..3 {
			sink.offer_values(&[Value::Int8(i)]).unwrap();
		}
		sink.end_of_input().unwrap();
		assert_eq!(store.total_count(), 3);
		assert_eq!(channel.stats().records(), 3);
	}
}
