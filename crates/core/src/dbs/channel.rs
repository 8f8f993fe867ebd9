//! The per-request output stream: data channels and writers.
//!
//! A terminal step emits records through a writer acquired from the
//! request's data channel. Writers append opaque payload bytes and
//! mark record boundaries with `commit`; consumers read in
//! commit-sized units. A writer may block when internal buffers fill
//! up, which is how back-pressure reaches the producing task. Queries
//! with ORDER BY use exactly one writer; otherwise cross-writer
//! ordering is the caller's concern.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::cnf::WRITER_BUFFER_SIZE;
use crate::err::Error;
use crate::key::decode_row;
use crate::record::ResultStore;

/// Statistics of one data channel.
#[derive(Debug, Default)]
pub struct ChannelStats {
	records: AtomicU64,
	bytes: AtomicU64,
}

impl ChannelStats {
	/// Records committed across all writers.
	pub fn records(&self) -> u64 {
		self.records.load(Ordering::Acquire)
	}

	/// Payload bytes committed across all writers.
	pub fn bytes(&self) -> u64 {
		self.bytes.load(Ordering::Acquire)
	}

	fn record(&self, bytes: u64) {
		self.records.fetch_add(1, Ordering::AcqRel);
		self.bytes.fetch_add(bytes, Ordering::AcqRel);
	}
}

/// A writer handed out by a data channel.
pub trait Writer: Send {
	/// Append opaque payload bytes to the current record. May block
	/// under back-pressure.
	fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;

	/// Mark the record boundary, making the buffered payload one
	/// consumable unit.
	fn commit(&mut self) -> Result<(), Error>;
}

/// A per-request output stream.
pub trait DataChannel: Send + Sync {
	/// Acquire a fresh writer. Multiple writers may be live at once.
	fn acquire(&self) -> Result<Box<dyn Writer>, Error>;

	/// Return a writer; everything committed on it becomes visible to
	/// the consumer.
	fn release(&self, writer: Box<dyn Writer>) -> Result<(), Error>;

	/// The statistics of this channel.
	fn stats(&self) -> &ChannelStats;
}

/// A channel materialising results into a partitioned
/// [`ResultStore`]: each acquired writer appends into its own
/// partition. Used by tests and short queries.
pub struct ResultStoreChannel {
	store: Arc<ResultStore>,
	stats: Arc<ChannelStats>,
}

impl ResultStoreChannel {
	/// Create a channel over a result store.
	pub fn new(store: Arc<ResultStore>) -> Self {
		Self {
			store,
			stats: Arc::new(ChannelStats::default()),
		}
	}

	/// The backing result store.
	pub fn store(&self) -> &Arc<ResultStore> {
		&self.store
	}
}

impl DataChannel for ResultStoreChannel {
	fn acquire(&self) -> Result<Box<dyn Writer>, Error> {
		let partition = self.store.add_partition();
		Ok(Box::new(ResultStoreWriter {
			partition,
			buffer: Vec::new(),
			stats: self.stats.clone(),
		}))
	}

	fn release(&self, writer: Box<dyn Writer>) -> Result<(), Error> {
		// Rows were appended at commit time; fold the stats in
		drop(writer);
		Ok(())
	}

	fn stats(&self) -> &ChannelStats {
		&self.stats
	}
}

struct ResultStoreWriter {
	partition: Arc<crate::record::IterableRecordStore>,
	buffer: Vec<u8>,
	stats: Arc<ChannelStats>,
}

impl Writer for ResultStoreWriter {
	fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.buffer.extend_from_slice(bytes);
		Ok(())
	}

	fn commit(&mut self) -> Result<(), Error> {
		let payload = std::mem::take(&mut self.buffer);
		let arena = crate::mem::Arena::new(crate::mem::Discipline::Monotonic);
		let values = decode_row(&payload, &arena)?;
		self.partition.append_values(&values)?;
		self.stats.record(payload.len() as u64);
		Ok(())
	}
}

/// A channel streaming commit-sized payload units over a bounded
/// queue, modelling the network boundary. Writers block when the
/// queue is full.
pub struct StreamChannel {
	sender: async_channel::Sender<Bytes>,
	receiver: async_channel::Receiver<Bytes>,
	stats: Arc<ChannelStats>,
}

impl StreamChannel {
	/// Create a channel with the default queue depth.
	pub fn new() -> Self {
		Self::with_capacity(64)
	}

	/// Create a channel with an explicit queue depth.
	pub fn with_capacity(capacity: usize) -> Self {
		let (sender, receiver) = async_channel::bounded(capacity);
		Self {
			sender,
			receiver,
			stats: Arc::new(ChannelStats::default()),
		}
	}

	/// The consumer side: one payload unit per committed record.
	pub fn receiver(&self) -> async_channel::Receiver<Bytes> {
		self.receiver.clone()
	}

	/// Close the stream; consumers drain what was committed.
	pub fn close(&self) {
		self.sender.close();
	}
}

impl Default for StreamChannel {
	fn default() -> Self {
		Self::new()
	}
}

struct StreamWriter {
	sender: async_channel::Sender<Bytes>,
	buffer: Vec<u8>,
	stats: Arc<ChannelStats>,
}

impl Writer for StreamWriter {
	fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
		if self.buffer.len() + bytes.len() > *WRITER_BUFFER_SIZE {
			return Err(Error::ResourceLimit("writer record exceeds the buffer size".to_owned()));
		}
		self.buffer.extend_from_slice(bytes);
		Ok(())
	}

	fn commit(&mut self) -> Result<(), Error> {
		let payload = Bytes::from(std::mem::take(&mut self.buffer));
		self.stats.record(payload.len() as u64);
		// Blocks when the consumer has not caught up
		self.sender
			.send_blocking(payload)
			.map_err(|_| Error::Tx("result stream closed by the consumer".to_owned()))
	}
}

impl DataChannel for StreamChannel {
	fn acquire(&self) -> Result<Box<dyn Writer>, Error> {
		Ok(Box::new(StreamWriter {
			sender: self.sender.clone(),
			buffer: Vec::new(),
			stats: self.stats.clone(),
		}))
	}

	fn release(&self, writer: Box<dyn Writer>) -> Result<(), Error> {
		drop(writer);
		Ok(())
	}

	fn stats(&self) -> &ChannelStats {
		&self.stats
	}
}
