//! The exchange layer: typed flows between steps.
//!
//! An exchange lives between an upstream step's output port and a
//! downstream step's input port. The upstream side writes through
//! *sinks*, the downstream side reads through *sources*. Every sink
//! owns its arena: records crossing an exchange are deep-copied so
//! payloads outlive the producing task. Five kinds exist: forward
//! (pass-through), group (shuffle and sort), broadcast, aggregate
//! (incremental fold) and deliver (terminal, into the data channel).

pub mod aggregate;
pub mod broadcast;
pub mod deliver;
pub mod forward;
pub mod group;

pub use aggregate::AggregateExchange;
pub use broadcast::BroadcastExchange;
pub use deliver::DeliverExchange;
pub use forward::ForwardExchange;
pub use group::{GroupExchange, GroupSource};

use std::sync::Arc;

use crate::cnf::DEFAULT_PARTITIONS;
use crate::dbs::channel::DataChannel;
use crate::err::Error;
use crate::plan::ExchangeSpec;
use crate::record::RecordMeta;

/// What a source poll yielded.
#[derive(Debug, Clone, Copy)]
pub enum Poll<T> {
	/// A record is available
	Ready(T),
	/// Input is not complete yet; the task should yield
	Pending,
	/// No further records will arrive
	End,
}

/// Immutable post-transfer metadata of a shuffle or aggregate flow.
#[derive(Debug, Clone, Copy)]
pub struct RunInfo {
	/// Whether the exchange saw no input at all
	pub was_empty: bool,
	/// The number of records after the transfer
	pub record_count: u64,
}

/// A runtime exchange of any kind.
#[derive(Clone)]
pub enum Exchange {
	Forward(Arc<ForwardExchange>),
	Group(Arc<GroupExchange>),
	Broadcast(Arc<BroadcastExchange>),
	Aggregate(Arc<AggregateExchange>),
	Deliver(Arc<DeliverExchange>),
}

impl Exchange {
	/// Instantiate an exchange from its plan specification.
	/// `sink_count` is the upstream parallelism; deliver exchanges
	/// additionally need the request data channel.
	pub fn from_spec(
		spec: &ExchangeSpec,
		meta: Arc<RecordMeta>,
		sink_count: usize,
		channel: Option<Arc<dyn DataChannel>>,
	) -> Result<Exchange, Error> {
		Ok(match spec {
			ExchangeSpec::Forward => {
				Exchange::Forward(Arc::new(ForwardExchange::new(meta, sink_count)))
			}
			ExchangeSpec::Group {
				key_fields,
				directions,
				partitions,
			} => Exchange::Group(Arc::new(GroupExchange::new(
				meta,
				key_fields.clone(),
				directions.clone(),
				partitions.unwrap_or(*DEFAULT_PARTITIONS),
				sink_count,
			))),
			ExchangeSpec::Broadcast => {
				Exchange::Broadcast(Arc::new(BroadcastExchange::new(meta, sink_count)))
			}
			ExchangeSpec::Aggregate {
				key_fields,
				aggregations,
				partitions,
			} => Exchange::Aggregate(Arc::new(AggregateExchange::new(
				meta,
				key_fields.clone(),
				aggregations.clone(),
				partitions.unwrap_or(*DEFAULT_PARTITIONS),
				sink_count,
			)?)),
			ExchangeSpec::Deliver => {
				let channel = channel.ok_or_else(|| {
					Error::InvalidState("a deliver exchange needs a data channel".to_owned())
				})?;
				Exchange::Deliver(Arc::new(DeliverExchange::new(meta, channel)))
			}
		})
	}

	/// The record shape crossing this exchange.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		match self {
			Self::Forward(e) => e.meta(),
			Self::Group(e) => e.meta(),
			Self::Broadcast(e) => e.meta(),
			Self::Aggregate(e) => e.meta(),
			Self::Deliver(e) => e.meta(),
		}
	}

	/// The run info of a shuffle or aggregate flow, once its transfer
	/// completed.
	pub fn run_info(&self) -> Option<RunInfo> {
		match self {
			Self::Group(e) => e.run_info(),
			Self::Aggregate(e) => e.run_info(),
			_ => None,
		}
	}
}
