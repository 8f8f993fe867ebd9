use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog;
use crate::ctx::Context;
use crate::dbs::channel::DataChannel;
use crate::err::Error;
use crate::exch::Exchange;
use crate::exec::table::TableAccess;
use crate::fnc::Registry;
use crate::kvs::Transaction;
use crate::plan::StepId;
use crate::val::Value;

/// The execution context one job's tasks share: the request, the
/// transaction, the function registry, parameter bindings, the data
/// channel and the instantiated exchanges.
pub struct ProcessContext {
	pub request: Context,
	pub tx: Arc<Transaction>,
	pub registry: Arc<Registry>,
	pub parameters: Arc<HashMap<String, Value>>,
	pub channel: Option<Arc<dyn DataChannel>>,
	exchanges: HashMap<StepId, Exchange>,
	/// Cached table handles, filled on first access
	tables: Mutex<HashMap<String, Arc<TableAccess>>>,
	/// Rows affected by write operators
	rows_affected: AtomicU64,
}

impl ProcessContext {
	/// Create the context for one job.
	pub fn new(
		request: Context,
		tx: Arc<Transaction>,
		registry: Arc<Registry>,
		parameters: Arc<HashMap<String, Value>>,
		channel: Option<Arc<dyn DataChannel>>,
		exchanges: HashMap<StepId, Exchange>,
	) -> Arc<Self> {
		Arc::new(Self {
			request,
			tx,
			registry,
			parameters,
			channel,
			exchanges,
			tables: Mutex::new(HashMap::new()),
			rows_affected: AtomicU64::new(0),
		})
	}

	/// The exchange instantiated for a step.
	pub fn exchange(&self, step: StepId) -> Result<&Exchange, Error> {
		match self.exchanges.get(&step) {
			Some(exchange) => Ok(exchange),
			None => fail!("no exchange was instantiated for {step}"),
		}
	}

	/// The cached access handle of a table, loading its definition
	/// from the catalog on first use.
	pub fn table(&self, name: &str) -> Result<Arc<TableAccess>, Error> {
		let mut tables = self.tables.lock();
		if let Some(table) = tables.get(name) {
			return Ok(table.clone());
		}
		let def = catalog::get_table(&self.tx, name)?;
		let table = Arc::new(TableAccess::new(def));
		tables.insert(name.to_owned(), table.clone());
		Ok(table)
	}

	/// Count rows affected by a write operator.
	pub fn add_rows_affected(&self, rows: u64) {
		self.rows_affected.fetch_add(rows, Ordering::AcqRel);
	}

	/// Rows affected by the job's write operators.
	pub fn rows_affected(&self) -> u64 {
		self.rows_affected.load(Ordering::Acquire)
	}
}
