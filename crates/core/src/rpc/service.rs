//! Request dispatch at the service boundary.
//!
//! A [`Service`] owns the sessions of one engine node and routes each
//! tagged request variant onto the statement executor. Requests with
//! an incompatible protocol major version are rejected before any
//! session state is touched.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::catalog;
use crate::dbs::channel::DataChannel;
use crate::dbs::{Executor, Options};
use crate::err::Error;
use crate::kvs::{CommitLevel, Transaction, TransactionOptions};
use crate::plan::{ExecutableStatement, StatementKind};
use crate::rpc::request::{ParameterValue, Request, RequestPayload, Response, ResponseBody};
use crate::rpc::{check_version, StatusCode};
use crate::val::Value;

struct SessionState {
	tx: Option<Arc<Transaction>>,
}

/// The service boundary of one engine node.
pub struct Service {
	executor: Arc<Executor>,
	sessions: DashMap<Uuid, SessionState>,
}

impl Service {
	/// Create a service over an executor.
	pub fn new(executor: Arc<Executor>) -> Self {
		Self {
			executor,
			sessions: DashMap::new(),
		}
	}

	/// The underlying executor.
	pub fn executor(&self) -> &Arc<Executor> {
		&self.executor
	}

	/// Handle one request. Query results stream into `channel`.
	pub fn handle(
		&self,
		request: Request,
		channel: Option<Arc<dyn DataChannel>>,
		options: &Options,
	) -> Response {
		if let Err(error) = check_version(request.version) {
			return Response::error(error.status_code(), error.to_string());
		}
		let session = request.session_id;
		match request.payload {
			RequestPayload::Prepare {
				text,
				statement,
			} => {
				let handle = self.executor.prepared().insert(&text, session, statement);
				Response::ok(ResponseBody::Prepared {
					handle,
				})
			}
			RequestPayload::Begin {
				long,
				read_only,
				write_preserves,
			} => {
				let mut tx_options = if read_only {
					TransactionOptions::read_only()
				} else if long {
					TransactionOptions::ltx(write_preserves)
				} else {
					TransactionOptions::occ()
				};
				tx_options.session_id = session;
				match self.executor.datastore().transaction(tx_options) {
					Ok(tx) => {
						self.sessions.insert(
							session,
							SessionState {
								tx: Some(Arc::new(tx)),
							},
						);
						Response::ok(ResponseBody::Ok)
					}
					Err(error) => Response::error(error.status_code(), error.to_string()),
				}
			}
			RequestPayload::ExecuteStatement {
				statement,
			} => self.run(session, &statement, HashMap::new(), channel, options),
			RequestPayload::ExecuteQuery {
				statement,
			} => self.run(session, &statement, HashMap::new(), channel, options),
			RequestPayload::ExecutePreparedStatement {
				handle,
				parameters,
			}
			| RequestPayload::ExecutePreparedQuery {
				handle,
				parameters,
			} => match self.executor.prepared().get(handle, session) {
				Some(statement) => {
					let bound = match bind_parameters(parameters) {
						Ok(bound) => bound,
						Err(error) => {
							return Response::error(error.status_code(), error.to_string())
						}
					};
					self.run(session, &statement, bound, channel, options)
				}
				None => {
					let error = Error::UnknownPreparedStatement;
					Response::error(error.status_code(), error.to_string())
				}
			},
			RequestPayload::Commit {
				wait_for_stored,
			} => self.commit(session, wait_for_stored),
			RequestPayload::Rollback => match self.take_tx(session) {
				Some(tx) => match tx.abort() {
					Ok(()) => Response::ok(ResponseBody::Ok),
					Err(error) => Response::error(error.status_code(), error.to_string()),
				},
				None => {
					let error = Error::InactiveTransaction;
					Response::error(error.status_code(), error.to_string())
				}
			},
			RequestPayload::ListTables => self.with_read_tx(|tx| {
				let tables = catalog::list_tables(tx)?;
				Ok(ResponseBody::Tables {
					names: tables.into_iter().map(|t| t.name).collect(),
				})
			}),
			RequestPayload::GetTableMetadata {
				table,
			} => self.with_read_tx(|tx| {
				Ok(ResponseBody::TableMetadata {
					table: catalog::get_table(tx, &table)?,
				})
			}),
			RequestPayload::Describe {
				handle,
			} => match self.executor.prepared().get(handle, session) {
				Some(statement) => {
					let columns = statement
						.output_meta
						.as_ref()
						.map(|meta| meta.field_types().to_vec())
						.unwrap_or_default();
					Response::ok(ResponseBody::Description {
						columns,
					})
				}
				None => {
					let error = Error::UnknownPreparedStatement;
					Response::error(error.status_code(), error.to_string())
				}
			},
			RequestPayload::Disconnect => {
				if let Some((_, state)) = self.sessions.remove(&session) {
					if let Some(tx) = state.tx {
						let _ = tx.abort();
					}
				}
				self.executor.prepared().drop_session(session);
				Response::ok(ResponseBody::Ok)
			}
		}
	}

	fn session_tx(&self, session: Uuid) -> Option<Arc<Transaction>> {
		self.sessions.get(&session).and_then(|state| state.tx.clone())
	}

	fn take_tx(&self, session: Uuid) -> Option<Arc<Transaction>> {
		self.sessions.get_mut(&session).and_then(|mut state| state.tx.take())
	}

	/// Run a statement under the session transaction, or under an
	/// auto-committed one when the session has none open.
	fn run(
		&self,
		session: Uuid,
		statement: &ExecutableStatement,
		parameters: HashMap<String, Value>,
		channel: Option<Arc<dyn DataChannel>>,
		options: &Options,
	) -> Response {
		let (tx, auto) = match self.session_tx(session) {
			Some(tx) => (tx, false),
			None => {
				let mut tx_options = TransactionOptions::occ();
				tx_options.session_id = session;
				match self.executor.datastore().transaction(tx_options) {
					Ok(tx) => (Arc::new(tx), true),
					Err(error) => {
						return Response::error(error.status_code(), error.to_string())
					}
				}
			}
		};
		let records_before =
			channel.as_ref().map(|c| c.stats().records()).unwrap_or(0);
		let handle = match self.executor.execute(
			statement,
			tx.clone(),
			Arc::new(parameters),
			channel.clone(),
			options,
		) {
			Ok(handle) => handle,
			Err(error) => return Response::error(error.status_code(), error.to_string()),
		};
		let result = handle.wait();
		if let Some(error) = result.error {
			if auto {
				let _ = tx.abort();
			}
			return Response::error(result.status, error.to_string());
		}
		if auto {
			match tx.commit(CommitLevel::Available).and_then(|ticket| ticket.wait()) {
				Ok(()) => {}
				Err(error) => return Response::error(error.status_code(), error.to_string()),
			}
		}
		match statement.kind {
			StatementKind::Query => {
				let records =
					channel.as_ref().map(|c| c.stats().records()).unwrap_or(0) - records_before;
				Response::ok(ResponseBody::ResultSet {
					records,
				})
			}
			_ => Response::ok(ResponseBody::RowCount {
				rows: result.rows_affected,
			}),
		}
	}

	fn commit(&self, session: Uuid, wait_for_stored: bool) -> Response {
		let Some(tx) = self.take_tx(session) else {
			let error = Error::InactiveTransaction;
			return Response::error(error.status_code(), error.to_string());
		};
		let level = if wait_for_stored {
			CommitLevel::Stored
		} else {
			CommitLevel::Available
		};
		match tx.commit(level).and_then(|ticket| ticket.wait()) {
			Ok(()) => Response::ok(ResponseBody::Ok),
			Err(error) => Response::error(error.status_code(), error.to_string()),
		}
	}

	fn with_read_tx(
		&self,
		body: impl FnOnce(&Transaction) -> Result<ResponseBody, Error>,
	) -> Response {
		let tx = match self.executor.datastore().transaction(TransactionOptions::read_only()) {
			Ok(tx) => tx,
			Err(error) => return Response::error(error.status_code(), error.to_string()),
		};
		let result = body(&tx);
		let _ = tx.abort();
		match result {
			Ok(body) => Response::ok(body),
			Err(error) => Response::error(error.status_code(), error.to_string()),
		}
	}
}

/// Resolve bindable parameters into runtime values.
fn bind_parameters(
	parameters: HashMap<String, ParameterValue>,
) -> Result<HashMap<String, Value>, Error> {
	let mut out = HashMap::with_capacity(parameters.len());
	for (name, parameter) in parameters {
		match parameter.value() {
			Some(value) => {
				out.insert(name, value);
			}
			None => {
				return Err(Error::InvalidArgument(format!(
					"parameter '{name}' cannot be bound outside a bulk load"
				)))
			}
		}
	}
	Ok(out)
}
