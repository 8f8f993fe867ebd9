use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::plan::ExecutableStatement;
use crate::rpc::version::ProtocolVersion;
use crate::val::Value;

/// A bindable parameter value. Untyped placeholders pick their type
/// up from the prepared statement's signature.
#[derive(Debug, Clone)]
pub enum ParameterValue {
	/// Any typed runtime value (bool, integers, floats, decimal,
	/// character, octet, temporal, LOB references)
	Typed(Value),
	/// A column reference used by bulk insert from file
	ReferenceColumn(String),
	/// An untyped null placeholder
	Null,
}

impl ParameterValue {
	/// The runtime value bound for this parameter, when it has one.
	pub fn value(&self) -> Option<Value> {
		match self {
			Self::Typed(value) => Some(*value),
			Self::Null => Some(Value::Empty),
			Self::ReferenceColumn(_) => None,
		}
	}
}

/// The payload of a request: the tagged service variants. SQL
/// compilation lives outside this crate, so statement-bearing
/// variants carry the compiled form alongside the SQL text.
pub enum RequestPayload {
	/// Compile-and-cache a statement for the session
	Prepare {
		text: String,
		statement: Arc<ExecutableStatement>,
	},
	/// Begin a transaction
	Begin {
		long: bool,
		read_only: bool,
		write_preserves: Vec<String>,
	},
	/// Execute a statement which produces no result set
	ExecuteStatement {
		statement: Arc<ExecutableStatement>,
	},
	/// Execute a query, streaming its result records
	ExecuteQuery {
		statement: Arc<ExecutableStatement>,
	},
	/// Execute a prepared statement by handle
	ExecutePreparedStatement {
		handle: u64,
		parameters: HashMap<String, ParameterValue>,
	},
	/// Execute a prepared query by handle
	ExecutePreparedQuery {
		handle: u64,
		parameters: HashMap<String, ParameterValue>,
	},
	/// Commit the session's transaction
	Commit {
		wait_for_stored: bool,
	},
	/// Roll the session's transaction back
	Rollback,
	/// List the tables in the catalog
	ListTables,
	/// Fetch one table's definition
	GetTableMetadata {
		table: String,
	},
	/// Describe a prepared statement's result shape
	Describe {
		handle: u64,
	},
	/// Tear the session down
	Disconnect,
}

/// A service request: protocol version, session, transaction linkage
/// and the payload.
pub struct Request {
	pub version: ProtocolVersion,
	pub session_id: Uuid,
	pub payload: RequestPayload,
}

impl Request {
	/// A request from the current protocol version.
	pub fn new(session_id: Uuid, payload: RequestPayload) -> Self {
		Self {
			version: ProtocolVersion::current(),
			session_id,
			payload,
		}
	}
}

/// What a request returns across the service boundary.
#[derive(Debug)]
pub enum ResponseBody {
	/// Plain success
	Ok,
	/// A prepared statement handle
	Prepared {
		handle: u64,
	},
	/// A write completed, reporting affected rows
	RowCount {
		rows: u64,
	},
	/// A query completed; records were streamed to the data channel
	ResultSet {
		records: u64,
	},
	/// The catalog table list
	Tables {
		names: Vec<String>,
	},
	/// One table definition
	TableMetadata {
		table: crate::catalog::TableDef,
	},
	/// A prepared statement's output columns
	Description {
		columns: Vec<crate::record::FieldType>,
	},
}

/// A service response: the status code plus the body on success.
#[derive(Debug)]
pub struct Response {
	pub status: crate::rpc::StatusCode,
	pub body: Option<ResponseBody>,
	/// Diagnostic text for failures
	pub message: Option<String>,
}

impl Response {
	/// A success response.
	pub fn ok(body: ResponseBody) -> Self {
		Self {
			status: crate::rpc::StatusCode::Ok,
			body: Some(body),
			message: None,
		}
	}

	/// A failure response.
	pub fn error(status: crate::rpc::StatusCode, message: impl Into<String>) -> Self {
		Self {
			status,
			body: None,
			message: Some(message.into()),
		}
	}
}
