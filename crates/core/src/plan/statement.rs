use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::plan::expr::Expression;
use crate::plan::graph::StepGraph;
use crate::plan::operator::WriteFullKind;
use crate::record::RecordMeta;

/// What a statement does, as seen by the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
	/// Produces a result set
	Query,
	/// Mutates data and reports a row count
	Write,
	/// Mutates the catalog
	Ddl,
}

/// A bulk write of literal rows, driven by a single `Write` task
/// instead of a step graph.
#[derive(Debug, Clone)]
pub struct WriteValues {
	pub table: String,
	pub kind: WriteFullKind,
	/// One expression row per inserted record
	pub rows: Vec<Vec<Expression>>,
}

/// A compiled, executable statement: the step graph plus the external
/// record shape of any result it emits. Statements which only insert
/// literal rows carry a [`WriteValues`] payload instead of a graph.
#[derive(Debug, Clone)]
pub struct ExecutableStatement {
	pub kind: StatementKind,
	pub graph: StepGraph,
	/// The record shape delivered to the result channel, for queries
	pub output_meta: Option<Arc<RecordMeta>>,
	/// Placeholder names the statement expects bound
	pub placeholders: Vec<String>,
	/// The bulk write payload of an INSERT ... VALUES statement
	pub write_values: Option<WriteValues>,
}

impl ExecutableStatement {
	/// A query statement.
	pub fn query(graph: StepGraph, output_meta: Arc<RecordMeta>) -> Self {
		Self {
			kind: StatementKind::Query,
			graph,
			output_meta: Some(output_meta),
			placeholders: Vec::new(),
			write_values: None,
		}
	}

	/// A write statement driven by a step graph.
	pub fn write(graph: StepGraph) -> Self {
		Self {
			kind: StatementKind::Write,
			graph,
			output_meta: None,
			placeholders: Vec::new(),
			write_values: None,
		}
	}

	/// An INSERT ... VALUES statement.
	pub fn insert_values(table: impl Into<String>, kind: WriteFullKind, rows: Vec<Vec<Expression>>) -> Self {
		Self {
			kind: StatementKind::Write,
			graph: StepGraph::new(),
			output_meta: None,
			placeholders: Vec::new(),
			write_values: Some(WriteValues {
				table: table.into(),
				kind,
				rows,
			}),
		}
	}

	/// Declare the placeholders the statement expects.
	pub fn with_placeholders(mut self, placeholders: Vec<String>) -> Self {
		self.placeholders = placeholders;
		self
	}
}

/// The cache of prepared statements, keyed by the statement body hash
/// and the owning session. A prepared statement disappears with its
/// session.
pub struct PreparedStatementCache {
	entries: DashMap<(u64, Uuid), Arc<ExecutableStatement>>,
}

impl PreparedStatementCache {
	/// An empty cache.
	pub fn new() -> Self {
		Self {
			entries: DashMap::new(),
		}
	}

	/// The cache key of a statement body for a session.
	pub fn key(body: &str, session: Uuid) -> (u64, Uuid) {
		let mut hasher = DefaultHasher::new();
		body.hash(&mut hasher);
		(hasher.finish(), session)
	}

	/// Store a prepared statement, returning its handle.
	pub fn insert(&self, body: &str, session: Uuid, statement: Arc<ExecutableStatement>) -> u64 {
		let key = Self::key(body, session);
		self.entries.insert(key, statement);
		key.0
	}

	/// Resolve a prepared handle for a session.
	pub fn get(&self, handle: u64, session: Uuid) -> Option<Arc<ExecutableStatement>> {
		self.entries.get(&(handle, session)).map(|entry| entry.value().clone())
	}

	/// Drop every statement prepared by a session.
	pub fn drop_session(&self, session: Uuid) {
		self.entries.retain(|(_, owner), _| *owner != session);
	}

	/// The number of cached statements.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether the cache is empty.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl Default for PreparedStatementCache {
	fn default() -> Self {
		Self::new()
	}
}
