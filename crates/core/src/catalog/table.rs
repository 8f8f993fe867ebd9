use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::err::Error;
use crate::key::Direction;
use crate::record::{FieldType, RecordMeta};

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
	pub name: String,
	pub field_type: FieldType,
	pub nullable: bool,
}

impl ColumnDef {
	/// A column definition.
	pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
		Self {
			name: name.into(),
			field_type,
			nullable,
		}
	}
}

/// A secondary index over a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
	pub name: String,
	/// Key columns as (column index, direction) pairs
	pub columns: Vec<(usize, Direction)>,
	pub unique: bool,
}

impl IndexDef {
	/// The storage name of this index for the given table.
	pub fn storage_name(&self, table: &str) -> String {
		format!("{table}#{}", self.name)
	}
}

/// A table definition: columns, the primary key and any secondary
/// indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
	pub name: String,
	pub columns: Vec<ColumnDef>,
	/// Indexes into `columns` forming the primary key, in order
	pub primary_key: Vec<usize>,
	pub indexes: Vec<IndexDef>,
}

impl TableDef {
	/// A table with the given columns and primary key.
	pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>, primary_key: Vec<usize>) -> Self {
		Self {
			name: name.into(),
			columns,
			primary_key,
			indexes: Vec::new(),
		}
	}

	/// Add a secondary index.
	pub fn with_index(mut self, index: IndexDef) -> Self {
		self.indexes.push(index);
		self
	}

	/// The record shape of a full row of this table.
	pub fn row_meta(&self) -> Arc<RecordMeta> {
		Arc::new(RecordMeta::new(
			self.columns.iter().map(|c| c.field_type).collect(),
			self.columns.iter().map(|c| c.nullable).collect(),
		))
	}

	/// The primary key columns as (column index, direction) pairs.
	pub fn primary_key_columns(&self) -> Vec<(usize, Direction)> {
		self.primary_key.iter().map(|index| (*index, Direction::Ascending)).collect()
	}

	/// Resolve a column index by name.
	pub fn column_index(&self, name: &str) -> Result<usize, Error> {
		self.columns.iter().position(|c| c.name == name).ok_or_else(|| Error::ColumnNotFound {
			name: name.to_owned(),
		})
	}

	/// The serialized payload embedded in the table's storage options.
	pub fn options_payload(&self) -> Result<Vec<u8>, Error> {
		Ok(bincode::serialize(self)?)
	}

	/// Rebuild a definition from a storage options payload.
	pub fn from_options_payload(payload: &[u8]) -> Result<Self, Error> {
		Ok(bincode::deserialize(payload)?)
	}
}
