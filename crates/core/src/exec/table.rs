//! Index-target access: the binding between operators and the
//! storage boundary.
//!
//! A table's primary index stores the encoded key columns against the
//! serialized full row; each secondary index stores the encoded index
//! columns suffixed with the primary key bytes (or alone when the
//! index is unique) against the primary key bytes. Every write
//! maintains the secondary indexes alongside the primary.

use std::ops::Bound;
use std::sync::Arc;

use crate::catalog::{IndexDef, TableDef};
use crate::err::Error;
use crate::key::{encode_key_prefix, encode_row, decode_row, Direction};
use crate::kvs::{PutOperation, Transaction};
use crate::mem::Arena;
use crate::plan::WriteFullKind;
use crate::record::RecordMeta;
use crate::val::Value;

/// A cached handle over one table's storages.
pub struct TableAccess {
	def: TableDef,
	meta: Arc<RecordMeta>,
}

impl TableAccess {
	/// Build an access handle from a table definition.
	pub fn new(def: TableDef) -> Self {
		let meta = def.row_meta();
		Self {
			def,
			meta,
		}
	}

	/// The table definition.
	pub fn def(&self) -> &TableDef {
		&self.def
	}

	/// The record shape of a full row.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		&self.meta
	}

	/// Encode the primary key of a row.
	pub fn primary_key_bytes(&self, row: &[Value]) -> Result<Vec<u8>, Error> {
		let values: Vec<Value> = self.def.primary_key.iter().map(|&c| row[c]).collect();
		let directions = vec![Direction::Ascending; values.len()];
		encode_key_prefix(&values, &directions)
	}

	/// Encode a primary key from key values in key-column order.
	pub fn key_bytes(&self, key_values: &[Value]) -> Result<Vec<u8>, Error> {
		if key_values.len() != self.def.primary_key.len() {
			return Err(Error::MismatchKey);
		}
		let directions = vec![Direction::Ascending; key_values.len()];
		encode_key_prefix(key_values, &directions)
	}

	fn secondary_key_bytes(
		&self,
		index: &IndexDef,
		row: &[Value],
		primary: &[u8],
	) -> Result<Vec<u8>, Error> {
		let values: Vec<Value> = index.columns.iter().map(|(c, _)| row[*c]).collect();
		let directions: Vec<Direction> = index.columns.iter().map(|(_, d)| *d).collect();
		let mut key = encode_key_prefix(&values, &directions)?;
		if !index.unique {
			// Non-unique entries disambiguate by primary key suffix
			key.extend_from_slice(primary);
		}
		Ok(key)
	}

	/// Insert a full row. Returns whether a row was actually written;
	/// `InsertSkip` reports `false` on an existing key.
	pub fn insert(
		&self,
		tx: &Transaction,
		row: &[Value],
		kind: WriteFullKind,
	) -> Result<bool, Error> {
		if row.len() != self.def.columns.len() {
			return Err(Error::IncompleteColumns);
		}
		for (column, value) in self.def.columns.iter().zip(row.iter()) {
			if value.is_empty() && !column.nullable {
				return Err(Error::NotNullViolation {
					column: column.name.clone(),
				});
			}
		}
		let primary = self.primary_key_bytes(row)?;
		let existing = tx.get(&self.def.name, &primary)?;
		if existing.is_some() {
			match kind {
				WriteFullKind::Insert => {
					return Err(Error::UniqueConstraintViolation {
						table: self.def.name.clone(),
					})
				}
				WriteFullKind::InsertSkip => return Ok(false),
				WriteFullKind::InsertOrReplace => {
					// Remove the replaced row's secondary entries
					let arena = Arena::new(crate::mem::Discipline::Monotonic);
					let old = decode_row(&existing.unwrap(), &arena)?;
					self.remove_secondary_entries(tx, &old, &primary)?;
				}
			}
		}
		// Unique secondary indexes reject duplicates up front
		for index in &self.def.indexes {
			if index.unique {
				let key = self.secondary_key_bytes(index, row, &primary)?;
				if tx.get(&index.storage_name(&self.def.name), &key)?.is_some() {
					return Err(Error::UniqueConstraintViolation {
						table: self.def.name.clone(),
					});
				}
			}
		}
		tx.put(&self.def.name, primary.clone(), encode_row(row)?, PutOperation::Upsert)?;
		for index in &self.def.indexes {
			let key = self.secondary_key_bytes(index, row, &primary)?;
			tx.put(
				&index.storage_name(&self.def.name),
				key,
				primary.clone(),
				PutOperation::Upsert,
			)?;
		}
		Ok(true)
	}

	fn remove_secondary_entries(
		&self,
		tx: &Transaction,
		row: &[Value],
		primary: &[u8],
	) -> Result<(), Error> {
		for index in &self.def.indexes {
			let key = self.secondary_key_bytes(index, row, primary)?;
			tx.remove(&index.storage_name(&self.def.name), &key)?;
		}
		Ok(())
	}

	/// Update the row at `key_values` to `new_row`. A key change is a
	/// delete plus an insert, so it conflicts with any existing row at
	/// the new key.
	pub fn update(
		&self,
		tx: &Transaction,
		key_values: &[Value],
		new_row: &[Value],
	) -> Result<(), Error> {
		let arena = Arena::new(crate::mem::Discipline::Monotonic);
		let old_key = self.key_bytes(key_values)?;
		let old_row = self.fetch(tx, &old_key, &arena)?.ok_or(Error::NotFound)?;
		let new_key = self.primary_key_bytes(new_row)?;
		if new_key == old_key {
			self.remove_secondary_entries(tx, &old_row, &old_key)?;
			tx.put(&self.def.name, new_key.clone(), encode_row(new_row)?, PutOperation::Upsert)?;
			for index in &self.def.indexes {
				let key = self.secondary_key_bytes(index, new_row, &new_key)?;
				tx.put(
					&index.storage_name(&self.def.name),
					key,
					new_key.clone(),
					PutOperation::Upsert,
				)?;
			}
			Ok(())
		} else {
			// The primary key changed: delete then insert
			tx.remove(&self.def.name, &old_key)?;
			self.remove_secondary_entries(tx, &old_row, &old_key)?;
			self.insert(tx, new_row, WriteFullKind::Insert).map(|_| ())
		}
	}

	/// Delete the row at `key_values`. Returns whether a row existed.
	pub fn delete(&self, tx: &Transaction, key_values: &[Value]) -> Result<bool, Error> {
		let arena = Arena::new(crate::mem::Discipline::Monotonic);
		let key = self.key_bytes(key_values)?;
		match self.fetch(tx, &key, &arena)? {
			Some(row) => {
				tx.remove(&self.def.name, &key)?;
				self.remove_secondary_entries(tx, &row, &key)?;
				Ok(true)
			}
			None => Ok(false),
		}
	}

	fn fetch(
		&self,
		tx: &Transaction,
		key: &[u8],
		arena: &Arena,
	) -> Result<Option<Vec<Value>>, Error> {
		match tx.get(&self.def.name, key)? {
			Some(payload) => Ok(Some(decode_row(&payload, arena)?)),
			None => Ok(None),
		}
	}

	/// Point lookup by full primary key, decoding into `arena`.
	pub fn find(
		&self,
		tx: &Transaction,
		key_values: &[Value],
		arena: &Arena,
	) -> Result<Option<Vec<Value>>, Error> {
		let key = self.key_bytes(key_values)?;
		match tx.get(&self.def.name, &key)? {
			Some(payload) => Ok(Some(decode_row(&payload, arena)?)),
			None => Ok(None),
		}
	}

	/// Scan the primary index between encoded prefix bounds, decoding
	/// rows into `arena`.
	pub fn scan_primary(
		&self,
		tx: &Transaction,
		lower: Option<(&[Value], bool)>,
		upper: Option<(&[Value], bool)>,
		limit: Option<u32>,
		resume_after: Option<&[u8]>,
		arena: &Arena,
	) -> Result<Vec<(Vec<u8>, Vec<Value>)>, Error> {
		let mut low = match lower {
			None => Bound::Unbounded,
			Some((values, inclusive)) => {
				let directions = vec![Direction::Ascending; values.len()];
				let prefix = encode_key_prefix(values, &directions)?;
				if inclusive {
					Bound::Included(prefix)
				} else {
					match prefix_successor(prefix) {
						Some(next) => Bound::Included(next),
						None => return Ok(Vec::new()),
					}
				}
			}
		};
		// A resume point from a previous batch narrows the range
		if let Some(resume) = resume_after {
			low = Bound::Excluded(resume.to_vec());
		}
		let high = match upper {
			None => Bound::Unbounded,
			Some((values, inclusive)) => {
				let directions = vec![Direction::Ascending; values.len()];
				let prefix = encode_key_prefix(values, &directions)?;
				if inclusive {
					match prefix_successor(prefix) {
						Some(next) => Bound::Excluded(next),
						None => Bound::Unbounded,
					}
				} else {
					Bound::Excluded(prefix)
				}
			}
		};
		let entries = tx.scan(&self.def.name, (low, high), limit)?;
		let mut out = Vec::with_capacity(entries.len());
		for (key, payload) in entries {
			out.push((key, decode_row(&payload, arena)?));
		}
		Ok(out)
	}

	/// Scan a secondary index over an encoded prefix, fetching the
	/// referenced primary rows in index order.
	pub fn scan_secondary(
		&self,
		tx: &Transaction,
		index_name: &str,
		prefix: &[Value],
		arena: &Arena,
	) -> Result<Vec<Vec<Value>>, Error> {
		let index = self
			.def
			.indexes
			.iter()
			.find(|i| i.name == index_name)
			.ok_or(Error::MismatchKey)?;
		let directions: Vec<Direction> =
			index.columns.iter().take(prefix.len()).map(|(_, d)| *d).collect();
		let low = encode_key_prefix(prefix, &directions)?;
		let high = match prefix_successor(low.clone()) {
			Some(next) => Bound::Excluded(next),
			None => Bound::Unbounded,
		};
		let storage = index.storage_name(&self.def.name);
		let entries = tx.scan(&storage, (Bound::Included(low), high), None)?;
		let mut out = Vec::with_capacity(entries.len());
		for (_, primary) in entries {
			match tx.get(&self.def.name, &primary)? {
				Some(payload) => out.push(decode_row(&payload, arena)?),
				// The index entry outlived its row inside this
				// transaction's view; skip it
				None => continue,
			}
		}
		Ok(out)
	}
}

/// The smallest byte string greater than every string with the given
/// prefix, or `None` when no such string exists.
fn prefix_successor(mut prefix: Vec<u8>) -> Option<Vec<u8>> {
	while let Some(last) = prefix.last_mut() {
		if *last < 0xFF {
			*last += 1;
			return Some(prefix);
		}
		prefix.pop();
	}
	None
}

#[cfg(all(test, feature = "kv-mem"))]
mod tests {
	use super::*;
	use crate::catalog::ColumnDef;
	use crate::kvs::{CommitLevel, Datastore, TransactionOptions};
	use crate::mem::Discipline;
	use crate::record::FieldType;

	fn setup() -> (Datastore, TableAccess) {
		let ds = Datastore::new_memory().unwrap();
		let def = TableDef::new(
			"t",
			vec![
				ColumnDef::new("c0", FieldType::Int4, false),
				ColumnDef::new("c1", FieldType::Int4, true),
			],
			vec![0],
		)
		.with_index(IndexDef {
			name: "by_c1".to_owned(),
			columns: vec![(1, Direction::Ascending)],
			unique: false,
		});
		let tx = ds.transaction(TransactionOptions::occ()).unwrap();
		crate::catalog::create_table(&ds, &tx, &def).unwrap();
		tx.commit(CommitLevel::Available).unwrap().wait().unwrap();
		(ds, TableAccess::new(def))
	}

	#[test]
	fn insert_then_scan_returns_rows_in_key_order() {
		let (ds, table) = setup();
		let tx = ds.transaction(TransactionOptions::occ()).unwrap();
		for key in [300, 100, 200] {
			table.insert(&tx, &[Value::Int4(key), Value::Int4(key / 100)], WriteFullKind::Insert)
				.unwrap();
		}
		let arena = Arena::new(Discipline::Monotonic);
		let rows = table.scan_primary(&tx, None, None, None, None, &arena).unwrap();
		let keys: Vec<Value> = rows.iter().map(|(_, row)| row[0]).collect();
		assert_eq!(keys, vec![Value::Int4(100), Value::Int4(200), Value::Int4(300)]);
		tx.commit(CommitLevel::Available).unwrap().wait().unwrap();
	}

	#[test]
	fn duplicate_insert_violates_the_primary_key() {
		let (ds, table) = setup();
		let tx = ds.transaction(TransactionOptions::occ()).unwrap();
		let row = [Value::Int4(1), Value::Empty];
		assert!(table.insert(&tx, &row, WriteFullKind::Insert).unwrap());
		let err = table.insert(&tx, &row, WriteFullKind::Insert).unwrap_err();
		assert!(matches!(err, Error::UniqueConstraintViolation { .. }));
		assert!(!table.insert(&tx, &row, WriteFullKind::InsertSkip).unwrap());
		tx.abort().unwrap();
	}

	#[test]
	fn key_update_is_delete_plus_insert() {
		let (ds, table) = setup();
		let tx = ds.transaction(TransactionOptions::occ()).unwrap();
		table.insert(&tx, &[Value::Int4(0), Value::Int4(0)], WriteFullKind::Insert).unwrap();
		table.insert(&tx, &[Value::Int4(1), Value::Int4(1)], WriteFullKind::Insert).unwrap();
		// Moving key 0 to key 1 collides with the existing row
		let err = table
			.update(&tx, &[Value::Int4(0)], &[Value::Int4(1), Value::Int4(0)])
			.unwrap_err();
		assert!(matches!(err, Error::UniqueConstraintViolation { .. }));
		tx.abort().unwrap();
	}

	#[test]
	fn secondary_indexes_follow_writes() {
		let (ds, table) = setup();
		let tx = ds.transaction(TransactionOptions::occ()).unwrap();
		table.insert(&tx, &[Value::Int4(1), Value::Int4(10)], WriteFullKind::Insert).unwrap();
		table.insert(&tx, &[Value::Int4(2), Value::Int4(10)], WriteFullKind::Insert).unwrap();
		table.insert(&tx, &[Value::Int4(3), Value::Int4(20)], WriteFullKind::Insert).unwrap();
		let arena = Arena::new(Discipline::Monotonic);
		let rows = table.scan_secondary(&tx, "by_c1", &[Value::Int4(10)], &arena).unwrap();
		assert_eq!(rows.len(), 2);
		// Deleting drops the index entry too
		table.delete(&tx, &[Value::Int4(1)]).unwrap();
		let rows = table.scan_secondary(&tx, "by_c1", &[Value::Int4(10)], &arena).unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0][0], Value::Int4(2));
		tx.abort().unwrap();
	}

	#[test]
	fn find_returns_the_full_row() {
		let (ds, table) = setup();
		let tx = ds.transaction(TransactionOptions::occ()).unwrap();
		table.insert(&tx, &[Value::Int4(5), Value::Int4(50)], WriteFullKind::Insert).unwrap();
		let arena = Arena::new(Discipline::Monotonic);
		let row = table.find(&tx, &[Value::Int4(5)], &arena).unwrap().unwrap();
		assert_eq!(row, vec![Value::Int4(5), Value::Int4(50)]);
		assert!(table.find(&tx, &[Value::Int4(6)], &arena).unwrap().is_none());
		tx.abort().unwrap();
	}
}
