use std::sync::Arc;

use crate::err::Error;
use crate::mem::Arena;
use crate::plan::VarId;
use crate::record::{RecordMeta, SmallRecordStore};
use crate::val::Value;

/// The variable table of one block: maps plan variable ids onto
/// `(value offset, nullity offset, index)` triples inside a small
/// record store holding the current values. Tables are block-scoped
/// and single-threaded by construction.
pub struct VariableTable {
	/// Declared variable id to live slot index
	mapping: Vec<Option<usize>>,
	store: SmallRecordStore,
}

impl VariableTable {
	/// Create a table for the live variables of a block. `mapping`
	/// translates declared variable ids to slots of `meta`.
	pub fn new(meta: Arc<RecordMeta>, mapping: Vec<Option<usize>>) -> Self {
		Self {
			mapping,
			store: SmallRecordStore::new(meta),
		}
	}

	/// The record shape of the live variables.
	pub fn meta(&self) -> &Arc<RecordMeta> {
		self.store.meta()
	}

	/// The arena backing varlen variable values. Shared by expression
	/// evaluation within the block; checkpoint and rollback bound
	/// sub-expression scratch.
	pub fn arena(&self) -> &Arena {
		self.store.varlen_arena()
	}

	fn slot(&self, var: VarId) -> Result<usize, Error> {
		self.mapping
			.get(var)
			.copied()
			.flatten()
			.ok_or_else(|| Error::Unreachable(format!("variable v{var} is not live in this block")))
	}

	/// Read a variable.
	pub fn get(&self, var: VarId) -> Result<Value, Error> {
		let slot = self.slot(var)?;
		Ok(self.store.record().get_value(self.store.meta(), slot))
	}

	/// Write a variable.
	pub fn set(&self, var: VarId, value: &Value) -> Result<(), Error> {
		let slot = self.slot(var)?;
		let mut record = self.store.record_mut();
		record.set_value(self.store.meta(), slot, value, self.store.varlen_arena())
	}

	/// Read every live variable in slot order.
	pub fn snapshot(&self) -> Vec<Value> {
		let record = self.store.record();
		(0..self.store.meta().field_count())
			.map(|slot| record.get_value(self.store.meta(), slot))
			.collect()
	}

	/// Read the given variables in order.
	pub fn read(&self, vars: &[VarId]) -> Result<Vec<Value>, Error> {
		vars.iter().map(|var| self.get(*var)).collect()
	}

	/// Write the given variables in order from a row of values.
	pub fn write(&self, vars: &[VarId], values: &[Value]) -> Result<(), Error> {
		if vars.len() != values.len() {
			return Err(Error::IncompleteColumns);
		}
		for (var, value) in vars.iter().zip(values.iter()) {
			self.set(*var, value)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::record::FieldType;
	use crate::val::Text;

	fn table() -> VariableTable {
		// Declared variables v0, v1, v2; only v0 and v2 are live
		let meta = Arc::new(RecordMeta::new(
			vec![FieldType::Int4, FieldType::varchar(None)],
			vec![true, true],
		));
		VariableTable::new(meta, vec![Some(0), None, Some(1)])
	}

	#[test]
	fn live_variables_read_back_what_was_written() {
		let table = table();
		table.set(0, &Value::Int4(7)).unwrap();
		table.set(2, &Value::Text(Text::inline("x"))).unwrap();
		assert_eq!(table.get(0).unwrap(), Value::Int4(7));
		assert_eq!(table.get(2).unwrap(), Value::Text(Text::inline("x")));
	}

	#[test]
	fn dead_variables_are_rejected() {
		let table = table();
		assert!(table.get(1).is_err());
		assert!(table.set(1, &Value::Int4(0)).is_err());
	}

	#[test]
	fn overwriting_clears_nullity() {
		let table = table();
		table.set(0, &Value::Empty).unwrap();
		assert_eq!(table.get(0).unwrap(), Value::Empty);
		table.set(0, &Value::Int4(3)).unwrap();
		assert_eq!(table.get(0).unwrap(), Value::Int4(3));
	}
}
