//! Catalog persistence over the system storage.

use std::ops::Bound;

use crate::catalog::TableDef;
use crate::cnf::SYSTEM_STORAGE_NAME;
use crate::err::Error;
use crate::kvs::{Datastore, PutOperation, Transaction};

/// The system storage key of a table definition.
fn table_key(name: &str) -> Vec<u8> {
	let mut key = b"tbl/".to_vec();
	key.extend_from_slice(name.as_bytes());
	key
}

/// Create a table: persist its definition, then create the primary
/// storage and one storage per secondary index, each carrying the
/// serialized definition in its options.
pub fn create_table(ds: &Datastore, tx: &Transaction, def: &TableDef) -> Result<(), Error> {
	if tx.get(SYSTEM_STORAGE_NAME, &table_key(&def.name))?.is_some() {
		return Err(Error::AlreadyExists);
	}
	let payload = def.options_payload()?;
	tx.put(SYSTEM_STORAGE_NAME, table_key(&def.name), payload.clone(), PutOperation::Create)?;
	ds.create_storage(&def.name, payload.clone())?;
	for index in &def.indexes {
		ds.create_storage(&index.storage_name(&def.name), payload.clone())?;
	}
	info!("created table {} with {} secondary indexes", def.name, def.indexes.len());
	Ok(())
}

/// Load a table definition.
pub fn get_table(tx: &Transaction, name: &str) -> Result<TableDef, Error> {
	match tx.get(SYSTEM_STORAGE_NAME, &table_key(name))? {
		Some(payload) => TableDef::from_options_payload(&payload),
		None => Err(Error::TableNotFound {
			name: name.to_owned(),
		}),
	}
}

/// List every table definition in name order.
pub fn list_tables(tx: &Transaction) -> Result<Vec<TableDef>, Error> {
	let prefix = b"tbl/".to_vec();
	let mut upper = prefix.clone();
	upper.push(0xFF);
	let entries = tx.scan(
		SYSTEM_STORAGE_NAME,
		(Bound::Included(prefix), Bound::Excluded(upper)),
		None,
	)?;
	entries.into_iter().map(|(_, payload)| TableDef::from_options_payload(&payload)).collect()
}

/// Drop a table: remove the definition and every backing storage.
pub fn drop_table(ds: &Datastore, tx: &Transaction, name: &str) -> Result<(), Error> {
	let def = get_table(tx, name)?;
	tx.remove(SYSTEM_STORAGE_NAME, &table_key(name))?;
	ds.drop_storage(&def.name)?;
	for index in &def.indexes {
		ds.drop_storage(&index.storage_name(&def.name))?;
	}
	Ok(())
}

#[cfg(all(test, feature = "kv-mem"))]
mod tests {
	use super::*;
	use crate::catalog::ColumnDef;
	use crate::kvs::{CommitLevel, TransactionOptions};
	use crate::record::FieldType;

	fn def() -> TableDef {
		TableDef::new(
			"t",
			vec![
				ColumnDef::new("c0", FieldType::Int4, false),
				ColumnDef::new("c1", FieldType::varchar(None), true),
			],
			vec![0],
		)
	}

	#[test]
	fn tables_persist_and_list() {
		let ds = Datastore::new_memory().unwrap();
		let tx = ds.transaction(TransactionOptions::occ()).unwrap();
		create_table(&ds, &tx, &def()).unwrap();
		tx.commit(CommitLevel::Available).unwrap().wait().unwrap();

		let tx = ds.transaction(TransactionOptions::occ()).unwrap();
		let loaded = get_table(&tx, "t").unwrap();
		assert_eq!(loaded, def());
		assert_eq!(list_tables(&tx).unwrap().len(), 1);
		assert!(matches!(
			get_table(&tx, "missing"),
			Err(Error::TableNotFound { .. })
		));
		tx.abort().unwrap();
		// The storage carries the schema payload in its options
		let options = ds.storage_options("t").unwrap().unwrap();
		assert_eq!(TableDef::from_options_payload(&options).unwrap(), def());
	}
}
