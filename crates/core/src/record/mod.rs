//! The schema-described, binary-packed record model.
//!
//! Every component of the engine consumes this module: exchanges move
//! packed records between steps, operators read and write fields at
//! metadata-derived offsets, and the key coder encodes record fields
//! into storage keys. A record is a byte image laid out
//! deterministically from its [`RecordMeta`]: a leading nullity-bit
//! area followed by the fields in declaration order, each at the next
//! multiple of its alignment.

mod field;
mod meta;
mod reference;
mod store;

pub use field::{FieldOption, FieldType};
pub use meta::RecordMeta;
pub use reference::{pack, unpack, RecordRef, RecordRefMut};
pub use store::{IterableRecordStore, PointerTable, RecordStore, ResultStore, SmallRecordStore};

use std::hash::{Hash, Hasher};

use crate::val::Value;

/// Compare two records field-by-field over the given field indexes,
/// with nulls ordering first. Fields outside the index list do not
/// participate.
pub fn compare_fields(
	meta: &RecordMeta,
	a: RecordRef,
	b: RecordRef,
	fields: &[usize],
) -> std::cmp::Ordering {
	use std::cmp::Ordering;
	for &idx in fields {
		let va = a.get_value(meta, idx);
		let vb = b.get_value(meta, idx);
		let ord = match (va.is_empty(), vb.is_empty()) {
			(true, true) => Ordering::Equal,
			// Null orders first
			(true, false) => Ordering::Less,
			(false, true) => Ordering::Greater,
			(false, false) => va.partial_cmp_value(&vb).unwrap_or(Ordering::Equal),
		};
		if ord != Ordering::Equal {
			return ord;
		}
	}
	std::cmp::Ordering::Equal
}

/// Compare two records over key fields with per-field sort
/// directions. Null orders first; descending fields reverse the value
/// order only.
pub fn compare_fields_directed(
	meta: &RecordMeta,
	a: RecordRef,
	b: RecordRef,
	fields: &[usize],
	directions: &[crate::key::Direction],
) -> std::cmp::Ordering {
	use std::cmp::Ordering;
	for (position, &idx) in fields.iter().enumerate() {
		let direction =
			directions.get(position).copied().unwrap_or(crate::key::Direction::Ascending);
		let va = a.get_value(meta, idx);
		let vb = b.get_value(meta, idx);
		let ord = match (va.is_empty(), vb.is_empty()) {
			(true, true) => Ordering::Equal,
			(true, false) => Ordering::Less,
			(false, true) => Ordering::Greater,
			(false, false) => {
				let ord = va.partial_cmp_value(&vb).unwrap_or(Ordering::Equal);
				match direction {
					crate::key::Direction::Ascending => ord,
					crate::key::Direction::Descending => ord.reverse(),
				}
			}
		};
		if ord != Ordering::Equal {
			return ord;
		}
	}
	std::cmp::Ordering::Equal
}

/// Hash the given fields of a record. Used by the shuffle partitioner;
/// nulls hash to a fixed sentinel so equal keys land on one partition.
pub fn hash_fields(meta: &RecordMeta, record: RecordRef, fields: &[usize]) -> u64 {
	let mut hasher = ahash::AHasher::default();
	for &idx in fields {
		let value = record.get_value(meta, idx);
		hash_value_into(&value, &mut hasher);
	}
	hasher.finish()
}

/// Feed one value into a hasher the way [`hash_fields`] does, so
/// value-level and record-level hashing agree on partition targets.
pub fn hash_value_into<H: Hasher>(value: &Value, hasher: &mut H) {
	match value {
		Value::Empty | Value::Error(_) => 0u8.hash(hasher),
		Value::Bool(v) => (1u8, v).hash(hasher),
		Value::Int4(v) => (2u8, *v as i64).hash(hasher),
		Value::Int8(v) => (2u8, *v).hash(hasher),
		Value::Float4(v) => (3u8, v.to_bits() as u64).hash(hasher),
		Value::Float8(v) => (3u8, v.to_bits()).hash(hasher),
		Value::Decimal(v) => (4u8, v.normalize().mantissa(), v.normalize().scale()).hash(hasher),
		Value::Text(v) => (5u8, v.as_bytes()).hash(hasher),
		Value::Octet(v) => (6u8, v.as_bytes()).hash(hasher),
		Value::Date(v) => (7u8, v.days()).hash(hasher),
		Value::TimeOfDay(v) => (8u8, v.nanos()).hash(hasher),
		Value::TimePoint(v) => (9u8, v.seconds(), v.nanos()).hash(hasher),
		Value::Blob(v) | Value::Clob(v) => (10u8, v.id(), v.locator()).hash(hasher),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn meta() -> RecordMeta {
		RecordMeta::new(vec![FieldType::Int4, FieldType::Int8], vec![true, false])
	}

	#[test]
	fn comparison_orders_nulls_first() {
		let m = meta();
		let store = RecordStore::new(m.clone().into(), None);
		let a = store.append_values(&[Value::Empty, Value::Int8(1)]).unwrap();
		let b = store.append_values(&[Value::Int4(0), Value::Int8(1)]).unwrap();
		assert_eq!(compare_fields(&m, a, b, &[0]), std::cmp::Ordering::Less);
		assert_eq!(compare_fields(&m, a, a, &[0, 1]), std::cmp::Ordering::Equal);
	}

	#[test]
	fn equal_keys_hash_identically() {
		let m = meta();
		let store = RecordStore::new(m.clone().into(), None);
		let a = store.append_values(&[Value::Int4(42), Value::Int8(1)]).unwrap();
		let b = store.append_values(&[Value::Int4(42), Value::Int8(2)]).unwrap();
		assert_eq!(hash_fields(&m, a, &[0]), hash_fields(&m, b, &[0]));
	}
}
