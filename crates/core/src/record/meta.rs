use crate::cnf::MAX_RECORD_ALIGNMENT;
use crate::record::FieldType;

/// The metadata of a record shape: an ordered sequence of field types
/// plus a parallel nullability bitmap, and the packed layout derived
/// deterministically from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
	fields: Vec<FieldType>,
	nullable: Vec<bool>,
	/// Byte offset of every field image inside the record
	value_offsets: Vec<usize>,
	/// Bit index inside the nullity area, for nullable fields
	nullity_offsets: Vec<Option<usize>>,
	/// Size in bytes of the leading nullity area
	nullity_bytes: usize,
	record_size: usize,
	record_alignment: usize,
}

impl RecordMeta {
	/// Derive the layout for the given field types and nullability.
	pub fn new(fields: Vec<FieldType>, nullable: Vec<bool>) -> Self {
		assert_eq!(fields.len(), nullable.len(), "field and nullability counts must match");
		// The nullity area holds one bit per nullable field, rounded
		// up to whole bytes, then up to the next power of two
		let nullable_count = nullable.iter().filter(|n| **n).count();
		let nullity_bytes = match nullable_count {
			0 => 0,
			n => n.div_ceil(8).next_power_of_two(),
		};
		let mut value_offsets = Vec::with_capacity(fields.len());
		let mut nullity_offsets = Vec::with_capacity(fields.len());
		let mut cursor = nullity_bytes;
		let mut alignment = 1usize;
		let mut nullity_bit = 0usize;
		for (ty, is_nullable) in fields.iter().zip(nullable.iter()) {
			let align = ty.alignment().min(MAX_RECORD_ALIGNMENT);
			cursor = cursor.div_ceil(align) * align;
			value_offsets.push(cursor);
			cursor += ty.size();
			alignment = alignment.max(align);
			if *is_nullable {
				nullity_offsets.push(Some(nullity_bit));
				nullity_bit += 1;
			} else {
				nullity_offsets.push(None);
			}
		}
		// Pad the whole record up to its alignment
		let record_size = cursor.div_ceil(alignment) * alignment;
		Self {
			fields,
			nullable,
			value_offsets,
			nullity_offsets,
			nullity_bytes,
			record_size,
			record_alignment: alignment,
		}
	}

	/// The number of fields.
	pub fn field_count(&self) -> usize {
		self.fields.len()
	}

	/// The type of the field at `index`.
	pub fn field_type(&self, index: usize) -> &FieldType {
		&self.fields[index]
	}

	/// All field types in declaration order.
	pub fn field_types(&self) -> &[FieldType] {
		&self.fields
	}

	/// Whether the field at `index` is nullable.
	pub fn nullable(&self, index: usize) -> bool {
		self.nullable[index]
	}

	/// The byte offset of the field image.
	pub fn value_offset(&self, index: usize) -> usize {
		self.value_offsets[index]
	}

	/// The bit index of the field inside the nullity area, when the
	/// field is nullable.
	pub fn nullity_offset(&self, index: usize) -> Option<usize> {
		self.nullity_offsets[index]
	}

	/// The size in bytes of the leading nullity area.
	pub fn nullity_bytes(&self) -> usize {
		self.nullity_bytes
	}

	/// The total record size in bytes. A record of size zero still
	/// occupies one byte of storage space so that record pointers stay
	/// distinct; the observed size remains zero.
	pub fn record_size(&self) -> usize {
		self.record_size
	}

	/// The record alignment: the maximum field alignment, capped at
	/// the engine-wide limit.
	pub fn record_alignment(&self) -> usize {
		self.record_alignment
	}

	/// The storage footprint of one record inside a store.
	pub fn storage_size(&self) -> usize {
		self.record_size.max(1)
	}

	/// Whether any field stores a variable-length payload.
	pub fn has_varlen(&self) -> bool {
		self.fields.iter().any(|ty| ty.is_varlen())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn layout_respects_field_alignment() {
		let meta = RecordMeta::new(
			vec![FieldType::Boolean, FieldType::Int8, FieldType::Int2, FieldType::Int4],
			vec![false; 4],
		);
		for i in 0..meta.field_count() {
			assert_eq!(
				meta.value_offset(i) % meta.field_type(i).alignment(),
				0,
				"field {i} misaligned"
			);
		}
		assert_eq!(meta.record_size() % meta.record_alignment(), 0);
	}

	#[test]
	fn nullity_area_rounds_to_a_power_of_two() {
		// Nine nullable fields need two bytes of bits, which is
		// already a power of two
		let meta = RecordMeta::new(vec![FieldType::Boolean; 9], vec![true; 9]);
		assert_eq!(meta.nullity_bytes(), 2);
		// Five need one byte
		let meta = RecordMeta::new(vec![FieldType::Boolean; 5], vec![true; 5]);
		assert_eq!(meta.nullity_bytes(), 1);
		// Seventeen need three bytes, rounded up to four
		let meta = RecordMeta::new(vec![FieldType::Boolean; 17], vec![true; 17]);
		assert_eq!(meta.nullity_bytes(), 4);
	}

	#[test]
	fn nullity_bits_are_dense_over_nullable_fields() {
		let meta = RecordMeta::new(
			vec![FieldType::Int4, FieldType::Int4, FieldType::Int4],
			vec![true, false, true],
		);
		assert_eq!(meta.nullity_offset(0), Some(0));
		assert_eq!(meta.nullity_offset(1), None);
		assert_eq!(meta.nullity_offset(2), Some(1));
	}

	#[test]
	fn empty_records_have_zero_size_but_nonzero_storage() {
		let meta = RecordMeta::new(vec![], vec![]);
		assert_eq!(meta.record_size(), 0);
		assert_eq!(meta.storage_size(), 1);
		// A record of only UNKNOWN fields behaves the same
		let meta = RecordMeta::new(vec![FieldType::Unknown], vec![false]);
		assert_eq!(meta.record_size(), 0);
		assert_eq!(meta.storage_size(), 1);
	}

	#[test]
	fn fields_are_placed_in_declaration_order() {
		let meta = RecordMeta::new(
			vec![FieldType::Int8, FieldType::Boolean, FieldType::Int8],
			vec![false, false, false],
		);
		assert!(meta.value_offset(0) < meta.value_offset(1));
		assert!(meta.value_offset(1) < meta.value_offset(2));
		// The trailing int8 realigns past the boolean
		assert_eq!(meta.value_offset(2) % 8, 0);
	}
}
