use crate::err::Error;
use crate::mem::Arena;
use crate::record::{FieldType, RecordMeta};
use crate::val::number::Triple;
use crate::val::{Date, LobReference, Octet, Text, TimeOfDay, TimePoint, Value};

/// A non-owning view of a packed record: a pointer and a length. The
/// record is owned by some store; the reference stays valid for as
/// long as the owning store does.
#[derive(Debug, Clone, Copy)]
pub struct RecordRef {
	ptr: *const u8,
	len: usize,
}

// SAFETY: records are written once by their producing task and only
// read afterwards; the owning store keeps the backing pages alive.
unsafe impl Send for RecordRef {}
unsafe impl Sync for RecordRef {}

/// A mutable view of a packed record being produced.
#[derive(Debug)]
pub struct RecordRefMut {
	ptr: *mut u8,
	len: usize,
}

// SAFETY: a mutable reference is confined to the producing task.
unsafe impl Send for RecordRefMut {}

impl RecordRef {
	/// Wrap a raw record region.
	///
	/// # Safety
	/// The region must hold a record packed for the metadata it will
	/// be read with, and must outlive the reference.
	pub unsafe fn from_raw_parts(ptr: *const u8, len: usize) -> Self {
		Self {
			ptr,
			len,
		}
	}

	/// The raw pointer to the record image.
	pub fn as_ptr(&self) -> *const u8 {
		self.ptr
	}

	/// The record image length in bytes.
	pub fn len(&self) -> usize {
		self.len
	}

	/// Whether the record image is empty (a zero-size record shape).
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// The raw bytes of the record image.
	pub fn bytes(&self) -> &[u8] {
		// SAFETY: construction guarantees the region is live
		unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
	}

	/// Whether the field at `index` is null.
	pub fn is_null(&self, meta: &RecordMeta, index: usize) -> bool {
		match meta.nullity_offset(index) {
			Some(bit) => {
				let byte = self.bytes()[bit / 8];
				byte & (1 << (bit % 8)) != 0
			}
			None => false,
		}
	}

	/// Read the field at `index` as a runtime value.
	pub fn get_value(&self, meta: &RecordMeta, index: usize) -> Value {
		if self.is_null(meta, index) {
			return Value::Empty;
		}
		let off = meta.value_offset(index);
		let bytes = self.bytes();
		match meta.field_type(index) {
			FieldType::Boolean => Value::Bool(bytes[off] != 0),
			FieldType::Int1 => Value::Int4(bytes[off] as i8 as i32),
			FieldType::Int2 => {
				Value::Int4(i16::from_le_bytes(bytes[off..off + 2].try_into().unwrap()) as i32)
			}
			FieldType::Int4 => {
				Value::Int4(i32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()))
			}
			FieldType::Int8 => {
				Value::Int8(i64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()))
			}
			FieldType::Float4 => {
				Value::Float4(f32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()))
			}
			FieldType::Float8 => {
				Value::Float8(f64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()))
			}
			FieldType::Decimal(_) => {
				let triple = Triple {
					coefficient_high: u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()),
					coefficient_low: u64::from_le_bytes(
						bytes[off + 8..off + 16].try_into().unwrap(),
					),
					exponent: i32::from_le_bytes(bytes[off + 16..off + 20].try_into().unwrap()),
					sign: bytes[off + 20] as i8,
				};
				match triple.to_decimal() {
					Ok(decimal) => Value::Decimal(decimal),
					Err(kind) => Value::Error(kind),
				}
			}
			FieldType::Character {
				..
			} => match read_varlen(bytes, off) {
				// SAFETY: the image was produced from valid UTF-8
				(ptr, len, true) => unsafe { Value::Text(Text::from_raw_parts(ptr, len)) },
				(ptr, len, false) => {
					let slice = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
					Value::Text(Text::inline(std::str::from_utf8(slice).unwrap_or("")))
				}
			},
			FieldType::Octet {
				..
			} => match read_varlen(bytes, off) {
				(ptr, len, true) => unsafe { Value::Octet(Octet::from_raw_parts(ptr, len)) },
				(ptr, len, false) => {
					let slice = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
					Value::Octet(Octet::inline(slice))
				}
			},
			FieldType::Date => {
				Value::Date(Date::from_days(i64::from_le_bytes(
					bytes[off..off + 8].try_into().unwrap(),
				)))
			}
			FieldType::TimeOfDay {
				with_offset,
			} => {
				let nanos = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
				if *with_offset && bytes[off + 10] != 0 {
					let offset =
						i16::from_le_bytes(bytes[off + 8..off + 10].try_into().unwrap());
					// The image stores the UTC instant; rebuild the
					// local form the constructor expects
					let local = (nanos as i64 + offset as i64 * 60 * 1_000_000_000)
						.rem_euclid(24 * 60 * 60 * 1_000_000_000) as u64;
					Value::TimeOfDay(TimeOfDay::with_offset(local, offset))
				} else {
					Value::TimeOfDay(TimeOfDay::from_nanos(nanos))
				}
			}
			FieldType::TimePoint {
				with_offset,
			} => {
				let seconds = i64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
				let nanos = u32::from_le_bytes(bytes[off + 8..off + 12].try_into().unwrap());
				if *with_offset && bytes[off + 14] != 0 {
					let offset =
						i16::from_le_bytes(bytes[off + 12..off + 14].try_into().unwrap());
					Value::TimePoint(TimePoint::with_offset(seconds, nanos, offset))
				} else {
					Value::TimePoint(TimePoint::new(seconds, nanos))
				}
			}
			FieldType::Blob => {
				let image: [u8; 40] = bytes[off..off + 40].try_into().unwrap();
				Value::Blob(LobReference::from_image(&image))
			}
			FieldType::Clob => {
				let image: [u8; 40] = bytes[off..off + 40].try_into().unwrap();
				Value::Clob(LobReference::from_image(&image))
			}
			FieldType::Unknown => Value::Empty,
			FieldType::Pointer | FieldType::RefByName | FieldType::RefByPosition => {
				Value::Int8(i64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()))
			}
		}
	}
}

impl RecordRefMut {
	/// Wrap a raw mutable record region.
	///
	/// # Safety
	/// The region must span at least the storage size of the metadata
	/// it will be packed with, and must not be aliased while mutable.
	pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Self {
		Self {
			ptr,
			len,
		}
	}

	/// Freeze into an immutable reference.
	pub fn freeze(self) -> RecordRef {
		RecordRef {
			ptr: self.ptr,
			len: self.len,
		}
	}

	fn bytes_mut(&mut self) -> &mut [u8] {
		// SAFETY: construction guarantees the region is live and
		// exclusively held
		unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
	}

	/// Mark the field at `index` null or not null.
	pub fn set_null(&mut self, meta: &RecordMeta, index: usize, null: bool) {
		if let Some(bit) = meta.nullity_offset(index) {
			let byte = &mut self.bytes_mut()[bit / 8];
			if null {
				*byte |= 1 << (bit % 8);
			} else {
				*byte &= !(1 << (bit % 8));
			}
		}
	}

	/// Write a runtime value into the field at `index`, spilling any
	/// varlen payload beyond the inline capacity into `arena`.
	pub fn set_value(
		&mut self,
		meta: &RecordMeta,
		index: usize,
		value: &Value,
		arena: &Arena,
	) -> Result<(), Error> {
		if value.is_empty() {
			if !meta.nullable(index) {
				return Err(Error::NotNullViolation {
					column: format!("#{index}"),
				});
			}
			self.set_null(meta, index, true);
			return Ok(());
		}
		self.set_null(meta, index, false);
		let off = meta.value_offset(index);
		let ty = meta.field_type(index);
		let bytes = self.bytes_mut();
		match (ty, value) {
			(FieldType::Boolean, Value::Bool(v)) => bytes[off] = *v as u8,
			(FieldType::Int1, Value::Int4(v)) => bytes[off] = *v as i8 as u8,
			(FieldType::Int2, Value::Int4(v)) => {
				bytes[off..off + 2].copy_from_slice(&(*v as i16).to_le_bytes())
			}
			(FieldType::Int4, Value::Int4(v)) => {
				bytes[off..off + 4].copy_from_slice(&v.to_le_bytes())
			}
			(FieldType::Int8, Value::Int8(v)) => {
				bytes[off..off + 8].copy_from_slice(&v.to_le_bytes())
			}
			(FieldType::Int8, Value::Int4(v)) => {
				bytes[off..off + 8].copy_from_slice(&(*v as i64).to_le_bytes())
			}
			(FieldType::Float4, Value::Float4(v)) => {
				bytes[off..off + 4].copy_from_slice(&v.to_le_bytes())
			}
			(FieldType::Float8, Value::Float8(v)) => {
				bytes[off..off + 8].copy_from_slice(&v.to_le_bytes())
			}
			(FieldType::Decimal(_), Value::Decimal(v)) => {
				let triple = Triple::from_decimal(v);
				bytes[off..off + 8].copy_from_slice(&triple.coefficient_high.to_le_bytes());
				bytes[off + 8..off + 16].copy_from_slice(&triple.coefficient_low.to_le_bytes());
				bytes[off + 16..off + 20].copy_from_slice(&triple.exponent.to_le_bytes());
				bytes[off + 20] = triple.sign as u8;
				bytes[off + 21..off + 24].fill(0);
			}
			(
				FieldType::Character {
					..
				},
				Value::Text(v),
			) => write_varlen(bytes, off, v.as_bytes(), arena),
			(
				FieldType::Octet {
					..
				},
				Value::Octet(v),
			) => write_varlen(bytes, off, v.as_bytes(), arena),
			(FieldType::Date, Value::Date(v)) => {
				bytes[off..off + 8].copy_from_slice(&v.days().to_le_bytes())
			}
			(
				FieldType::TimeOfDay {
					with_offset,
				},
				Value::TimeOfDay(v),
			) => {
				bytes[off..off + 8].copy_from_slice(&v.nanos().to_le_bytes());
				if *with_offset {
					match v.offset_minutes() {
						Some(offset) => {
							bytes[off + 8..off + 10].copy_from_slice(&offset.to_le_bytes());
							bytes[off + 10] = 1;
						}
						None => {
							bytes[off + 8..off + 11].fill(0);
						}
					}
					bytes[off + 11..off + 16].fill(0);
				}
			}
			(
				FieldType::TimePoint {
					with_offset,
				},
				Value::TimePoint(v),
			) => {
				bytes[off..off + 8].copy_from_slice(&v.seconds().to_le_bytes());
				bytes[off + 8..off + 12].copy_from_slice(&v.nanos().to_le_bytes());
				if *with_offset {
					match v.offset_minutes() {
						Some(offset) => {
							bytes[off + 12..off + 14].copy_from_slice(&offset.to_le_bytes());
							bytes[off + 14] = 1;
						}
						None => {
							bytes[off + 12..off + 15].fill(0);
						}
					}
					bytes[off + 15] = 0;
				} else {
					bytes[off + 12..off + 16].fill(0);
				}
			}
			(FieldType::Blob, Value::Blob(v)) | (FieldType::Clob, Value::Clob(v)) => {
				bytes[off..off + 40].copy_from_slice(&v.to_image())
			}
			(FieldType::Unknown, _) => {}
			(FieldType::Pointer, Value::Int8(v))
			| (FieldType::RefByName, Value::Int8(v))
			| (FieldType::RefByPosition, Value::Int8(v)) => {
				bytes[off..off + 8].copy_from_slice(&v.to_le_bytes())
			}
			(ty, value) => {
				return Err(Error::TypeMismatch {
					expected: ty.to_string(),
					actual: value.kind().to_string(),
				})
			}
		}
		Ok(())
	}
}

/// Read a varlen image: returns the payload pointer, length, and
/// whether the payload lives on the heap.
fn read_varlen(bytes: &[u8], off: usize) -> (*const u8, u32, bool) {
	let tag = bytes[off + 15];
	if tag & 0x80 != 0 {
		let len = (tag & 0x0f) as u32;
		(bytes[off..].as_ptr(), len, false)
	} else {
		let ptr = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()) as *const u8;
		let len = u32::from_le_bytes(bytes[off + 8..off + 12].try_into().unwrap());
		(ptr, len, true)
	}
}

/// Write a varlen image, spilling payloads beyond the inline capacity
/// into the arena so the record owns a stable copy.
fn write_varlen(bytes: &mut [u8], off: usize, payload: &[u8], arena: &Arena) {
	if payload.len() <= 15 {
		bytes[off..off + 15].fill(0);
		bytes[off..off + payload.len()].copy_from_slice(payload);
		bytes[off + 15] = 0x80 | payload.len() as u8;
	} else {
		let copy = crate::mem::copy_varlen(arena, payload);
		bytes[off..off + 8].copy_from_slice(&(copy.as_ptr() as u64).to_le_bytes());
		bytes[off + 8..off + 12].copy_from_slice(&(copy.len() as u32).to_le_bytes());
		bytes[off + 12..off + 16].fill(0);
	}
}

/// Pack a row of runtime values into a record region.
pub fn pack(
	meta: &RecordMeta,
	values: &[Value],
	mut dst: RecordRefMut,
	arena: &Arena,
) -> Result<RecordRef, Error> {
	if values.len() != meta.field_count() {
		return Err(Error::IncompleteColumns);
	}
	// Clear the nullity area before setting individual bits
	if meta.nullity_bytes() > 0 {
		dst.bytes_mut()[..meta.nullity_bytes()].fill(0);
	}
	for (index, value) in values.iter().enumerate() {
		dst.set_value(meta, index, value, arena)?;
	}
	Ok(dst.freeze())
}

/// Unpack a record into a row of runtime values.
pub fn unpack(meta: &RecordMeta, record: RecordRef) -> Vec<Value> {
	(0..meta.field_count()).map(|index| record.get_value(meta, index)).collect()
}

#[cfg(test)]
mod tests {
	use rust_decimal::Decimal;

	use super::*;
	use crate::mem::Discipline;
	use crate::record::RecordStore;

	fn round_trip(fields: Vec<FieldType>, values: Vec<Value>) {
		let nullable = vec![true; fields.len()];
		let meta = RecordMeta::new(fields, nullable);
		let store = RecordStore::new(meta.clone().into(), Some(Arena::new(Discipline::Monotonic)));
		let record = store.append_values(&values).unwrap();
		assert_eq!(unpack(&meta, record), values);
	}

	#[test]
	fn fixed_width_fields_round_trip() {
		round_trip(
			vec![
				FieldType::Boolean,
				FieldType::Int1,
				FieldType::Int2,
				FieldType::Int4,
				FieldType::Int8,
				FieldType::Float4,
				FieldType::Float8,
			],
			vec![
				Value::Bool(true),
				Value::Int4(-5),
				Value::Int4(-3000),
				Value::Int4(i32::MIN),
				Value::Int8(i64::MAX),
				Value::Float4(1.5),
				Value::Float8(-2.25),
			],
		);
	}

	#[test]
	fn nulls_round_trip() {
		round_trip(
			vec![FieldType::Int4, FieldType::varchar(None), FieldType::Date],
			vec![Value::Empty, Value::Empty, Value::Empty],
		);
	}

	#[test]
	fn decimal_and_temporal_round_trip() {
		round_trip(
			vec![
				FieldType::decimal(10, 3),
				FieldType::Date,
				FieldType::TimeOfDay {
					with_offset: false,
				},
				FieldType::TimePoint {
					with_offset: true,
				},
			],
			vec![
				Value::Decimal(Decimal::new(-123456, 3)),
				Value::Date(Date::from_days(20000)),
				Value::TimeOfDay(TimeOfDay::from_nanos(1234567890)),
				Value::TimePoint(TimePoint::with_offset(1_700_000_000, 500, 540)),
			],
		);
	}

	#[test]
	fn varlen_fields_round_trip_inline_and_heap() {
		let arena = Arena::new(Discipline::Monotonic);
		let long = "a payload comfortably longer than fifteen bytes";
		round_trip(
			vec![FieldType::varchar(None), FieldType::Octet {
				varying: true,
				option: Default::default(),
			}],
			vec![Value::Text(Text::new(long, &arena)), Value::Octet(Octet::inline(&[1, 2, 3]))],
		);
	}

	#[test]
	fn lob_references_round_trip() {
		round_trip(
			vec![FieldType::Blob, FieldType::Clob],
			vec![
				Value::Blob(LobReference::resolved(9, 8, 7)),
				Value::Clob(LobReference::provided(17)),
			],
		);
	}

	#[test]
	fn non_nullable_fields_reject_null() {
		let meta = RecordMeta::new(vec![FieldType::Int4], vec![false]);
		let store = RecordStore::new(meta.into(), None);
		let err = store.append_values(&[Value::Empty]).unwrap_err();
		assert!(matches!(err, Error::NotNullViolation { .. }));
	}
}
