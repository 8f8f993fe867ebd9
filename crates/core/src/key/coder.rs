use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::err::{Error, EvalErrorKind};
use crate::mem::Arena;
use crate::record::{RecordMeta, RecordRef};
use crate::val::{Date, LobReference, Octet, Text, TimeOfDay, TimePoint, Value};

/// The sort direction of a key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
	Ascending,
	Descending,
}

/// The bias applied to the scientific exponent of a decimal key so it
/// fits an unsigned 16-bit field. With a 96-bit coefficient the
/// exponent stays well within the biased range.
const DECIMAL_EXP_BIAS: i32 = 8192;

/// Marker bytes for the null prefix: null orders before every value.
const NULL_MARKER: u8 = 0x00;
const VALUE_MARKER: u8 = 0x01;

/// Encode one typed value in order-preserving form, appending to
/// `out`. Descending columns complement every emitted byte.
pub fn encode_value(value: &Value, direction: Direction, out: &mut Vec<u8>) -> Result<(), Error> {
	let start = out.len();
	if value.is_empty() {
		out.push(NULL_MARKER);
	} else {
		out.push(VALUE_MARKER);
		encode_payload(value, out)?;
	}
	if direction == Direction::Descending {
		for byte in &mut out[start..] {
			*byte = !*byte;
		}
	}
	Ok(())
}

fn encode_payload(value: &Value, out: &mut Vec<u8>) -> Result<(), Error> {
	match value {
		Value::Error(kind) => {
			return Err(Error::ExpressionEvaluation {
				kind: *kind,
				expression: "key encoding".to_owned(),
			})
		}
		Value::Empty => unreachable!("handled by the null marker"),
		Value::Bool(v) => out.push(*v as u8),
		Value::Int4(v) => out.extend_from_slice(&((*v as u32) ^ 0x8000_0000).to_be_bytes()),
		Value::Int8(v) => out.extend_from_slice(&((*v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()),
		Value::Float4(v) => out.extend_from_slice(&flip_f32(*v).to_be_bytes()),
		Value::Float8(v) => out.extend_from_slice(&flip_f64(*v).to_be_bytes()),
		Value::Decimal(v) => encode_decimal(v, out),
		Value::Text(v) => encode_escaped(v.as_bytes(), out),
		Value::Octet(v) => encode_escaped(v.as_bytes(), out),
		Value::Date(v) => {
			out.extend_from_slice(&((v.days() as u64) ^ 0x8000_0000_0000_0000).to_be_bytes())
		}
		Value::TimeOfDay(v) => out.extend_from_slice(&v.nanos().to_be_bytes()),
		Value::TimePoint(v) => {
			out.extend_from_slice(&((v.seconds() as u64) ^ 0x8000_0000_0000_0000).to_be_bytes());
			out.extend_from_slice(&v.nanos().to_be_bytes());
		}
		Value::Blob(_) | Value::Clob(_) => {
			return Err(Error::Unsupported("LOB references cannot form index keys".to_owned()))
		}
	}
	Ok(())
}

/// Order-preserving float encoding: positive values get the sign bit
/// flipped, negative values get every bit flipped.
fn flip_f32(v: f32) -> u32 {
	let bits = v.to_bits();
	if bits & 0x8000_0000 != 0 {
		!bits
	} else {
		bits ^ 0x8000_0000
	}
}

fn flip_f64(v: f64) -> u64 {
	let bits = v.to_bits();
	if bits & 0x8000_0000_0000_0000 != 0 {
		!bits
	} else {
		bits ^ 0x8000_0000_0000_0000
	}
}

/// Variable-length lexicographic decimal encoding.
///
/// Zero is a single `0x80` byte so it sorts between negative and
/// positive values. Non-zero values emit a sign marker, a biased
/// scientific exponent, and the coefficient digits packed two per
/// byte with each nibble holding `digit + 1` so the zero nibble
/// terminates the mantissa. Negative values complement the exponent
/// and digit bytes to reverse their order.
fn encode_decimal(value: &Decimal, out: &mut Vec<u8>) {
	if value.is_zero() {
		out.push(0x80);
		return;
	}
	let negative = value.is_sign_negative();
	out.push(if negative {
		0x00
	} else {
		0xFF
	});
	// Collect the coefficient digits most significant first
	let mut digits = Vec::with_capacity(29);
	let mut mantissa = value.mantissa().unsigned_abs();
	while mantissa > 0 {
		digits.push((mantissa % 10) as u8);
		mantissa /= 10;
	}
	digits.reverse();
	// Strip trailing zero digits; they carry no ordering information
	while digits.len() > 1 && digits.last() == Some(&0) {
		digits.pop();
	}
	// The scientific exponent: position of the leading digit
	let sci = digits_sci_exponent(value);
	let biased = (sci + DECIMAL_EXP_BIAS) as u16;
	let exp_bytes = if negative {
		(!biased).to_be_bytes()
	} else {
		biased.to_be_bytes()
	};
	out.extend_from_slice(&exp_bytes);
	// Pack digits two per byte, biased by one, zero-terminated
	let mut iter = digits.iter();
	loop {
		let hi = match iter.next() {
			Some(d) => d + 1,
			None => 0,
		};
		let lo = match iter.next() {
			Some(d) => d + 1,
			None => 0,
		};
		let mut byte = (hi << 4) | lo;
		if negative {
			byte = !byte;
		}
		out.push(byte);
		if hi == 0 || lo == 0 {
			break;
		}
	}
}

/// The scientific exponent of a decimal: `value = d.ddd * 10^sci`.
fn digits_sci_exponent(value: &Decimal) -> i32 {
	let mut mantissa = value.mantissa().unsigned_abs();
	let mut count = 0i32;
	while mantissa > 0 {
		mantissa /= 10;
		count += 1;
	}
	count - 1 - value.scale() as i32
}

/// Escape varlen bytes so embedded NULs keep lexicographic order:
/// `0x00` becomes `0x00 0xFF` and the payload is terminated with
/// `0x00 0x00`.
fn encode_escaped(bytes: &[u8], out: &mut Vec<u8>) {
	for &b in bytes {
		out.push(b);
		if b == 0x00 {
			out.push(0xFF);
		}
	}
	out.push(0x00);
	out.push(0x00);
}

/// Encode the given record fields as a storage key.
pub fn encode_key(
	meta: &RecordMeta,
	record: RecordRef,
	columns: &[(usize, Direction)],
) -> Result<Vec<u8>, Error> {
	let mut out = Vec::with_capacity(columns.len() * 10);
	for (index, direction) in columns {
		let value = record.get_value(meta, *index);
		encode_value(&value, *direction, &mut out)?;
	}
	Ok(out)
}

/// Encode a prefix of key values, as used for scan bounds over an
/// index prefix.
pub fn encode_key_prefix(
	values: &[Value],
	directions: &[Direction],
) -> Result<Vec<u8>, Error> {
	let mut out = Vec::with_capacity(values.len() * 10);
	for (value, direction) in values.iter().zip(directions.iter()) {
		encode_value(value, *direction, &mut out)?;
	}
	Ok(out)
}

/// Row payload tags.
const TAG_EMPTY: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT4: u8 = 2;
const TAG_INT8: u8 = 3;
const TAG_FLOAT4: u8 = 4;
const TAG_FLOAT8: u8 = 5;
const TAG_DECIMAL: u8 = 6;
const TAG_TEXT: u8 = 7;
const TAG_OCTET: u8 = 8;
const TAG_DATE: u8 = 9;
const TAG_TIME_OF_DAY: u8 = 10;
const TAG_TIME_POINT: u8 = 11;
const TAG_BLOB: u8 = 12;
const TAG_CLOB: u8 = 13;

/// Serialize a row of values as a storage value payload. The encoding
/// is tagged and length-prefixed; it carries no ordering requirement.
pub fn encode_row(values: &[Value]) -> Result<Vec<u8>, Error> {
	let mut out = Vec::with_capacity(values.len() * 12);
	out.extend_from_slice(&(values.len() as u32).to_le_bytes());
	for value in values {
		match value {
			Value::Error(kind) => {
				return Err(Error::ExpressionEvaluation {
					kind: *kind,
					expression: "row encoding".to_owned(),
				})
			}
			Value::Empty => out.push(TAG_EMPTY),
			Value::Bool(v) => {
				out.push(TAG_BOOL);
				out.push(*v as u8);
			}
			Value::Int4(v) => {
				out.push(TAG_INT4);
				out.extend_from_slice(&v.to_le_bytes());
			}
			Value::Int8(v) => {
				out.push(TAG_INT8);
				out.extend_from_slice(&v.to_le_bytes());
			}
			Value::Float4(v) => {
				out.push(TAG_FLOAT4);
				out.extend_from_slice(&v.to_le_bytes());
			}
			Value::Float8(v) => {
				out.push(TAG_FLOAT8);
				out.extend_from_slice(&v.to_le_bytes());
			}
			Value::Decimal(v) => {
				out.push(TAG_DECIMAL);
				out.extend_from_slice(&v.serialize());
			}
			Value::Text(v) => {
				out.push(TAG_TEXT);
				out.extend_from_slice(&(v.len() as u32).to_le_bytes());
				out.extend_from_slice(v.as_bytes());
			}
			Value::Octet(v) => {
				out.push(TAG_OCTET);
				out.extend_from_slice(&(v.len() as u32).to_le_bytes());
				out.extend_from_slice(v.as_bytes());
			}
			Value::Date(v) => {
				out.push(TAG_DATE);
				out.extend_from_slice(&v.days().to_le_bytes());
			}
			Value::TimeOfDay(v) => {
				out.push(TAG_TIME_OF_DAY);
				out.extend_from_slice(&v.nanos().to_le_bytes());
				let offset = v.offset_minutes();
				out.push(offset.is_some() as u8);
				out.extend_from_slice(&offset.unwrap_or(0).to_le_bytes());
			}
			Value::TimePoint(v) => {
				out.push(TAG_TIME_POINT);
				out.extend_from_slice(&v.seconds().to_le_bytes());
				out.extend_from_slice(&v.nanos().to_le_bytes());
				let offset = v.offset_minutes();
				out.push(offset.is_some() as u8);
				out.extend_from_slice(&offset.unwrap_or(0).to_le_bytes());
			}
			Value::Blob(v) => {
				out.push(TAG_BLOB);
				out.extend_from_slice(&v.to_image());
			}
			Value::Clob(v) => {
				out.push(TAG_CLOB);
				out.extend_from_slice(&v.to_image());
			}
		}
	}
	Ok(out)
}

/// Deserialize a row payload. Varlen payloads beyond the inline
/// capacity are copied into `arena`.
pub fn decode_row(bytes: &[u8], arena: &Arena) -> Result<Vec<Value>, Error> {
	let mut reader = Reader {
		bytes,
		at: 0,
	};
	let count = reader.u32()? as usize;
	let mut out = Vec::with_capacity(count);
	for _ in 0..count {
		let tag = reader.u8()?;
		let value = match tag {
			TAG_EMPTY => Value::Empty,
			TAG_BOOL => Value::Bool(reader.u8()? != 0),
			TAG_INT4 => Value::Int4(i32::from_le_bytes(reader.array()?)),
			TAG_INT8 => Value::Int8(i64::from_le_bytes(reader.array()?)),
			TAG_FLOAT4 => Value::Float4(f32::from_le_bytes(reader.array()?)),
			TAG_FLOAT8 => Value::Float8(f64::from_le_bytes(reader.array()?)),
			TAG_DECIMAL => Value::Decimal(Decimal::deserialize(reader.array()?)),
			TAG_TEXT => {
				let len = reader.u32()? as usize;
				let slice = reader.slice(len)?;
				let text = std::str::from_utf8(slice).map_err(|_| {
					Error::ExpressionEvaluation {
						kind: EvalErrorKind::Format,
						expression: "row decoding".to_owned(),
					}
				})?;
				Value::Text(Text::new(text, arena))
			}
			TAG_OCTET => {
				let len = reader.u32()? as usize;
				Value::Octet(Octet::new(reader.slice(len)?, arena))
			}
			TAG_DATE => Value::Date(Date::from_days(i64::from_le_bytes(reader.array()?))),
			TAG_TIME_OF_DAY => {
				let nanos = u64::from_le_bytes(reader.array()?);
				let has_offset = reader.u8()? != 0;
				let offset = i16::from_le_bytes(reader.array()?);
				if has_offset {
					let local = (nanos as i64 + offset as i64 * 60 * 1_000_000_000)
						.rem_euclid(24 * 60 * 60 * 1_000_000_000) as u64;
					Value::TimeOfDay(TimeOfDay::with_offset(local, offset))
				} else {
					Value::TimeOfDay(TimeOfDay::from_nanos(nanos))
				}
			}
			TAG_TIME_POINT => {
				let seconds = i64::from_le_bytes(reader.array()?);
				let nanos = u32::from_le_bytes(reader.array()?);
				let has_offset = reader.u8()? != 0;
				let offset = i16::from_le_bytes(reader.array()?);
				if has_offset {
					Value::TimePoint(TimePoint::with_offset(seconds, nanos, offset))
				} else {
					Value::TimePoint(TimePoint::new(seconds, nanos))
				}
			}
			TAG_BLOB => Value::Blob(LobReference::from_image(&reader.array()?)),
			TAG_CLOB => Value::Clob(LobReference::from_image(&reader.array()?)),
			_ => {
				return Err(Error::Ds(format!("unknown row payload tag {tag}")));
			}
		};
		out.push(value);
	}
	Ok(out)
}

struct Reader<'a> {
	bytes: &'a [u8],
	at: usize,
}

impl<'a> Reader<'a> {
	fn u8(&mut self) -> Result<u8, Error> {
		let b = *self.bytes.get(self.at).ok_or_else(truncated)?;
		self.at += 1;
		Ok(b)
	}

	fn u32(&mut self) -> Result<u32, Error> {
		Ok(u32::from_le_bytes(self.array()?))
	}

	fn slice(&mut self, len: usize) -> Result<&'a [u8], Error> {
		let end = self.at.checked_add(len).ok_or_else(truncated)?;
		let slice = self.bytes.get(self.at..end).ok_or_else(truncated)?;
		self.at = end;
		Ok(slice)
	}

	fn array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
		Ok(self.slice(N)?.try_into().expect("slice length matches"))
	}
}

fn truncated() -> Error {
	Error::Ds("truncated row payload".to_owned())
}
