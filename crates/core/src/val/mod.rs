//! The runtime value model of the expression evaluator.
//!
//! A [`Value`] is a tagged union over the runtime types the engine
//! evaluates expressions with. `Empty` represents SQL `NULL`; `Error`
//! carries an evaluation failure kind and propagates through every
//! operation it meets. Variable-length values keep a small-string
//! optimised form inline and spill larger payloads into an arena.

pub mod arith;
pub mod cast;
pub mod lob;
pub mod number;
pub mod temporal;
pub mod text;

pub use arith::Truth;
pub use cast::{CastTarget, LossPolicy};
pub use lob::{LobKind, LobReference, RelaySession};
pub use number::Triple;
pub use temporal::{Date, TimeOfDay, TimePoint};
pub use text::{Octet, Text};

use rust_decimal::Decimal;

use crate::err::EvalErrorKind;

/// The runtime type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
	Error,
	Empty,
	Bool,
	Int4,
	Int8,
	Float4,
	Float8,
	Decimal,
	Text,
	Octet,
	Date,
	TimeOfDay,
	TimePoint,
	Blob,
	Clob,
}

impl std::fmt::Display for Kind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::Error => "error",
			Self::Empty => "empty",
			Self::Bool => "boolean",
			Self::Int4 => "int4",
			Self::Int8 => "int8",
			Self::Float4 => "float4",
			Self::Float8 => "float8",
			Self::Decimal => "decimal",
			Self::Text => "character",
			Self::Octet => "octet",
			Self::Date => "date",
			Self::TimeOfDay => "time_of_day",
			Self::TimePoint => "time_point",
			Self::Blob => "blob",
			Self::Clob => "clob",
		};
		write!(f, "{name}")
	}
}

/// A typed runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
	/// An evaluation failure flowing through the expression
	Error(EvalErrorKind),
	/// SQL NULL
	Empty,
	Bool(bool),
	Int4(i32),
	Int8(i64),
	Float4(f32),
	Float8(f64),
	Decimal(Decimal),
	Text(Text),
	Octet(Octet),
	Date(Date),
	TimeOfDay(TimeOfDay),
	TimePoint(TimePoint),
	Blob(LobReference),
	Clob(LobReference),
}

impl Value {
	/// The runtime type of this value.
	pub fn kind(&self) -> Kind {
		match self {
			Self::Error(_) => Kind::Error,
			Self::Empty => Kind::Empty,
			Self::Bool(_) => Kind::Bool,
			Self::Int4(_) => Kind::Int4,
			Self::Int8(_) => Kind::Int8,
			Self::Float4(_) => Kind::Float4,
			Self::Float8(_) => Kind::Float8,
			Self::Decimal(_) => Kind::Decimal,
			Self::Text(_) => Kind::Text,
			Self::Octet(_) => Kind::Octet,
			Self::Date(_) => Kind::Date,
			Self::TimeOfDay(_) => Kind::TimeOfDay,
			Self::TimePoint(_) => Kind::TimePoint,
			Self::Blob(_) => Kind::Blob,
			Self::Clob(_) => Kind::Clob,
		}
	}

	/// Whether this value is SQL NULL.
	pub fn is_empty(&self) -> bool {
		matches!(self, Self::Empty)
	}

	/// Whether this value is an evaluation failure.
	pub fn is_error(&self) -> bool {
		matches!(self, Self::Error(_))
	}

	/// The evaluation failure carried by this value, if any.
	pub fn error_kind(&self) -> Option<EvalErrorKind> {
		match self {
			Self::Error(kind) => Some(*kind),
			_ => None,
		}
	}

	/// Whether this value is numeric (integer, float or decimal).
	pub fn is_numeric(&self) -> bool {
		matches!(
			self.kind(),
			Kind::Int4 | Kind::Int8 | Kind::Float4 | Kind::Float8 | Kind::Decimal
		)
	}

	/// View the value as an i64, widening smaller integers.
	pub fn as_int(&self) -> Option<i64> {
		match self {
			Self::Int4(v) => Some(*v as i64),
			Self::Int8(v) => Some(*v),
			_ => None,
		}
	}

	/// View the value as an f64, widening floats.
	pub fn as_float(&self) -> Option<f64> {
		match self {
			Self::Float4(v) => Some(*v as f64),
			Self::Float8(v) => Some(*v),
			_ => None,
		}
	}

	/// View the value as a boolean.
	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Self::Bool(v) => Some(*v),
			_ => None,
		}
	}

	/// Compare two values of the same runtime type family. Returns
	/// `None` when either side is empty or an error, or when the types
	/// are not comparable.
	pub fn partial_cmp_value(&self, other: &Value) -> Option<std::cmp::Ordering> {
		use std::cmp::Ordering;
		match (self, other) {
			(Self::Error(_), _) | (_, Self::Error(_)) => None,
			(Self::Empty, _) | (_, Self::Empty) => None,
			(Self::Bool(a), Self::Bool(b)) => a.partial_cmp(b),
			(Self::Text(a), Self::Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
			(Self::Octet(a), Self::Octet(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
			(Self::Date(a), Self::Date(b)) => a.partial_cmp(b),
			(Self::TimeOfDay(a), Self::TimeOfDay(b)) => a.partial_cmp(b),
			(Self::TimePoint(a), Self::TimePoint(b)) => a.partial_cmp(b),
			(a, b) if a.is_numeric() && b.is_numeric() => arith::compare_numeric(a, b),
			_ => None,
		}
	}
}

impl std::fmt::Display for Value {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Error(kind) => write!(f, "<error: {kind}>"),
			Self::Empty => write!(f, "NULL"),
			Self::Bool(v) => write!(f, "{v}"),
			Self::Int4(v) => write!(f, "{v}"),
			Self::Int8(v) => write!(f, "{v}"),
			Self::Float4(v) => write!(f, "{v}"),
			Self::Float8(v) => write!(f, "{v}"),
			Self::Decimal(v) => write!(f, "{v}"),
			Self::Text(v) => write!(f, "'{}'", v.as_str()),
			Self::Octet(v) => {
				write!(f, "x'")?;
				for b in v.as_bytes() {
					write!(f, "{b:02x}")?;
				}
				write!(f, "'")
			}
			Self::Date(v) => write!(f, "{v}"),
			Self::TimeOfDay(v) => write!(f, "{v}"),
			Self::TimePoint(v) => write!(f, "{v}"),
			Self::Blob(v) => write!(f, "{v}"),
			Self::Clob(v) => write!(f, "{v}"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn kinds_round_trip() {
		assert_eq!(Value::Empty.kind(), Kind::Empty);
		assert_eq!(Value::Int4(1).kind(), Kind::Int4);
		assert!(Value::Float8(1.0).is_numeric());
		assert!(!Value::Bool(true).is_numeric());
	}

	#[test]
	fn cross_family_comparison_is_undefined() {
		assert!(Value::Bool(true).partial_cmp_value(&Value::Int4(1)).is_none());
		assert!(Value::Empty.partial_cmp_value(&Value::Int4(1)).is_none());
	}

	#[test]
	fn numeric_comparison_spans_types() {
		use std::cmp::Ordering;
		assert_eq!(
			Value::Int4(2).partial_cmp_value(&Value::Float8(1.5)),
			Some(Ordering::Greater)
		);
		assert_eq!(
			Value::Int8(2).partial_cmp_value(&Value::Decimal(Decimal::new(20, 1))),
			Some(Ordering::Equal)
		);
	}
}
