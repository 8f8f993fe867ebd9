//! Arithmetic, comparison and three-valued logic over runtime values.
//!
//! Any empty operand makes the result empty; any error operand
//! propagates unchanged (left operand first). Integer and float
//! arithmetic use native machine semantics; decimal arithmetic is
//! checked and traps on overflow, division by zero and remainder by
//! zero.

use std::cmp::Ordering;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::err::EvalErrorKind;
use crate::val::number;
use crate::val::{Kind, Value};

/// The three-valued truth of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
	True,
	False,
	Unknown,
}

impl Truth {
	/// Build a truth value from a nullable boolean.
	pub fn from_value(value: &Value) -> Result<Truth, EvalErrorKind> {
		match value {
			Value::Error(kind) => Err(*kind),
			Value::Empty => Ok(Truth::Unknown),
			Value::Bool(true) => Ok(Truth::True),
			Value::Bool(false) => Ok(Truth::False),
			_ => Err(EvalErrorKind::UnsupportedCast),
		}
	}

	/// Three-valued conjunction: `unknown AND false = false`.
	pub fn and(self, other: Truth) -> Truth {
		match (self, other) {
			(Truth::False, _) | (_, Truth::False) => Truth::False,
			(Truth::True, Truth::True) => Truth::True,
			_ => Truth::Unknown,
		}
	}

	/// Three-valued disjunction: `unknown OR true = true`.
	pub fn or(self, other: Truth) -> Truth {
		match (self, other) {
			(Truth::True, _) | (_, Truth::True) => Truth::True,
			(Truth::False, Truth::False) => Truth::False,
			_ => Truth::Unknown,
		}
	}

	/// Three-valued negation.
	pub fn not(self) -> Truth {
		match self {
			Truth::True => Truth::False,
			Truth::False => Truth::True,
			Truth::Unknown => Truth::Unknown,
		}
	}

	/// Whether the predicate admits the row. Unknown does not.
	pub fn admits(self) -> bool {
		self == Truth::True
	}

	/// Convert back into a nullable boolean value.
	pub fn into_value(self) -> Value {
		match self {
			Truth::True => Value::Bool(true),
			Truth::False => Value::Bool(false),
			Truth::Unknown => Value::Empty,
		}
	}
}

/// The binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
	Add,
	Subtract,
	Multiply,
	Divide,
	Remainder,
}

/// The numeric promotion lattice: approximate types dominate exact
/// ones, wider types dominate narrower ones.
fn promote(a: Kind, b: Kind) -> Kind {
	use Kind::*;
	match (a, b) {
		(Float8, _) | (_, Float8) | (Float4, Decimal) | (Decimal, Float4) => Float8,
		(Float4, _) | (_, Float4) => Float4,
		(Decimal, _) | (_, Decimal) => Decimal,
		(Int8, _) | (_, Int8) => Int8,
		_ => Int4,
	}
}

/// Apply a binary arithmetic operator with null propagation and
/// numeric promotion. Non-numeric operands produce an error value.
pub fn binary(op: ArithOp, lhs: &Value, rhs: &Value) -> Value {
	// Errors propagate first, then nulls
	if let Value::Error(kind) = lhs {
		return Value::Error(*kind);
	}
	if let Value::Error(kind) = rhs {
		return Value::Error(*kind);
	}
	if lhs.is_empty() || rhs.is_empty() {
		return Value::Empty;
	}
	if !lhs.is_numeric() || !rhs.is_numeric() {
		return Value::Error(EvalErrorKind::UnsupportedCast);
	}
	match promote(lhs.kind(), rhs.kind()) {
		Kind::Int4 => int4_binary(op, lhs, rhs),
		Kind::Int8 => int8_binary(op, lhs, rhs),
		Kind::Decimal => decimal_binary(op, lhs, rhs),
		Kind::Float4 => {
			let a = widen_f64(lhs);
			let b = widen_f64(rhs);
			match float_binary(op, a, b) {
				Ok(v) => Value::Float4(v as f32),
				Err(kind) => Value::Error(kind),
			}
		}
		_ => {
			let a = widen_f64(lhs);
			let b = widen_f64(rhs);
			match float_binary(op, a, b) {
				Ok(v) => Value::Float8(v),
				Err(kind) => Value::Error(kind),
			}
		}
	}
}

/// Arithmetic negation with null propagation.
pub fn negate(value: &Value) -> Value {
	match value {
		Value::Error(kind) => Value::Error(*kind),
		Value::Empty => Value::Empty,
		Value::Int4(v) => Value::Int4(v.wrapping_neg()),
		Value::Int8(v) => Value::Int8(v.wrapping_neg()),
		Value::Float4(v) => Value::Float4(-v),
		Value::Float8(v) => Value::Float8(-v),
		Value::Decimal(v) => Value::Decimal(-v),
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn int4_binary(op: ArithOp, lhs: &Value, rhs: &Value) -> Value {
	let a = match lhs {
		Value::Int4(v) => *v,
		_ => return Value::Error(EvalErrorKind::UnsupportedCast),
	};
	let b = match rhs {
		Value::Int4(v) => *v,
		_ => return Value::Error(EvalErrorKind::UnsupportedCast),
	};
	match op {
		ArithOp::Add => Value::Int4(a.wrapping_add(b)),
		ArithOp::Subtract => Value::Int4(a.wrapping_sub(b)),
		ArithOp::Multiply => Value::Int4(a.wrapping_mul(b)),
		ArithOp::Divide if b == 0 => Value::Error(EvalErrorKind::Arithmetic),
		ArithOp::Divide => Value::Int4(a.wrapping_div(b)),
		ArithOp::Remainder if b == 0 => Value::Error(EvalErrorKind::Arithmetic),
		ArithOp::Remainder => Value::Int4(a.wrapping_rem(b)),
	}
}

fn int8_binary(op: ArithOp, lhs: &Value, rhs: &Value) -> Value {
	let a = match lhs.as_int() {
		Some(v) => v,
		None => return Value::Error(EvalErrorKind::UnsupportedCast),
	};
	let b = match rhs.as_int() {
		Some(v) => v,
		None => return Value::Error(EvalErrorKind::UnsupportedCast),
	};
	match op {
		ArithOp::Add => Value::Int8(a.wrapping_add(b)),
		ArithOp::Subtract => Value::Int8(a.wrapping_sub(b)),
		ArithOp::Multiply => Value::Int8(a.wrapping_mul(b)),
		ArithOp::Divide if b == 0 => Value::Error(EvalErrorKind::Arithmetic),
		ArithOp::Divide => Value::Int8(a.wrapping_div(b)),
		ArithOp::Remainder if b == 0 => Value::Error(EvalErrorKind::Arithmetic),
		ArithOp::Remainder => Value::Int8(a.wrapping_rem(b)),
	}
}

fn decimal_binary(op: ArithOp, lhs: &Value, rhs: &Value) -> Value {
	let a = match widen_decimal(lhs) {
		Some(v) => v,
		None => return Value::Error(EvalErrorKind::UnsupportedCast),
	};
	let b = match widen_decimal(rhs) {
		Some(v) => v,
		None => return Value::Error(EvalErrorKind::UnsupportedCast),
	};
	let result = match op {
		ArithOp::Add => number::checked_add(a, b),
		ArithOp::Subtract => number::checked_sub(a, b),
		ArithOp::Multiply => number::checked_mul(a, b),
		ArithOp::Divide => number::checked_div(a, b),
		ArithOp::Remainder => number::checked_rem(a, b),
	};
	match result {
		Ok(v) => Value::Decimal(v),
		Err(kind) => Value::Error(kind),
	}
}

fn float_binary(op: ArithOp, a: f64, b: f64) -> Result<f64, EvalErrorKind> {
	match op {
		ArithOp::Add => Ok(a + b),
		ArithOp::Subtract => Ok(a - b),
		ArithOp::Multiply => Ok(a * b),
		// Native IEEE semantics: division by zero yields an infinity
		ArithOp::Divide => Ok(a / b),
		ArithOp::Remainder => Ok(a % b),
	}
}

/// Widen a numeric value to f64 for approximate arithmetic.
fn widen_f64(value: &Value) -> f64 {
	match value {
		Value::Int4(v) => *v as f64,
		Value::Int8(v) => *v as f64,
		Value::Float4(v) => *v as f64,
		Value::Float8(v) => *v,
		Value::Decimal(v) => rust_decimal::prelude::ToPrimitive::to_f64(v).unwrap_or(f64::NAN),
		_ => f64::NAN,
	}
}

/// Widen an exact numeric value to a decimal.
fn widen_decimal(value: &Value) -> Option<Decimal> {
	match value {
		Value::Int4(v) => Some(Decimal::from(*v)),
		Value::Int8(v) => Some(Decimal::from(*v)),
		Value::Decimal(v) => Some(*v),
		Value::Float4(v) => Decimal::from_f32(*v),
		Value::Float8(v) => Decimal::from_f64(*v),
		_ => None,
	}
}

/// Compare two numeric values across type families.
pub fn compare_numeric(lhs: &Value, rhs: &Value) -> Option<Ordering> {
	match promote(lhs.kind(), rhs.kind()) {
		Kind::Int4 | Kind::Int8 => lhs.as_int()?.partial_cmp(&rhs.as_int()?),
		Kind::Decimal => widen_decimal(lhs)?.partial_cmp(&widen_decimal(rhs)?),
		_ => widen_f64(lhs).partial_cmp(&widen_f64(rhs)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn null_propagates_through_binary_ops() {
		assert_eq!(binary(ArithOp::Add, &Value::Empty, &Value::Int4(1)), Value::Empty);
		assert_eq!(binary(ArithOp::Multiply, &Value::Int8(2), &Value::Empty), Value::Empty);
	}

	#[test]
	fn errors_dominate_nulls() {
		let err = Value::Error(EvalErrorKind::Arithmetic);
		assert_eq!(binary(ArithOp::Add, &err, &Value::Empty), err);
	}

	#[test]
	fn promotion_follows_the_lattice() {
		assert_eq!(binary(ArithOp::Add, &Value::Int4(1), &Value::Int4(2)), Value::Int4(3));
		assert_eq!(binary(ArithOp::Add, &Value::Int4(1), &Value::Int8(2)), Value::Int8(3));
		assert!(matches!(
			binary(ArithOp::Add, &Value::Int4(1), &Value::Decimal(Decimal::ONE)),
			Value::Decimal(_)
		));
		assert!(matches!(
			binary(ArithOp::Add, &Value::Decimal(Decimal::ONE), &Value::Float8(1.0)),
			Value::Float8(_)
		));
	}

	#[test]
	fn integer_division_by_zero_is_an_error() {
		assert_eq!(
			binary(ArithOp::Divide, &Value::Int4(1), &Value::Int4(0)),
			Value::Error(EvalErrorKind::Arithmetic)
		);
		assert_eq!(
			binary(ArithOp::Remainder, &Value::Int8(1), &Value::Int8(0)),
			Value::Error(EvalErrorKind::Arithmetic)
		);
	}

	#[test]
	fn float_division_by_zero_is_native() {
		match binary(ArithOp::Divide, &Value::Float8(1.0), &Value::Float8(0.0)) {
			Value::Float8(v) => assert!(v.is_infinite()),
			other => panic!("unexpected result {other:?}"),
		}
	}

	#[test]
	fn decimal_overflow_traps() {
		assert_eq!(
			binary(ArithOp::Add, &Value::Decimal(Decimal::MAX), &Value::Decimal(Decimal::ONE)),
			Value::Error(EvalErrorKind::Arithmetic)
		);
	}

	#[test]
	fn three_valued_logic_tables() {
		use Truth::*;
		assert_eq!(Unknown.and(False), False);
		assert_eq!(Unknown.and(True), Unknown);
		assert_eq!(Unknown.or(True), True);
		assert_eq!(Unknown.or(False), Unknown);
		assert_eq!(Unknown.not(), Unknown);
		assert!(!Unknown.admits());
	}
}
