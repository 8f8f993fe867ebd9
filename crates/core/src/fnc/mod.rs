//! The scalar and aggregate function registry.
//!
//! The registry lives on the root context and is passed explicitly to
//! the evaluator; there is no process-wide function table. Aggregates
//! are described by an initializer, a fold step and an optional
//! empty-value generator, which is what the incremental aggregate
//! exchange folds with. Holistic aggregates (DISTINCT) cannot be
//! folded incrementally and run after a plain group exchange instead.

use std::collections::HashMap;
use std::sync::Arc;

use crate::err::{Error, EvalErrorKind};
use crate::mem::Arena;
use crate::val::arith::{self, ArithOp};
use crate::val::{Text, Value};

/// A scalar function body. The arena receives any varlen result
/// payload beyond the inline capacity.
pub type ScalarFn = fn(&[Value], &Arena) -> Value;

/// An aggregate function: `init` seeds the accumulator from the first
/// non-null input, `fold` merges each further input, and `empty`
/// produces the result over empty input for functions which have one
/// (COUNT yields zero; the rest yield NULL).
#[derive(Clone, Copy)]
pub struct AggregateFn {
	pub init: fn(&Value) -> Value,
	pub fold: fn(&Value, &Value) -> Value,
	pub empty: Option<fn() -> Value>,
}

/// The function registry.
pub struct Registry {
	scalars: HashMap<&'static str, ScalarFn>,
	aggregates: HashMap<&'static str, AggregateFn>,
}

impl Registry {
	/// A registry holding the built-in functions.
	pub fn with_builtins() -> Arc<Self> {
		let mut scalars: HashMap<&'static str, ScalarFn> = HashMap::new();
		scalars.insert("abs", scalar_abs);
		scalars.insert("char_length", scalar_char_length);
		scalars.insert("upper", scalar_upper);
		scalars.insert("lower", scalar_lower);
		scalars.insert("coalesce", scalar_coalesce);
		let mut aggregates: HashMap<&'static str, AggregateFn> = HashMap::new();
		aggregates.insert(
			"count",
			AggregateFn {
				init: |_| Value::Int8(1),
				fold: |acc, _| arith::binary(ArithOp::Add, acc, &Value::Int8(1)),
				empty: Some(|| Value::Int8(0)),
			},
		);
		aggregates.insert(
			"sum",
			AggregateFn {
				init: |v| *v,
				fold: |acc, v| arith::binary(ArithOp::Add, acc, v),
				empty: None,
			},
		);
		aggregates.insert(
			"min",
			AggregateFn {
				init: |v| *v,
				fold: |acc, v| match acc.partial_cmp_value(v) {
					Some(std::cmp::Ordering::Greater) => *v,
					_ => *acc,
				},
				empty: None,
			},
		);
		aggregates.insert(
			"max",
			AggregateFn {
				init: |v| *v,
				fold: |acc, v| match acc.partial_cmp_value(v) {
					Some(std::cmp::Ordering::Less) => *v,
					_ => *acc,
				},
				empty: None,
			},
		);
		Arc::new(Self {
			scalars,
			aggregates,
		})
	}

	/// Resolve a scalar function by name.
	pub fn scalar(&self, name: &str) -> Result<ScalarFn, Error> {
		self.scalars.get(name).copied().ok_or_else(|| {
			Error::NotImplemented(format!("scalar function '{name}'"))
		})
	}

	/// Resolve an aggregate function by name.
	pub fn aggregate(&self, name: &str) -> Result<AggregateFn, Error> {
		self.aggregates.get(name).copied().ok_or_else(|| {
			Error::NotImplemented(format!("aggregate function '{name}'"))
		})
	}
}

fn scalar_abs(args: &[Value], _arena: &Arena) -> Value {
	match args {
		[Value::Int4(v)] => Value::Int4(v.wrapping_abs()),
		[Value::Int8(v)] => Value::Int8(v.wrapping_abs()),
		[Value::Float4(v)] => Value::Float4(v.abs()),
		[Value::Float8(v)] => Value::Float8(v.abs()),
		[Value::Decimal(v)] => Value::Decimal(v.abs()),
		[Value::Empty] => Value::Empty,
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn scalar_char_length(args: &[Value], _arena: &Arena) -> Value {
	match args {
		[Value::Text(v)] => Value::Int8(v.as_str().chars().count() as i64),
		[Value::Empty] => Value::Empty,
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn scalar_upper(args: &[Value], arena: &Arena) -> Value {
	case_map(args, arena, str::to_uppercase)
}

fn scalar_lower(args: &[Value], arena: &Arena) -> Value {
	case_map(args, arena, str::to_lowercase)
}

fn case_map(args: &[Value], arena: &Arena, map: fn(&str) -> String) -> Value {
	match args {
		[Value::Text(v)] => Value::Text(Text::new(&map(v.as_str()), arena)),
		[Value::Empty] => Value::Empty,
		_ => Value::Error(EvalErrorKind::UnsupportedCast),
	}
}

fn scalar_coalesce(args: &[Value], _arena: &Arena) -> Value {
	for value in args {
		if !value.is_empty() {
			return *value;
		}
	}
	Value::Empty
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_functions_are_reported() {
		let registry = Registry::with_builtins();
		assert!(registry.scalar("abs").is_ok());
		assert!(matches!(registry.scalar("nope"), Err(Error::NotImplemented(_))));
	}

	#[test]
	fn count_folds_and_has_an_empty_value() {
		let registry = Registry::with_builtins();
		let count = registry.aggregate("count").unwrap();
		let acc = (count.init)(&Value::Int4(9));
		let acc = (count.fold)(&acc, &Value::Int4(9));
		assert_eq!(acc, Value::Int8(2));
		assert_eq!((count.empty.unwrap())(), Value::Int8(0));
	}

	#[test]
	fn min_max_track_extremes() {
		let registry = Registry::with_builtins();
		let min = registry.aggregate("min").unwrap();
		let max = registry.aggregate("max").unwrap();
		let values = [Value::Int4(3), Value::Int4(1), Value::Int4(2)];
		let mut lo = (min.init)(&values[0]);
		let mut hi = (max.init)(&values[0]);
		for v in &values[1..] {
			lo = (min.fold)(&lo, v);
			hi = (max.fold)(&hi, v);
		}
		assert_eq!(lo, Value::Int4(1));
		assert_eq!(hi, Value::Int4(3));
	}
}
