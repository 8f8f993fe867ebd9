//! The expression evaluator.
//!
//! Expressions evaluate against one block's variable table. Failure
//! values (`Value::Error`) flow through operations like any other
//! value; the operator layer turns them into statement failures,
//! recording the failed expression on the evaluation context.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::err::{Error, EvalErrorKind};
use crate::exec::variables::VariableTable;
use crate::fnc::Registry;
use crate::plan::{CompareOp, Expression};
use crate::val::arith::{self, Truth};
use crate::val::cast::{cast, CastContext};
use crate::val::{LossPolicy, TimePoint, Value};

/// Everything an expression needs from its surroundings.
pub struct EvalContext<'a> {
	pub variables: &'a VariableTable,
	pub registry: &'a Arc<Registry>,
	/// Parameter bindings by placeholder name
	pub parameters: &'a HashMap<String, Value>,
	/// The transaction start timestamp backing LOCALTIME and
	/// LOCALTIMESTAMP, stable across retries
	pub tx_start: TimePoint,
	pub zone_offset_minutes: i16,
	pub loss_policy: LossPolicy,
	pub lenient: bool,
	/// The description of the first failing expression
	pub failed: &'a Mutex<Option<String>>,
}

impl EvalContext<'_> {
	fn record_failure(&self, expr: &Expression) {
		let mut slot = self.failed.lock();
		if slot.is_none() {
			*slot = Some(expr.describe());
		}
	}
}

/// Evaluate an expression. Failure values are returned as
/// `Value::Error`; `Err` is reserved for structural problems such as
/// unknown functions or unbound placeholders.
pub fn evaluate(expr: &Expression, ctx: &EvalContext) -> Result<Value, Error> {
	let value = match expr {
		Expression::Literal(value) => *value,
		Expression::Variable(id) => ctx.variables.get(*id)?,
		Expression::Placeholder(name) => match ctx.parameters.get(name) {
			Some(value) => *value,
			None => {
				return Err(Error::UnboundPlaceholder {
					name: name.clone(),
				})
			}
		},
		Expression::Arith {
			op,
			left,
			right,
		} => {
			let l = evaluate(left, ctx)?;
			let r = evaluate(right, ctx)?;
			arith::binary(*op, &l, &r)
		}
		Expression::Negate(inner) => arith::negate(&evaluate(inner, ctx)?),
		Expression::Compare {
			op,
			left,
			right,
		} => {
			let l = evaluate(left, ctx)?;
			let r = evaluate(right, ctx)?;
			compare(*op, &l, &r)
		}
		Expression::And(left, right) => {
			match (truth(&evaluate(left, ctx)?), truth(&evaluate(right, ctx)?)) {
				(Err(kind), _) | (_, Err(kind)) => Value::Error(kind),
				(Ok(l), Ok(r)) => l.and(r).into_value(),
			}
		}
		Expression::Or(left, right) => {
			match (truth(&evaluate(left, ctx)?), truth(&evaluate(right, ctx)?)) {
				(Err(kind), _) | (_, Err(kind)) => Value::Error(kind),
				(Ok(l), Ok(r)) => l.or(r).into_value(),
			}
		}
		Expression::Not(inner) => match truth(&evaluate(inner, ctx)?) {
			Err(kind) => Value::Error(kind),
			Ok(t) => t.not().into_value(),
		},
		Expression::IsNull(inner) => {
			let value = evaluate(inner, ctx)?;
			match value {
				Value::Error(kind) => Value::Error(kind),
				value => Value::Bool(value.is_empty()),
			}
		}
		Expression::Cast {
			target,
			input,
		} => {
			let value = evaluate(input, ctx)?;
			let cast_ctx = CastContext {
				arena: ctx.variables.arena(),
				loss_policy: ctx.loss_policy,
				lenient: ctx.lenient,
				zone_offset_minutes: ctx.zone_offset_minutes,
			};
			cast(&value, target, &cast_ctx)
		}
		Expression::Function {
			name,
			args,
		} => {
			let function = ctx.registry.scalar(name)?;
			let mut evaluated = Vec::with_capacity(args.len());
			for arg in args {
				evaluated.push(evaluate(arg, ctx)?);
			}
			function(&evaluated, ctx.variables.arena())
		}
		Expression::LocalTime => Value::TimeOfDay(ctx.tx_start.time_of_day()),
		Expression::LocalTimestamp => Value::TimePoint(ctx.tx_start),
	};
	if value.is_error() {
		ctx.record_failure(expr);
	}
	Ok(value)
}

/// Evaluate an expression, turning a failure value into the statement
/// error that aborts the enclosing statement.
pub fn evaluate_checked(expr: &Expression, ctx: &EvalContext) -> Result<Value, Error> {
	let value = evaluate(expr, ctx)?;
	if let Value::Error(kind) = value {
		let expression =
			ctx.failed.lock().clone().unwrap_or_else(|| expr.describe());
		return Err(Error::ExpressionEvaluation {
			kind,
			expression,
		});
	}
	Ok(value)
}

fn truth(value: &Value) -> Result<Truth, EvalErrorKind> {
	Truth::from_value(value)
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Value {
	if let Value::Error(kind) = lhs {
		return Value::Error(*kind);
	}
	if let Value::Error(kind) = rhs {
		return Value::Error(*kind);
	}
	if lhs.is_empty() || rhs.is_empty() {
		return Value::Empty;
	}
	let Some(ordering) = lhs.partial_cmp_value(rhs) else {
		return Value::Error(EvalErrorKind::UnsupportedCast);
	};
	let result = match op {
		CompareOp::Equal => ordering == std::cmp::Ordering::Equal,
		CompareOp::NotEqual => ordering != std::cmp::Ordering::Equal,
		CompareOp::Less => ordering == std::cmp::Ordering::Less,
		CompareOp::LessOrEqual => ordering != std::cmp::Ordering::Greater,
		CompareOp::Greater => ordering == std::cmp::Ordering::Greater,
		CompareOp::GreaterOrEqual => ordering != std::cmp::Ordering::Less,
	};
	Value::Bool(result)
}
