use crate::val::arith::ArithOp;
use crate::val::{CastTarget, Value};

/// A slot in the enclosing block's variable table.
pub type VarId = usize;

/// The comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
	Equal,
	NotEqual,
	Less,
	LessOrEqual,
	Greater,
	GreaterOrEqual,
}

/// A scalar expression tree. Expressions are plan data: the evaluator
/// in [`crate::exec`] walks them against a variable table.
#[derive(Debug, Clone)]
pub enum Expression {
	/// A constant value
	Literal(Value),
	/// A read of a block variable
	Variable(VarId),
	/// A named parameter placeholder, bound at execution
	Placeholder(String),
	/// Binary arithmetic
	Arith {
		op: ArithOp,
		left: Box<Expression>,
		right: Box<Expression>,
	},
	/// Arithmetic negation
	Negate(Box<Expression>),
	/// Comparison producing three-valued boolean
	Compare {
		op: CompareOp,
		left: Box<Expression>,
		right: Box<Expression>,
	},
	/// Three-valued conjunction
	And(Box<Expression>, Box<Expression>),
	/// Three-valued disjunction
	Or(Box<Expression>, Box<Expression>),
	/// Three-valued negation
	Not(Box<Expression>),
	/// IS NULL test; never unknown
	IsNull(Box<Expression>),
	/// An explicit or implicit cast
	Cast {
		target: CastTarget,
		input: Box<Expression>,
	},
	/// A scalar function from the registry
	Function {
		name: String,
		args: Vec<Expression>,
	},
	/// The transaction-start time of day
	LocalTime,
	/// The transaction-start timestamp
	LocalTimestamp,
}

impl Expression {
	/// A literal value.
	pub fn literal(value: Value) -> Self {
		Self::Literal(value)
	}

	/// A variable read.
	pub fn var(id: VarId) -> Self {
		Self::Variable(id)
	}

	/// Shorthand for a binary arithmetic node.
	pub fn arith(op: ArithOp, left: Expression, right: Expression) -> Self {
		Self::Arith {
			op,
			left: Box::new(left),
			right: Box::new(right),
		}
	}

	/// Shorthand for a comparison node.
	pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
		Self::Compare {
			op,
			left: Box::new(left),
			right: Box::new(right),
		}
	}

	/// Collect every variable the expression reads.
	pub fn variables(&self, out: &mut Vec<VarId>) {
		match self {
			Self::Variable(id) => out.push(*id),
			Self::Arith {
				left,
				right,
				..
			}
			| Self::Compare {
				left,
				right,
				..
			} => {
				left.variables(out);
				right.variables(out);
			}
			Self::And(left, right) | Self::Or(left, right) => {
				left.variables(out);
				right.variables(out);
			}
			Self::Not(inner) | Self::IsNull(inner) | Self::Negate(inner) => inner.variables(out),
			Self::Cast {
				input,
				..
			} => input.variables(out),
			Self::Function {
				args,
				..
			} => {
				for arg in args {
					arg.variables(out);
				}
			}
			Self::Literal(_) | Self::Placeholder(_) | Self::LocalTime | Self::LocalTimestamp => {}
		}
	}

	/// Render the expression for diagnostics.
	pub fn describe(&self) -> String {
		match self {
			Self::Literal(value) => value.to_string(),
			Self::Variable(id) => format!("v{id}"),
			Self::Placeholder(name) => format!(":{name}"),
			Self::Arith {
				op,
				left,
				right,
			} => {
				let symbol = match op {
					ArithOp::Add => "+",
					ArithOp::Subtract => "-",
					ArithOp::Multiply => "*",
					ArithOp::Divide => "/",
					ArithOp::Remainder => "%",
				};
				format!("({} {symbol} {})", left.describe(), right.describe())
			}
			Self::Negate(inner) => format!("(-{})", inner.describe()),
			Self::Compare {
				op,
				left,
				right,
			} => {
				let symbol = match op {
					CompareOp::Equal => "=",
					CompareOp::NotEqual => "<>",
					CompareOp::Less => "<",
					CompareOp::LessOrEqual => "<=",
					CompareOp::Greater => ">",
					CompareOp::GreaterOrEqual => ">=",
				};
				format!("({} {symbol} {})", left.describe(), right.describe())
			}
			Self::And(left, right) => format!("({} AND {})", left.describe(), right.describe()),
			Self::Or(left, right) => format!("({} OR {})", left.describe(), right.describe()),
			Self::Not(inner) => format!("(NOT {})", inner.describe()),
			Self::IsNull(inner) => format!("({} IS NULL)", inner.describe()),
			Self::Cast {
				input,
				..
			} => format!("CAST({})", input.describe()),
			Self::Function {
				name,
				args,
			} => {
				let args: Vec<String> = args.iter().map(|a| a.describe()).collect();
				format!("{name}({})", args.join(", "))
			}
			Self::LocalTime => "LOCALTIME".to_owned(),
			Self::LocalTimestamp => "LOCALTIMESTAMP".to_owned(),
		}
	}
}
