use crate::plan::expr::{Expression, VarId};
use crate::plan::graph::StepId;

/// The scan bounds over an encoded key prefix.
#[derive(Debug, Clone, Default)]
pub struct ScanBounds {
	/// Lower bound key values; empty scans from the start
	pub lower: Vec<Expression>,
	pub lower_inclusive: bool,
	/// Upper bound key values; empty scans to the end
	pub upper: Vec<Expression>,
	pub upper_inclusive: bool,
}

impl ScanBounds {
	/// A full scan with no bounds.
	pub fn full() -> Self {
		Self {
			lower: Vec::new(),
			lower_inclusive: true,
			upper: Vec::new(),
			upper_inclusive: true,
		}
	}
}

/// The write mode of a full-record write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFullKind {
	/// INSERT: fail when the key exists
	Insert,
	/// INSERT OR REPLACE
	InsertOrReplace,
	/// INSERT IF NOT EXISTS: skip silently when the key exists
	InsertSkip,
}

/// The write mode of a partial write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePartialKind {
	Update,
	Delete,
}

/// One aggregation inside a group or aggregate exchange.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
	/// The aggregate function name, resolved in the registry
	pub function: String,
	/// The aggregated input variable; `None` for COUNT(*)
	pub input: Option<VarId>,
	/// The output variable receiving the accumulator
	pub output: VarId,
	/// Whether duplicates are eliminated before folding. Distinct
	/// aggregation is holistic and falls back to a plain group
	/// exchange
	pub distinct: bool,
}

/// A relational operator descriptor inside a process step. The
/// descriptors form a pipeline: the first operator drives the block
/// (scan, find or take), the rest consume and transform, and the last
/// one hands records onward (emit, offer or write).
#[derive(Debug, Clone)]
pub enum Operator {
	/// Iterate a primary or secondary index within bounds
	Scan {
		table: String,
		/// A secondary index name, or `None` for the primary index
		index: Option<String>,
		bounds: ScanBounds,
		/// Output variables, one per table column in order
		columns: Vec<VarId>,
	},
	/// Point lookup by full key
	Find {
		table: String,
		index: Option<String>,
		key: Vec<Expression>,
		columns: Vec<VarId>,
	},
	/// Nested-loop join where the inner side is a point lookup
	JoinFind {
		table: String,
		index: Option<String>,
		key: Vec<Expression>,
		columns: Vec<VarId>,
		/// Missing inner rows produce nulls instead of dropping the
		/// outer row
		left_outer: bool,
	},
	/// Nested-loop join where the inner side is an index scan over a
	/// key prefix
	JoinScan {
		table: String,
		index: Option<String>,
		prefix: Vec<Expression>,
		columns: Vec<VarId>,
		left_outer: bool,
	},
	/// Drop records whose predicate does not hold (three-valued)
	Filter {
		predicate: Expression,
	},
	/// Evaluate expressions into variables
	Project {
		assignments: Vec<(VarId, Expression)>,
	},
	/// Read records from a forward exchange
	TakeFlat {
		exchange: StepId,
		columns: Vec<VarId>,
	},
	/// Read grouped records from a shuffle exchange
	TakeGroup {
		exchange: StepId,
		columns: Vec<VarId>,
	},
	/// Read co-grouped records from several exchanges at once
	TakeCogroup {
		exchanges: Vec<StepId>,
		columns: Vec<Vec<VarId>>,
	},
	/// Write records to an exchange sink, honouring its partitioning
	Offer {
		exchange: StepId,
		columns: Vec<VarId>,
	},
	/// Fold an already-grouped stream
	AggregateGroup {
		keys: Vec<VarId>,
		aggregations: Vec<AggregateSpec>,
	},
	/// Push a record to the result channel
	Emit {
		columns: Vec<VarId>,
	},
	/// Insert a full record through the index target
	WriteFull {
		table: String,
		kind: WriteFullKind,
		columns: Vec<Expression>,
	},
	/// Update or delete through the index target
	WritePartial {
		table: String,
		kind: WritePartialKind,
		/// The key of the target row, read from block variables
		key: Vec<VarId>,
		/// Column assignments applied on update
		assignments: Vec<(usize, Expression)>,
	},
}

impl Operator {
	/// Whether this operator drives a block: it produces records on
	/// its own rather than consuming the upstream operator's output.
	pub fn is_driver(&self) -> bool {
		matches!(
			self,
			Self::Scan {
				..
			} | Self::Find {
				..
			} | Self::TakeFlat {
				..
			} | Self::TakeGroup {
				..
			} | Self::TakeCogroup {
				..
			}
		)
	}

	/// The variables this operator defines.
	pub fn defined_variables(&self) -> Vec<VarId> {
		match self {
			Self::Scan {
				columns,
				..
			}
			| Self::Find {
				columns,
				..
			}
			| Self::JoinFind {
				columns,
				..
			}
			| Self::JoinScan {
				columns,
				..
			}
			| Self::TakeFlat {
				columns,
				..
			}
			| Self::TakeGroup {
				columns,
				..
			} => columns.clone(),
			Self::TakeCogroup {
				columns,
				..
			} => columns.iter().flatten().copied().collect(),
			Self::Project {
				assignments,
			} => assignments.iter().map(|(var, _)| *var).collect(),
			Self::AggregateGroup {
				aggregations,
				..
			} => aggregations.iter().map(|agg| agg.output).collect(),
			_ => Vec::new(),
		}
	}

	/// The variables this operator uses.
	pub fn used_variables(&self) -> Vec<VarId> {
		let mut out = Vec::new();
		match self {
			Self::Find {
				key,
				..
			}
			| Self::JoinFind {
				key,
				..
			} => {
				for expr in key {
					expr.variables(&mut out);
				}
			}
			Self::JoinScan {
				prefix,
				..
			} => {
				for expr in prefix {
					expr.variables(&mut out);
				}
			}
			Self::Scan {
				bounds,
				..
			} => {
				for expr in bounds.lower.iter().chain(bounds.upper.iter()) {
					expr.variables(&mut out);
				}
			}
			Self::Filter {
				predicate,
			} => predicate.variables(&mut out),
			Self::Project {
				assignments,
			} => {
				for (_, expr) in assignments {
					expr.variables(&mut out);
				}
			}
			Self::Offer {
				columns,
				..
			}
			| Self::Emit {
				columns,
			} => out.extend_from_slice(columns),
			Self::AggregateGroup {
				keys,
				aggregations,
			} => {
				out.extend_from_slice(keys);
				out.extend(aggregations.iter().filter_map(|agg| agg.input));
			}
			Self::WriteFull {
				columns,
				..
			} => {
				for expr in columns {
					expr.variables(&mut out);
				}
			}
			Self::WritePartial {
				key,
				assignments,
				..
			} => {
				out.extend_from_slice(key);
				for (_, expr) in assignments {
					expr.variables(&mut out);
				}
			}
			_ => {}
		}
		out
	}
}
