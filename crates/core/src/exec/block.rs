//! Block structure and variable liveness.
//!
//! A block is a contiguous region of a process step's operator
//! pipeline sharing one variable-table scope. A new block begins at
//! every driver operator. A variable is live in a block iff it is
//! defined in or before the block and used in or after it; everything
//! else is dropped at block exit, which bounds the width of the
//! block's variable record.

use std::ops::Range;
use std::sync::Arc;

use crate::err::Error;
use crate::plan::{Operator, VarId};
use crate::record::RecordMeta;

/// One block of a process pipeline.
#[derive(Debug)]
pub struct Block {
	/// The operator indexes forming the block
	pub operators: Range<usize>,
	/// The live variables, in declared order
	pub live: Vec<VarId>,
	/// The record shape of the live variables
	pub meta: Arc<RecordMeta>,
	/// Declared variable id to live slot index
	pub mapping: Vec<Option<usize>>,
}

/// Split a pipeline into blocks and compute each block's live
/// variable set against the declared variable shape.
pub fn analyze(operators: &[Operator], declared: &RecordMeta) -> Result<Vec<Block>, Error> {
	if operators.is_empty() {
		return Ok(Vec::new());
	}
	// Block boundaries: a driver opens a new block
	let mut starts = vec![0usize];
	for (index, operator) in operators.iter().enumerate().skip(1) {
		if operator.is_driver() {
			starts.push(index);
		}
	}
	starts.push(operators.len());
	// Per-operator defs and uses
	let defs: Vec<Vec<VarId>> = operators.iter().map(|op| op.defined_variables()).collect();
	let uses: Vec<Vec<VarId>> = operators.iter().map(|op| op.used_variables()).collect();
	let mut blocks = Vec::with_capacity(starts.len() - 1);
	for window in starts.windows(2) {
		let range = window[0]..window[1];
		let mut live = Vec::new();
		for var in 0..declared.field_count() {
			let defined = defs[..range.end].iter().any(|d| d.contains(&var));
			let used = uses[range.start..].iter().any(|u| u.contains(&var));
			if defined && used {
				live.push(var);
			}
		}
		let mut mapping = vec![None; declared.field_count()];
		let mut fields = Vec::with_capacity(live.len());
		let mut nullable = Vec::with_capacity(live.len());
		for (slot, &var) in live.iter().enumerate() {
			if var >= declared.field_count() {
				return Err(Error::Unreachable(format!(
					"operator references undeclared variable v{var}"
				)));
			}
			mapping[var] = Some(slot);
			fields.push(*declared.field_type(var));
			nullable.push(declared.nullable(var));
		}
		blocks.push(Block {
			operators: range,
			live,
			meta: Arc::new(RecordMeta::new(fields, nullable)),
			mapping,
		});
	}
	Ok(blocks)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::plan::{Expression, ScanBounds};
	use crate::record::FieldType;

	fn declared(count: usize) -> RecordMeta {
		RecordMeta::new(vec![FieldType::Int4; count], vec![true; count])
	}

	#[test]
	fn unused_definitions_are_dead() {
		// Scan defines v0 and v1; only v0 is ever used
		let operators = vec![
			Operator::Scan {
				table: "t".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0, 1],
			},
			Operator::Emit {
				columns: vec![0],
			},
		];
		let blocks = analyze(&operators, &declared(2)).unwrap();
		assert_eq!(blocks.len(), 1);
		assert_eq!(blocks[0].live, vec![0]);
		assert_eq!(blocks[0].meta.field_count(), 1);
		assert_eq!(blocks[0].mapping, vec![Some(0), None]);
	}

	#[test]
	fn projected_variables_stay_live_until_their_last_use() {
		let operators = vec![
			Operator::Scan {
				table: "t".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0],
			},
			Operator::Project {
				assignments: vec![(1, Expression::var(0))],
			},
			Operator::Emit {
				columns: vec![1],
			},
		];
		let blocks = analyze(&operators, &declared(2)).unwrap();
		assert_eq!(blocks[0].live, vec![0, 1]);
	}

	#[test]
	fn each_driver_opens_a_block() {
		use crate::plan::StepId;
		let operators = vec![
			Operator::TakeFlat {
				exchange: StepId(0),
				columns: vec![0],
			},
			Operator::Filter {
				predicate: Expression::IsNull(Box::new(Expression::var(0))),
			},
			Operator::TakeFlat {
				exchange: StepId(1),
				columns: vec![1],
			},
			Operator::Emit {
				columns: vec![1],
			},
		];
		let blocks = analyze(&operators, &declared(2)).unwrap();
		assert_eq!(blocks.len(), 2);
		assert_eq!(blocks[0].operators, 0..2);
		assert_eq!(blocks[1].operators, 2..4);
		// v0 dies at the first block's exit
		assert_eq!(blocks[1].live, vec![1]);
	}
}
