//! Compiled statement plans.
//!
//! A statement arrives as a graph of *steps*: process steps carrying a
//! pipeline of operator descriptors, and exchange steps describing the
//! typed flow between them. Plans are pure data; the executor
//! instantiates flows, exchanges and tasks from them. SQL parsing and
//! optimization live outside this crate, so plans are constructed
//! programmatically.

mod expr;
mod graph;
mod operator;
mod statement;

pub use expr::{CompareOp, Expression, VarId};
pub use graph::{ExchangeSpec, Step, StepGraph, StepId, StepKind};
pub use operator::{
	AggregateSpec, Operator, ScanBounds, WriteFullKind, WritePartialKind,
};
pub use statement::{ExecutableStatement, PreparedStatementCache, StatementKind, WriteValues};
