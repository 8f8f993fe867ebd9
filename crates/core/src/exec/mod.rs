//! Operator execution: variable tables, block liveness, expression
//! evaluation, index-target access and the flow processor that drives
//! a process step's operator pipeline as cooperative tasks.

pub mod block;
pub mod context;
pub mod eval;
pub mod processor;
pub mod table;
pub mod variables;

pub use block::{analyze, Block};
pub use context::ProcessContext;
pub use eval::{evaluate, evaluate_checked, EvalContext};
pub use processor::{Downstream, Processor, SharedScan};
pub use table::TableAccess;
pub use variables::VariableTable;
