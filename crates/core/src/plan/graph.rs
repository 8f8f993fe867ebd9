use std::sync::Arc;

use crate::key::Direction;
use crate::plan::operator::{AggregateSpec, Operator};
use crate::record::RecordMeta;

/// A stable step identifier inside one graph. Steps reference each
/// other by id, never by pointer, so the graph owns no cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId(pub usize);

impl std::fmt::Display for StepId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "step-{}", self.0)
	}
}

/// The specification of an exchange step: the typed bridge between
/// two process steps.
#[derive(Debug, Clone)]
pub enum ExchangeSpec {
	/// One-to-one pass-through in insertion order
	Forward,
	/// Partition by key, sort within partitions, read grouped
	Group {
		/// Key fields inside the exchange record
		key_fields: Vec<usize>,
		/// Sort direction per key field
		directions: Vec<Direction>,
		/// Target partition count; `None` uses the configured default
		partitions: Option<usize>,
	},
	/// Write once, read everywhere
	Broadcast,
	/// Fold records as they arrive; distributive aggregates only
	Aggregate {
		key_fields: Vec<usize>,
		aggregations: Vec<AggregateSpec>,
		partitions: Option<usize>,
	},
	/// Terminal sink writing records to the request data channel
	Deliver,
}

/// What a step is: a process pipeline or an exchange.
#[derive(Debug, Clone)]
pub enum StepKind {
	Process {
		operators: Vec<Operator>,
		/// Declared variable shape of the step's blocks: field types
		/// and nullability per variable slot
		variables: Arc<RecordMeta>,
	},
	Exchange {
		spec: ExchangeSpec,
		/// The record shape crossing this exchange
		meta: Arc<RecordMeta>,
	},
}

/// A node of the execution graph.
#[derive(Debug, Clone)]
pub struct Step {
	pub id: StepId,
	pub kind: StepKind,
	/// Upstream steps in port order
	pub inputs: Vec<StepId>,
	/// Downstream steps in port order
	pub outputs: Vec<StepId>,
}

/// A directed acyclic graph of steps. The graph owns every step;
/// cross-references are resolved through the id table on access.
#[derive(Debug, Clone, Default)]
pub struct StepGraph {
	steps: Vec<Step>,
}

impl StepGraph {
	/// An empty graph.
	pub fn new() -> Self {
		Self::default()
	}

	/// Add a process step with the given operator pipeline and
	/// declared variable shape.
	pub fn add_process(&mut self, operators: Vec<Operator>, variables: Arc<RecordMeta>) -> StepId {
		self.push(StepKind::Process {
			operators,
			variables,
		})
	}

	/// Add an exchange step.
	pub fn add_exchange(&mut self, spec: ExchangeSpec, meta: Arc<RecordMeta>) -> StepId {
		self.push(StepKind::Exchange {
			spec,
			meta,
		})
	}

	fn push(&mut self, kind: StepKind) -> StepId {
		let id = StepId(self.steps.len());
		self.steps.push(Step {
			id,
			kind,
			inputs: Vec::new(),
			outputs: Vec::new(),
		});
		id
	}

	/// Connect an upstream step's output port to a downstream step's
	/// input port.
	pub fn connect(&mut self, upstream: StepId, downstream: StepId) {
		self.steps[upstream.0].outputs.push(downstream);
		self.steps[downstream.0].inputs.push(upstream);
	}

	/// The step with the given id.
	pub fn step(&self, id: StepId) -> &Step {
		&self.steps[id.0]
	}

	/// All steps in id order.
	pub fn steps(&self) -> &[Step] {
		&self.steps
	}

	/// The number of steps.
	pub fn len(&self) -> usize {
		self.steps.len()
	}

	/// Whether the graph has no steps.
	pub fn is_empty(&self) -> bool {
		self.steps.is_empty()
	}

	/// Steps in a topological order: every exchange runs after its
	/// producers, every process after its input exchanges.
	pub fn topological(&self) -> Vec<StepId> {
		let mut indegree: Vec<usize> = self.steps.iter().map(|s| s.inputs.len()).collect();
		let mut ready: Vec<StepId> = self
			.steps
			.iter()
			.filter(|s| s.inputs.is_empty())
			.map(|s| s.id)
			.collect();
		let mut out = Vec::with_capacity(self.steps.len());
		while let Some(id) = ready.pop() {
			out.push(id);
			for next in &self.steps[id.0].outputs {
				indegree[next.0] -= 1;
				if indegree[next.0] == 0 {
					ready.push(*next);
				}
			}
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::record::FieldType;

	fn meta() -> Arc<RecordMeta> {
		Arc::new(RecordMeta::new(vec![FieldType::Int4], vec![false]))
	}

	#[test]
	fn topological_order_respects_edges() {
		let mut graph = StepGraph::new();
		let scan = graph.add_process(Vec::new(), meta());
		let exchange = graph.add_exchange(ExchangeSpec::Forward, meta());
		let emit = graph.add_process(Vec::new(), meta());
		graph.connect(scan, exchange);
		graph.connect(exchange, emit);
		let order = graph.topological();
		let position = |id: StepId| order.iter().position(|s| *s == id).unwrap();
		assert!(position(scan) < position(exchange));
		assert!(position(exchange) < position(emit));
		assert_eq!(order.len(), 3);
	}
}
