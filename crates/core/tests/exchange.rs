//! Exchange kinds and operator drivers beyond the basic scan path.

use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::catalog::{self, ColumnDef, IndexDef, TableDef};
use trellis_core::dbs::{DataChannel, Executor, Options, ResultStoreChannel};
use trellis_core::key::Direction;
use trellis_core::kvs::{CommitLevel, Datastore, Transaction, TransactionOptions};
use trellis_core::plan::{
	ExchangeSpec, ExecutableStatement, Expression, Operator, ScanBounds, StepGraph, WriteFullKind,
	WritePartialKind,
};
use trellis_core::record::{FieldType, RecordMeta, ResultStore};
use trellis_core::sched::{Scheduler, SchedulerPolicy};
use trellis_core::val::Value;

fn engine() -> Executor {
	let ds = Datastore::new_memory().unwrap();
	let scheduler = Scheduler::with_threads(SchedulerPolicy::Parallel, 4);
	Executor::new(ds, scheduler)
}

fn meta(fields: Vec<FieldType>) -> Arc<RecordMeta> {
	let nullable = vec![true; fields.len()];
	Arc::new(RecordMeta::new(fields, nullable))
}

fn create_table(executor: &Executor, def: &TableDef) {
	let tx = executor.datastore().transaction(TransactionOptions::occ()).unwrap();
	catalog::create_table(executor.datastore(), &tx, def).unwrap();
	tx.commit(CommitLevel::Available).unwrap().wait().unwrap();
}

fn seed(executor: &Executor, tx: &Arc<Transaction>, table: &str, rows: Vec<Vec<Value>>) {
	let statement = ExecutableStatement::insert_values(
		table,
		WriteFullKind::Insert,
		rows.into_iter()
			.map(|row| row.into_iter().map(Expression::literal).collect())
			.collect(),
	);
	let response = executor
		.execute(&statement, tx.clone(), Arc::new(HashMap::new()), None, &Options::default())
		.unwrap()
		.wait();
	assert!(response.is_ok(), "seed failed: {:?}", response.error);
}

fn run_query(
	executor: &Executor,
	tx: &Arc<Transaction>,
	statement: &ExecutableStatement,
	store: &Arc<ResultStore>,
) -> Vec<Vec<Value>> {
	let channel: Arc<dyn DataChannel> = Arc::new(ResultStoreChannel::new(store.clone()));
	let response = executor
		.execute(statement, tx.clone(), Arc::new(HashMap::new()), Some(channel), &Options::default())
		.unwrap()
		.wait();
	assert!(response.is_ok(), "query failed: {:?}", response.error);
	let mut out = Vec::new();
	for p in 0..store.partition_count() {
		let partition = store.partition(p).unwrap();
		for record in partition.iter() {
			out.push(trellis_core::record::unpack(partition.meta(), record));
		}
	}
	out
}

#[test]
fn cogroup_joins_co_partitioned_inputs_by_key() {
	let executor = engine();
	for name in ["a", "b"] {
		create_table(
			&executor,
			&TableDef::new(
				name,
				vec![
					ColumnDef::new("k", FieldType::Int4, false),
					ColumnDef::new("v", FieldType::Int4, true),
				],
				vec![0],
			),
		);
	}
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	seed(&executor, &tx, "a", vec![
		vec![Value::Int4(1), Value::Int4(10)],
		vec![Value::Int4(2), Value::Int4(20)],
	]);
	seed(&executor, &tx, "b", vec![
		vec![Value::Int4(2), Value::Int4(200)],
		vec![Value::Int4(3), Value::Int4(300)],
	]);
	// Shuffle both sides on k, co-group, and emit the matches
	let side_meta = meta(vec![FieldType::Int4, FieldType::Int4]);
	let mut graph = StepGraph::new();
	let left = graph.add_exchange(
		ExchangeSpec::Group {
			key_fields: vec![0],
			directions: vec![Direction::Ascending],
			partitions: None,
		},
		side_meta.clone(),
	);
	let right = graph.add_exchange(
		ExchangeSpec::Group {
			key_fields: vec![0],
			directions: vec![Direction::Ascending],
			partitions: None,
		},
		side_meta.clone(),
	);
	let scan_a = graph.add_process(
		vec![
			Operator::Scan {
				table: "a".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0, 1],
			},
			Operator::Offer {
				exchange: left,
				columns: vec![0, 1],
			},
		],
		side_meta.clone(),
	);
	let scan_b = graph.add_process(
		vec![
			Operator::Scan {
				table: "b".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0, 1],
			},
			Operator::Offer {
				exchange: right,
				columns: vec![0, 1],
			},
		],
		side_meta.clone(),
	);
	let join = graph.add_process(
		vec![
			Operator::TakeCogroup {
				exchanges: vec![left, right],
				columns: vec![vec![0, 1], vec![2, 3]],
			},
			Operator::Emit {
				columns: vec![0, 1, 3],
			},
		],
		meta(vec![FieldType::Int4, FieldType::Int4, FieldType::Int4, FieldType::Int4]),
	);
	graph.connect(scan_a, left);
	graph.connect(scan_b, right);
	graph.connect(left, join);
	graph.connect(right, join);
	let out_meta = meta(vec![FieldType::Int4, FieldType::Int4, FieldType::Int4]);
	let query = ExecutableStatement::query(graph, out_meta.clone());
	let store = Arc::new(ResultStore::new(out_meta));
	let rows = run_query(&executor, &tx, &query, &store);
	// Only the key present on both sides survives the inner co-group
	assert_eq!(rows, vec![vec![Value::Int4(2), Value::Int4(20), Value::Int4(200)]]);
	tx.abort().unwrap();
	executor.scheduler().shutdown();
}

#[test]
fn broadcast_replays_the_sequence_to_its_consumer() {
	let executor = engine();
	create_table(
		&executor,
		&TableDef::new("t", vec![ColumnDef::new("c0", FieldType::Int4, false)], vec![0]),
	);
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	seed(&executor, &tx, "t", (1..=4).map(|i| vec![Value::Int4(i)]).collect());
	let row = meta(vec![FieldType::Int4]);
	let mut graph = StepGraph::new();
	let broadcast = graph.add_exchange(ExchangeSpec::Broadcast, row.clone());
	let scan = graph.add_process(
		vec![
			Operator::Scan {
				table: "t".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0],
			},
			Operator::Offer {
				exchange: broadcast,
				columns: vec![0],
			},
		],
		row.clone(),
	);
	let emit = graph.add_process(
		vec![
			Operator::TakeFlat {
				exchange: broadcast,
				columns: vec![0],
			},
			Operator::Emit {
				columns: vec![0],
			},
		],
		row.clone(),
	);
	graph.connect(scan, broadcast);
	graph.connect(broadcast, emit);
	let query = ExecutableStatement::query(graph, row);
	let store = Arc::new(ResultStore::new(meta(vec![FieldType::Int4])));
	let rows = run_query(&executor, &tx, &query, &store);
	assert_eq!(rows.len(), 4);
	tx.abort().unwrap();
	executor.scheduler().shutdown();
}

#[test]
fn find_driver_looks_up_one_row() {
	let executor = engine();
	create_table(
		&executor,
		&TableDef::new(
			"t",
			vec![
				ColumnDef::new("c0", FieldType::Int4, false),
				ColumnDef::new("c1", FieldType::Int4, true),
			],
			vec![0],
		),
	);
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	seed(&executor, &tx, "t", vec![
		vec![Value::Int4(1), Value::Int4(11)],
		vec![Value::Int4(2), Value::Int4(22)],
	]);
	let row = meta(vec![FieldType::Int4, FieldType::Int4]);
	let mut graph = StepGraph::new();
	graph.add_process(
		vec![
			Operator::Find {
				table: "t".to_owned(),
				index: None,
				key: vec![Expression::literal(Value::Int4(2))],
				columns: vec![0, 1],
			},
			Operator::Emit {
				columns: vec![0, 1],
			},
		],
		row.clone(),
	);
	let query = ExecutableStatement::query(graph, row);
	let store = Arc::new(ResultStore::new(meta(vec![FieldType::Int4, FieldType::Int4])));
	let rows = run_query(&executor, &tx, &query, &store);
	assert_eq!(rows, vec![vec![Value::Int4(2), Value::Int4(22)]]);
	tx.abort().unwrap();
	executor.scheduler().shutdown();
}

#[test]
fn secondary_index_scan_reads_through_the_index() {
	let executor = engine();
	create_table(
		&executor,
		&TableDef::new(
			"t",
			vec![
				ColumnDef::new("c0", FieldType::Int4, false),
				ColumnDef::new("x", FieldType::Int4, true),
			],
			vec![0],
		)
		.with_index(IndexDef {
			name: "by_x".to_owned(),
			columns: vec![(1, Direction::Ascending)],
			unique: false,
		}),
	);
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	seed(&executor, &tx, "t", vec![
		vec![Value::Int4(1), Value::Int4(10)],
		vec![Value::Int4(2), Value::Int4(20)],
		vec![Value::Int4(3), Value::Int4(10)],
	]);
	let row = meta(vec![FieldType::Int4, FieldType::Int4]);
	let mut graph = StepGraph::new();
	graph.add_process(
		vec![
			Operator::Scan {
				table: "t".to_owned(),
				index: Some("by_x".to_owned()),
				bounds: ScanBounds {
					lower: vec![Expression::literal(Value::Int4(10))],
					lower_inclusive: true,
					upper: Vec::new(),
					upper_inclusive: true,
				},
				columns: vec![0, 1],
			},
			Operator::Emit {
				columns: vec![0],
			},
		],
		row,
	);
	let query = ExecutableStatement::query(graph, meta(vec![FieldType::Int4]));
	let store = Arc::new(ResultStore::new(meta(vec![FieldType::Int4])));
	let rows = run_query(&executor, &tx, &query, &store);
	// Index order for x = 10 is primary-key order
	assert_eq!(rows, vec![vec![Value::Int4(1)], vec![Value::Int4(3)]]);
	tx.abort().unwrap();
	executor.scheduler().shutdown();
}

#[test]
fn delete_statement_removes_matching_rows() {
	let executor = engine();
	create_table(
		&executor,
		&TableDef::new("t", vec![ColumnDef::new("c0", FieldType::Int4, false)], vec![0]),
	);
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	seed(&executor, &tx, "t", (1..=5).map(|i| vec![Value::Int4(i)]).collect());
	// DELETE FROM t WHERE c0 >= 3
	let row = meta(vec![FieldType::Int4]);
	let mut graph = StepGraph::new();
	graph.add_process(
		vec![
			Operator::Scan {
				table: "t".to_owned(),
				index: None,
				bounds: ScanBounds {
					lower: vec![Expression::literal(Value::Int4(3))],
					lower_inclusive: true,
					upper: Vec::new(),
					upper_inclusive: true,
				},
				columns: vec![0],
			},
			Operator::WritePartial {
				table: "t".to_owned(),
				kind: WritePartialKind::Delete,
				key: vec![0],
				assignments: Vec::new(),
			},
		],
		row.clone(),
	);
	let delete = ExecutableStatement::write(graph);
	let response = executor
		.execute(&delete, tx.clone(), Arc::new(HashMap::new()), None, &Options::default())
		.unwrap()
		.wait();
	assert!(response.is_ok(), "delete failed: {:?}", response.error);
	assert_eq!(response.rows_affected, 3);
	// Only the rows below the bound remain
	let mut graph = StepGraph::new();
	graph.add_process(
		vec![
			Operator::Scan {
				table: "t".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0],
			},
			Operator::Emit {
				columns: vec![0],
			},
		],
		row.clone(),
	);
	let select = ExecutableStatement::query(graph, row);
	let store = Arc::new(ResultStore::new(meta(vec![FieldType::Int4])));
	let rows = run_query(&executor, &tx, &select, &store);
	assert_eq!(rows, vec![vec![Value::Int4(1)], vec![Value::Int4(2)]]);
	tx.abort().unwrap();
	executor.scheduler().shutdown();
}
