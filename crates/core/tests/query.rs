//! End-to-end statement execution over the in-memory datastore.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use trellis_core::catalog::{self, ColumnDef, TableDef};
use trellis_core::dbs::{DataChannel, Executor, Options, ResultStoreChannel};
use trellis_core::key::Direction;
use trellis_core::kvs::{CommitLevel, Datastore, Transaction, TransactionOptions, TxState};
use trellis_core::plan::{
	AggregateSpec, CompareOp, ExchangeSpec, ExecutableStatement, Expression, Operator, ScanBounds,
	StepGraph, WriteFullKind, WritePartialKind,
};
use trellis_core::record::{FieldType, RecordMeta, ResultStore};
use trellis_core::rpc::StatusCode;
use trellis_core::sched::{Scheduler, SchedulerPolicy};
use trellis_core::val::{Text, Value};

fn engine() -> Executor {
	let ds = Datastore::new_memory().unwrap();
	let scheduler = Scheduler::with_threads(SchedulerPolicy::Parallel, 4);
	Executor::new(ds, scheduler)
}

fn create_table(executor: &Executor, def: &TableDef) {
	let tx = executor.datastore().transaction(TransactionOptions::occ()).unwrap();
	catalog::create_table(executor.datastore(), &tx, def).unwrap();
	tx.commit(CommitLevel::Available).unwrap().wait().unwrap();
}

fn meta(fields: Vec<FieldType>) -> Arc<RecordMeta> {
	let nullable = vec![true; fields.len()];
	Arc::new(RecordMeta::new(fields, nullable))
}

fn run(
	executor: &Executor,
	statement: &ExecutableStatement,
	tx: &Arc<Transaction>,
	channel: Option<Arc<dyn DataChannel>>,
	options: &Options,
) -> trellis_core::dbs::Response {
	executor
		.execute(statement, tx.clone(), Arc::new(HashMap::new()), channel, options)
		.unwrap()
		.wait()
}

/// Collect every delivered row across partitions, preserving each
/// partition's insertion order.
fn collect(store: &ResultStore) -> Vec<Vec<Value>> {
	let mut out = Vec::new();
	for p in 0..store.partition_count() {
		let partition = store.partition(p).unwrap();
		for record in partition.iter() {
			out.push(trellis_core::record::unpack(partition.meta(), record));
		}
	}
	out
}

/// SELECT c0 FROM t ORDER BY c0 as a scan, shuffle and emit graph.
fn ordered_select(table: &str) -> ExecutableStatement {
	let row = meta(vec![FieldType::Int4]);
	let mut graph = StepGraph::new();
	let shuffle = graph.add_exchange(
		ExchangeSpec::Group {
			key_fields: vec![0],
			directions: vec![Direction::Ascending],
			partitions: None,
		},
		row.clone(),
	);
	let scan = graph.add_process(
		vec![
			Operator::Scan {
				table: table.to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0],
			},
			Operator::Offer {
				exchange: shuffle,
				columns: vec![0],
			},
		],
		row.clone(),
	);
	let emit = graph.add_process(
		vec![
			Operator::TakeGroup {
				exchange: shuffle,
				columns: vec![0],
			},
			Operator::Emit {
				columns: vec![0],
			},
		],
		row.clone(),
	);
	graph.connect(scan, shuffle);
	graph.connect(shuffle, emit);
	ExecutableStatement::query(graph, row)
}

#[test]
fn insert_then_select_returns_rows_in_order() {
	let executor = engine();
	create_table(
		&executor,
		&TableDef::new("t", vec![ColumnDef::new("c0", FieldType::Int4, false)], vec![0]),
	);
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	// INSERT INTO t VALUES (100), (200), (300), deliberately unordered
	let insert = ExecutableStatement::insert_values(
		"t",
		WriteFullKind::Insert,
		vec![
			vec![Expression::literal(Value::Int4(300))],
			vec![Expression::literal(Value::Int4(100))],
			vec![Expression::literal(Value::Int4(200))],
		],
	);
	let response = run(&executor, &insert, &tx, None, &Options::default());
	assert!(response.is_ok(), "insert failed: {:?}", response.error);
	assert_eq!(response.rows_affected, 3);
	// SELECT * FROM t ORDER BY c0 within the same transaction
	let store = Arc::new(ResultStore::new(meta(vec![FieldType::Int4])));
	let channel: Arc<dyn DataChannel> = Arc::new(ResultStoreChannel::new(store.clone()));
	let response = run(&executor, &ordered_select("t"), &tx, Some(channel), &Options::default());
	assert!(response.is_ok(), "select failed: {:?}", response.error);
	let rows = collect(&store);
	assert_eq!(
		rows,
		vec![vec![Value::Int4(100)], vec![Value::Int4(200)], vec![Value::Int4(300)]]
	);
	tx.commit(CommitLevel::Available).unwrap().wait().unwrap();
	executor.scheduler().shutdown();
}

#[test]
fn expression_failure_aborts_the_transaction() {
	let executor = engine();
	create_table(
		&executor,
		&TableDef::new("t", vec![ColumnDef::new("c0", FieldType::decimal(5, 3), false)], vec![0]),
	);
	// Seed the row holding 10
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	let ten = Decimal::from(10);
	let insert = ExecutableStatement::insert_values(
		"t",
		WriteFullKind::Insert,
		vec![vec![Expression::literal(Value::Decimal(ten))]],
	);
	assert!(run(&executor, &insert, &tx, None, &Options::default()).is_ok());
	tx.commit(CommitLevel::Available).unwrap().wait().unwrap();
	// UPDATE t SET c0 = c0 / 3 loses precision at DECIMAL(5,3)
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	let variables = meta(vec![FieldType::decimal(5, 3)]);
	let mut graph = StepGraph::new();
	graph.add_process(
		vec![
			Operator::Scan {
				table: "t".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0],
			},
			Operator::WritePartial {
				table: "t".to_owned(),
				kind: WritePartialKind::Update,
				key: vec![0],
				assignments: vec![(
					0,
					Expression::Cast {
						target: trellis_core::val::CastTarget::Decimal {
							precision: Some(5),
							scale: Some(3),
						},
						input: Box::new(Expression::arith(
							trellis_core::val::arith::ArithOp::Divide,
							Expression::var(0),
							Expression::literal(Value::Int4(3)),
						)),
					},
				)],
			},
		],
		variables,
	);
	let update = ExecutableStatement::write(graph);
	let response = run(&executor, &update, &tx, None, &Options::default());
	assert_eq!(response.status, StatusCode::ExpressionEvaluationFailure);
	// The transaction is aborted; a subsequent commit is rejected
	assert_eq!(tx.context().state().get(), TxState::Aborted);
	assert!(matches!(
		tx.commit(CommitLevel::Available).unwrap_err(),
		trellis_core::err::Error::InactiveTransaction
	));
	// After rollback the stored value is still 10
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	let store = Arc::new(ResultStore::new(meta(vec![FieldType::decimal(5, 3)])));
	let channel: Arc<dyn DataChannel> = Arc::new(ResultStoreChannel::new(store.clone()));
	let select = {
		let row = meta(vec![FieldType::decimal(5, 3)]);
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
		ExecutableStatement::query(graph, row)
	};
	assert!(run(&executor, &select, &tx, Some(channel), &Options::default()).is_ok());
	assert_eq!(collect(&store), vec![vec![Value::Decimal(ten)]]);
	tx.abort().unwrap();
	executor.scheduler().shutdown();
}

#[test]
fn key_update_into_existing_key_rolls_back() {
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
	let insert = ExecutableStatement::insert_values(
		"t",
		WriteFullKind::Insert,
		vec![
			vec![Expression::literal(Value::Int4(0)), Expression::literal(Value::Int4(0))],
			vec![Expression::literal(Value::Int4(1)), Expression::literal(Value::Int4(1))],
		],
	);
	assert!(run(&executor, &insert, &tx, None, &Options::default()).is_ok());
	tx.commit(CommitLevel::Available).unwrap().wait().unwrap();
	// UPDATE t SET c0 = c0 + 1 moves key 0 onto the existing key 1
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	let variables = meta(vec![FieldType::Int4, FieldType::Int4]);
	let mut graph = StepGraph::new();
	graph.add_process(
		vec![
			Operator::Scan {
				table: "t".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0, 1],
			},
			Operator::WritePartial {
				table: "t".to_owned(),
				kind: WritePartialKind::Update,
				key: vec![0],
				assignments: vec![(
					0,
					Expression::arith(
						trellis_core::val::arith::ArithOp::Add,
						Expression::var(0),
						Expression::literal(Value::Int4(1)),
					),
				)],
			},
		],
		variables,
	);
	let update = ExecutableStatement::write(graph);
	let response = run(&executor, &update, &tx, None, &Options::default());
	assert_eq!(response.status, StatusCode::IntegrityConstraintViolation);
	assert_eq!(tx.context().state().get(), TxState::Aborted);
	// The rows are unchanged after the rollback
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	let store = Arc::new(ResultStore::new(meta(vec![FieldType::Int4])));
	let channel: Arc<dyn DataChannel> = Arc::new(ResultStoreChannel::new(store.clone()));
	assert!(run(&executor, &ordered_select("t"), &tx, Some(channel), &Options::default()).is_ok());
	assert_eq!(collect(&store), vec![vec![Value::Int4(0)], vec![Value::Int4(1)]]);
	tx.abort().unwrap();
	executor.scheduler().shutdown();
}

#[test]
fn count_distinct_skips_nulls_and_duplicates() {
	let executor = engine();
	create_table(
		&executor,
		&TableDef::new(
			"u",
			vec![
				ColumnDef::new("id", FieldType::Int4, false),
				ColumnDef::new("c0", FieldType::Int4, true),
			],
			vec![0],
		),
	);
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	let rows = [(1, Some(1)), (2, Some(2)), (3, Some(1)), (4, None)];
	let insert = ExecutableStatement::insert_values(
		"u",
		WriteFullKind::Insert,
		rows.iter()
			.map(|&(id, c0)| {
				vec![
					Expression::literal(Value::Int4(id)),
					Expression::literal(c0.map(Value::Int4).unwrap_or(Value::Empty)),
				]
			})
			.collect(),
	);
	assert!(run(&executor, &insert, &tx, None, &Options::default()).is_ok());
	// COUNT(DISTINCT c0) is holistic, so it folds after a plain group
	// exchange rather than an incremental aggregate
	let exchange_meta = meta(vec![FieldType::Int4]);
	let variables = meta(vec![FieldType::Int4, FieldType::Int8]);
	let mut graph = StepGraph::new();
	let shuffle = graph.add_exchange(
		ExchangeSpec::Group {
			key_fields: vec![],
			directions: vec![],
			partitions: None,
		},
		exchange_meta.clone(),
	);
	let scan = graph.add_process(
		vec![
			Operator::Scan {
				table: "u".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0, 1],
			},
			Operator::Offer {
				exchange: shuffle,
				columns: vec![1],
			},
		],
		meta(vec![FieldType::Int4, FieldType::Int4]),
	);
	let fold = graph.add_process(
		vec![
			Operator::TakeGroup {
				exchange: shuffle,
				columns: vec![0],
			},
			Operator::AggregateGroup {
				keys: vec![],
				aggregations: vec![AggregateSpec {
					function: "count".to_owned(),
					input: Some(0),
					output: 1,
					distinct: true,
				}],
			},
			Operator::Emit {
				columns: vec![1],
			},
		],
		variables,
	);
	graph.connect(scan, shuffle);
	graph.connect(shuffle, fold);
	let store = Arc::new(ResultStore::new(meta(vec![FieldType::Int8])));
	let channel: Arc<dyn DataChannel> = Arc::new(ResultStoreChannel::new(store.clone()));
	let query = ExecutableStatement::query(graph, meta(vec![FieldType::Int8]));
	let response = run(&executor, &query, &tx, Some(channel), &Options::default());
	assert!(response.is_ok(), "query failed: {:?}", response.error);
	assert_eq!(collect(&store), vec![vec![Value::Int8(2)]]);
	tx.abort().unwrap();
	executor.scheduler().shutdown();
}

#[test]
fn max_over_text_ignores_nulls() {
	let executor = engine();
	create_table(
		&executor,
		&TableDef::new(
			"v",
			vec![
				ColumnDef::new("id", FieldType::Int4, false),
				ColumnDef::new("s", FieldType::varchar(None), true),
			],
			vec![0],
		),
	);
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	let rows: Vec<Vec<Expression>> = [
		(1, Some("AAA")),
		(2, Some("BBB")),
		(3, Some("CCC")),
		(4, None),
	]
	.iter()
	.map(|&(id, s)| {
		vec![
			Expression::literal(Value::Int4(id)),
			Expression::literal(s.map(|s| Value::Text(Text::inline(s))).unwrap_or(Value::Empty)),
		]
	})
	.collect();
	let insert = ExecutableStatement::insert_values("v", WriteFullKind::Insert, rows);
	assert!(run(&executor, &insert, &tx, None, &Options::default()).is_ok());
	// MAX(s) folds incrementally inside the aggregate exchange
	let exchange_meta = meta(vec![FieldType::varchar(None), FieldType::varchar(None)]);
	let variables = meta(vec![FieldType::varchar(None), FieldType::varchar(None)]);
	let mut graph = StepGraph::new();
	let aggregate = graph.add_exchange(
		ExchangeSpec::Aggregate {
			key_fields: vec![],
			aggregations: vec![AggregateSpec {
				function: "max".to_owned(),
				input: Some(0),
				output: 1,
				distinct: false,
			}],
			partitions: Some(2),
		},
		exchange_meta,
	);
	let scan = graph.add_process(
		vec![
			Operator::Scan {
				table: "v".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0, 1],
			},
			Operator::Offer {
				exchange: aggregate,
				columns: vec![1, 1],
			},
		],
		meta(vec![FieldType::Int4, FieldType::varchar(None)]),
	);
	let emit = graph.add_process(
		vec![
			Operator::TakeGroup {
				exchange: aggregate,
				columns: vec![0, 1],
			},
			Operator::Emit {
				columns: vec![1],
			},
		],
		variables,
	);
	graph.connect(scan, aggregate);
	graph.connect(aggregate, emit);
	let store = Arc::new(ResultStore::new(meta(vec![FieldType::varchar(None)])));
	let channel: Arc<dyn DataChannel> = Arc::new(ResultStoreChannel::new(store.clone()));
	let query = ExecutableStatement::query(graph, meta(vec![FieldType::varchar(None)]));
	let response = run(&executor, &query, &tx, Some(channel), &Options::default());
	assert!(response.is_ok(), "query failed: {:?}", response.error);
	let rows = collect(&store);
	assert_eq!(rows.len(), 1);
	match &rows[0][0] {
		Value::Text(text) => assert_eq!(text.as_str(), "CCC"),
		other => panic!("unexpected value {other:?}"),
	}
	tx.abort().unwrap();
	executor.scheduler().shutdown();
}

#[test]
fn parallel_scan_under_a_read_only_transaction_sees_every_key_once() {
	let executor = engine();
	create_table(
		&executor,
		&TableDef::new("t", vec![ColumnDef::new("c0", FieldType::Int4, false)], vec![0]),
	);
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	let insert = ExecutableStatement::insert_values(
		"t",
		WriteFullKind::Insert,
		(1..=3).map(|i| vec![Expression::literal(Value::Int4(i))]).collect(),
	);
	assert!(run(&executor, &insert, &tx, None, &Options::default()).is_ok());
	tx.commit(CommitLevel::Available).unwrap().wait().unwrap();
	// A read-only transaction scanned by two sibling tasks under one
	// strand
	let rtx = Arc::new(executor.datastore().transaction(TransactionOptions::read_only()).unwrap());
	let row = meta(vec![FieldType::Int4]);
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
	let query = ExecutableStatement::query(graph, row);
	let store = Arc::new(ResultStore::new(meta(vec![FieldType::Int4])));
	let channel: Arc<dyn DataChannel> = Arc::new(ResultStoreChannel::new(store.clone()));
	let options = Options::default().with_scan_parallelism(2);
	let response = run(&executor, &query, &rtx, Some(channel), &options);
	assert!(response.is_ok(), "query failed: {:?}", response.error);
	let mut keys: Vec<i64> =
		collect(&store).into_iter().map(|row| row[0].as_int().unwrap()).collect();
	keys.sort_unstable();
	assert_eq!(keys, vec![1, 2, 3]);
	rtx.abort().unwrap();
	executor.scheduler().shutdown();
}

#[test]
fn filter_and_forward_exchange_stream_rows() {
	let executor = engine();
	create_table(
		&executor,
		&TableDef::new("t", vec![ColumnDef::new("c0", FieldType::Int4, false)], vec![0]),
	);
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	let insert = ExecutableStatement::insert_values(
		"t",
		WriteFullKind::Insert,
		(1..=10).map(|i| vec![Expression::literal(Value::Int4(i))]).collect(),
	);
	assert!(run(&executor, &insert, &tx, None, &Options::default()).is_ok());
	// SELECT c0 FROM t WHERE c0 > 7 through a forward exchange
	let row = meta(vec![FieldType::Int4]);
	let mut graph = StepGraph::new();
	let forward = graph.add_exchange(ExchangeSpec::Forward, row.clone());
	let scan = graph.add_process(
		vec![
			Operator::Scan {
				table: "t".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0],
			},
			Operator::Filter {
				predicate: Expression::compare(
					CompareOp::Greater,
					Expression::var(0),
					Expression::literal(Value::Int4(7)),
				),
			},
			Operator::Offer {
				exchange: forward,
				columns: vec![0],
			},
		],
		row.clone(),
	);
	let emit = graph.add_process(
		vec![
			Operator::TakeFlat {
				exchange: forward,
				columns: vec![0],
			},
			Operator::Emit {
				columns: vec![0],
			},
		],
		row.clone(),
	);
	graph.connect(scan, forward);
	graph.connect(forward, emit);
	let store = Arc::new(ResultStore::new(meta(vec![FieldType::Int4])));
	let channel: Arc<dyn DataChannel> = Arc::new(ResultStoreChannel::new(store.clone()));
	let query = ExecutableStatement::query(graph, row);
	let response = run(&executor, &query, &tx, Some(channel), &Options::default());
	assert!(response.is_ok(), "query failed: {:?}", response.error);
	assert_eq!(collect(&store), vec![vec![Value::Int4(8)], vec![Value::Int4(9)], vec![Value::Int4(10)]]);
	tx.abort().unwrap();
	executor.scheduler().shutdown();
}

#[test]
fn join_find_enriches_outer_rows() {
	let executor = engine();
	create_table(
		&executor,
		&TableDef::new(
			"orders",
			vec![
				ColumnDef::new("id", FieldType::Int4, false),
				ColumnDef::new("customer", FieldType::Int4, true),
			],
			vec![0],
		),
	);
	create_table(
		&executor,
		&TableDef::new(
			"customers",
			vec![
				ColumnDef::new("id", FieldType::Int4, false),
				ColumnDef::new("name", FieldType::varchar(None), true),
			],
			vec![0],
		),
	);
	let tx = Arc::new(executor.datastore().transaction(TransactionOptions::occ()).unwrap());
	let seed_customers = ExecutableStatement::insert_values(
		"customers",
		WriteFullKind::Insert,
		vec![vec![
			Expression::literal(Value::Int4(7)),
			Expression::literal(Value::Text(Text::inline("ann"))),
		]],
	);
	assert!(run(&executor, &seed_customers, &tx, None, &Options::default()).is_ok());
	let seed_orders = ExecutableStatement::insert_values(
		"orders",
		WriteFullKind::Insert,
		vec![
			vec![Expression::literal(Value::Int4(1)), Expression::literal(Value::Int4(7))],
			vec![Expression::literal(Value::Int4(2)), Expression::literal(Value::Empty)],
		],
	);
	assert!(run(&executor, &seed_orders, &tx, None, &Options::default()).is_ok());
	// SELECT o.id, c.name FROM orders o LEFT JOIN customers c
	let variables = meta(vec![
		FieldType::Int4,
		FieldType::Int4,
		FieldType::Int4,
		FieldType::varchar(None),
	]);
	let mut graph = StepGraph::new();
	graph.add_process(
		vec![
			Operator::Scan {
				table: "orders".to_owned(),
				index: None,
				bounds: ScanBounds::full(),
				columns: vec![0, 1],
			},
			Operator::JoinFind {
				table: "customers".to_owned(),
				index: None,
				key: vec![Expression::var(1)],
				columns: vec![2, 3],
				left_outer: true,
			},
			Operator::Emit {
				columns: vec![0, 3],
			},
		],
		variables,
	);
	let out_meta = meta(vec![FieldType::Int4, FieldType::varchar(None)]);
	let query = ExecutableStatement::query(graph, out_meta.clone());
	let store = Arc::new(ResultStore::new(out_meta));
	let channel: Arc<dyn DataChannel> = Arc::new(ResultStoreChannel::new(store.clone()));
	let response = run(&executor, &query, &tx, Some(channel), &Options::default());
	assert!(response.is_ok(), "join failed: {:?}", response.error);
	let rows = collect(&store);
	assert_eq!(rows.len(), 2);
	assert_eq!(rows[0][0], Value::Int4(1));
	match &rows[0][1] {
		Value::Text(name) => assert_eq!(name.as_str(), "ann"),
		other => panic!("unexpected {other:?}"),
	}
	// The null-keyed order joins to nothing and keeps a null name
	assert_eq!(rows[1][0], Value::Int4(2));
	assert_eq!(rows[1][1], Value::Empty);
	tx.abort().unwrap();
	executor.scheduler().shutdown();
}
