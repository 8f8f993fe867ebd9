//! # Trellis Core
//!
//! This crate is the execution core of the Trellis database engine. It
//! turns a compiled relational plan into a directed acyclic graph of
//! executable steps, dispatches those steps to a worker pool as
//! fine-grained tasks, moves packed records between steps through typed
//! exchanges, evaluates expressions over those records, reads and
//! writes rows through a transactional key-value boundary, and streams
//! result records back to the caller over a data channel.
//!
//! SQL parsing and query planning live outside of this crate; an
//! executable statement is handed in as a step graph. The storage
//! engine is consumed through the traits in [`kvs::api`], with an
//! in-memory reference backend available behind the `kv-mem` feature.

#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod catalog;
pub mod cnf;
pub mod ctx;
pub mod dbs;
pub mod err;
pub mod exch;
pub mod exec;
pub mod fnc;
pub mod key;
pub mod kvs;
pub mod mem;
pub mod plan;
pub mod record;
pub mod rpc;
pub mod sched;
pub mod val;
