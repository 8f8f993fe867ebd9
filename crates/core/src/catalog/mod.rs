//! Schema metadata: tables, columns and index definitions.
//!
//! Definitions persist in the system storage; the serialized
//! index-definition payload is also embedded in the options of the
//! storage created for each table, so a storage can be interpreted
//! without consulting the catalog.

mod provider;
mod table;

pub use provider::{create_table, drop_table, get_table, list_tables};
pub use table::{ColumnDef, IndexDef, TableDef};
