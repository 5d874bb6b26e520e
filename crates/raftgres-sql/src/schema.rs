//! Keyspace layout and value encoding for tables and rows.
//!
//! Two disjoint namespaces live in the keyspace:
//!
//! | Key | Value |
//! |---|---|
//! | `tables_{name}` | JSON [`TableDefinition`] |
//! | `rows_{table}_{id}` | JSON array of [`Value`]s in column order |
//!
//! Row ids must be identical on every replica, so they are derived from
//! the position of the INSERT in the log rather than drawn at random.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExecError;

pub const TABLES_NAMESPACE: &str = "tables_";
pub const ROWS_NAMESPACE: &str = "rows_";

/// Namespace for row-id derivation. Arbitrary, but fixed forever.
const ROW_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f8a_1c2e_53b4_4d9a_9e07_2b5c_d1e4_a390);

/// Key holding the definition of `table`.
pub fn table_key(table: &str) -> String {
    format!("{TABLES_NAMESPACE}{table}")
}

/// Prefix shared by every row of `table`.
pub fn row_prefix(table: &str) -> String {
    format!("{ROWS_NAMESPACE}{table}_")
}

/// Key of a single row.
pub fn row_key(table: &str, id: &Uuid) -> String {
    format!("{}{id}", row_prefix(table))
}

/// The row id in `key` if it is a row of `table` and not of some other
/// table whose name merely starts with `{table}_`.
pub fn row_id_in(table: &str, key: &str) -> Option<Uuid> {
    let rest = key.strip_prefix(&row_prefix(table))?;
    Uuid::parse_str(rest).ok()
}

/// Identifier for the `ordinal`-th row inserted by the entry at `log_index`.
pub fn row_id(table: &str, log_index: u64, ordinal: usize) -> Uuid {
    let name = format!("{table}/{log_index}/{ordinal}");
    Uuid::new_v5(&ROW_ID_NAMESPACE, name.as_bytes())
}

/// Persisted schema of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub column_names: Vec<String>,
    pub column_types: Vec<String>,
}

impl TableDefinition {
    /// Position and type of the column called `name`.
    pub fn column(&self, name: &str) -> Option<(usize, &str)> {
        self.column_names
            .iter()
            .position(|c| c == name)
            .and_then(|i| Some((i, self.column_types.get(i)?.as_str())))
    }

    pub fn encode(&self) -> Result<Vec<u8>, ExecError> {
        serde_json::to_vec(self).map_err(|e| ExecError::Encode {
            key: table_key(&self.name),
            reason: e.to_string(),
        })
    }

    pub fn decode(key: &str, bytes: &[u8]) -> Result<Self, ExecError> {
        let definition: Self = serde_json::from_slice(bytes).map_err(|e| ExecError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        if definition.column_names.len() != definition.column_types.len() {
            return Err(ExecError::Corrupt {
                key: key.to_string(),
                reason: format!(
                    "{} column names but {} column types",
                    definition.column_names.len(),
                    definition.column_types.len()
                ),
            });
        }
        Ok(definition)
    }
}

/// A stored cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Text(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

pub fn encode_row(key: &str, values: &[Value]) -> Result<Vec<u8>, ExecError> {
    serde_json::to_vec(values).map_err(|e| ExecError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn decode_row(key: &str, bytes: &[u8]) -> Result<Vec<Value>, ExecError> {
    serde_json::from_slice(bytes).map_err(|e| ExecError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
