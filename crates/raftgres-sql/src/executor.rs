//! Statement execution against the keyspace.
//!
//! The executor holds no state of its own: everything it needs is in the
//! statement, the keyspace, and the log index used to derive row ids.
//! It is only ever driven by one caller at a time (the state machine), so
//! each statement runs to completion before the next starts.

use raftgres_store::Keyspace;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ExecError, QueryError};
use crate::schema::{self, TableDefinition, Value};
use crate::statement::{
    CreateTable, Insert, InsertSource, Literal, Projection, Select, SelectSource, Statement,
};

/// Rows produced by a SELECT. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub field_names: Vec<String>,
    pub field_types: Vec<String>,
    /// `None` where a stored row is shorter than the column it is projected on.
    pub rows: Vec<Vec<Option<Value>>>,
}

/// What applying one statement did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Created { table: String },
    Inserted { rows: u64 },
    Deleted { rows: u64 },
    Selected(QueryResult),
    /// A statement kind the executor does not act on (or an empty entry).
    Ignored { kind: String },
}

impl Outcome {
    /// PostgreSQL command tag for the outcome.
    pub fn command_tag(&self) -> String {
        match self {
            Outcome::Created { .. } => "CREATE TABLE".to_string(),
            Outcome::Inserted { rows } => format!("INSERT 0 {rows}"),
            Outcome::Deleted { rows } => format!("DELETE {rows}"),
            Outcome::Selected(result) => format!("SELECT {}", result.rows.len()),
            Outcome::Ignored { kind } => kind.clone(),
        }
    }
}

/// Translates statements into keyspace reads and writes.
#[derive(Clone)]
pub struct Executor {
    keyspace: Keyspace,
}

impl Executor {
    pub fn new(keyspace: Keyspace) -> Self {
        Self { keyspace }
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Execute `stmt`, which sits at `log_index` in the replicated log.
    pub fn execute(&self, stmt: &Statement, log_index: u64) -> Result<Outcome, ExecError> {
        match stmt {
            Statement::Create(create) => self.create(create),
            Statement::Insert(insert) => self.insert(insert, log_index),
            Statement::Delete => self.delete(),
            Statement::Select(select) => self.select(select),
            Statement::Other(kind) => {
                debug!(kind = %kind, "ignoring statement");
                Ok(Outcome::Ignored { kind: kind.clone() })
            }
        }
    }

    /// Read a table definition, if one was created.
    pub fn table_definition(&self, name: &str) -> Result<Option<TableDefinition>, ExecError> {
        let key = schema::table_key(name);
        match self.keyspace.get(&key)? {
            Some(bytes) => Ok(Some(TableDefinition::decode(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    fn create(&self, create: &CreateTable) -> Result<Outcome, ExecError> {
        let definition = TableDefinition {
            name: create.name.clone(),
            column_names: create.columns.iter().map(|c| c.name.clone()).collect(),
            column_types: create.columns.iter().map(|c| c.type_name.clone()).collect(),
        };
        // An existing definition of the same name is replaced.
        self.keyspace
            .put(&schema::table_key(&definition.name), &definition.encode()?)?;
        debug!(table = %definition.name, columns = definition.column_names.len(), "table created");
        Ok(Outcome::Created {
            table: definition.name,
        })
    }

    fn insert(&self, insert: &Insert, log_index: u64) -> Result<Outcome, ExecError> {
        let tuples = match &insert.source {
            InsertSource::Values(tuples) => tuples,
            InsertSource::Unsupported(what) => {
                return Err(QueryError::Unsupported(what.clone()).into());
            }
        };

        // Every value is checked before anything is written.
        let mut rows = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            let values = tuple
                .iter()
                .map(|literal| match literal {
                    Literal::Text(s) => Ok(Value::Text(s.clone())),
                    Literal::Integer(i) => Ok(Value::Integer(*i)),
                    Literal::Other(text) => Err(QueryError::UnsupportedValue(text.clone())),
                })
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(values);
        }

        let mut batch = Vec::with_capacity(rows.len());
        for (ordinal, values) in rows.iter().enumerate() {
            let id = schema::row_id(&insert.table, log_index, ordinal);
            let key = schema::row_key(&insert.table, &id);
            let bytes = schema::encode_row(&key, values)?;
            batch.push((key, bytes));
        }
        self.keyspace.put_batch(&batch)?;

        debug!(table = %insert.table, rows = batch.len(), log_index, "rows inserted");
        Ok(Outcome::Inserted {
            rows: batch.len() as u64,
        })
    }

    fn delete(&self) -> Result<Outcome, ExecError> {
        // Every row of every table goes; definitions stay.
        let removed = self.keyspace.delete_prefix(schema::ROWS_NAMESPACE)?;
        debug!(rows = removed, "rows deleted");
        Ok(Outcome::Deleted { rows: removed })
    }

    fn select(&self, select: &Select) -> Result<Outcome, ExecError> {
        let table = match &select.source {
            SelectSource::Table(table) => table,
            SelectSource::Unsupported(what) => {
                return Err(QueryError::Unsupported(what.clone()).into());
            }
        };
        let definition = self
            .table_definition(table)?
            .ok_or_else(|| QueryError::UnknownTable(table.clone()))?;

        let mut result = QueryResult::default();
        let mut positions = Vec::new();
        for projection in &select.projection {
            match projection {
                Projection::Column(name) => {
                    let (position, type_name) = definition
                        .column(name)
                        .ok_or_else(|| QueryError::UnknownField(name.clone()))?;
                    result.field_names.push(name.clone());
                    result.field_types.push(type_name.to_string());
                    positions.push(position);
                }
                Projection::Wildcard => {
                    let columns = definition
                        .column_names
                        .iter()
                        .zip(&definition.column_types)
                        .enumerate();
                    for (position, (name, type_name)) in columns {
                        result.field_names.push(name.clone());
                        result.field_types.push(type_name.clone());
                        positions.push(position);
                    }
                }
                Projection::Unsupported(what) => {
                    return Err(QueryError::Unsupported(what.clone()).into());
                }
            }
        }

        for (key, bytes) in self.keyspace.scan_prefix(&schema::row_prefix(table))? {
            // `rows_t_` also prefixes the rows of a table named `t_x`.
            if schema::row_id_in(table, &key).is_none() {
                continue;
            }
            let stored = schema::decode_row(&key, &bytes)?;
            result
                .rows
                .push(positions.iter().map(|&i| stored.get(i).cloned()).collect());
        }

        debug!(table = %table, rows = result.rows.len(), "rows selected");
        Ok(Outcome::Selected(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::parse;

    fn executor() -> Executor {
        Executor::new(Keyspace::open_in_memory().unwrap())
    }

    /// Run `sql` as if it were committed at `index`.
    fn run(exec: &Executor, index: u64, sql: &str) -> Result<Outcome, ExecError> {
        exec.execute(&parse(sql).unwrap(), index)
    }

    fn rows(outcome: Outcome) -> QueryResult {
        match outcome {
            Outcome::Selected(result) => result,
            other => panic!("expected rows, got {other:?}"),
        }
    }

    fn text(s: &str) -> Option<Value> {
        Some(Value::Text(s.to_string()))
    }

    #[test]
    fn select_on_empty_table_returns_no_rows() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT, b TEXT)").unwrap();

        let result = rows(run(&exec, 2, "SELECT a, b FROM t").unwrap());
        assert!(result.rows.is_empty());
        assert_eq!(result.field_names, vec!["a", "b"]);
        assert_eq!(result.field_types, vec!["pg_catalog.int4", "text"]);
    }

    #[test]
    fn insert_then_select_in_declared_order() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT, b TEXT)").unwrap();
        let inserted = run(&exec, 2, "INSERT INTO t VALUES (1, 'x')").unwrap();
        assert_eq!(inserted, Outcome::Inserted { rows: 1 });

        let result = rows(run(&exec, 3, "SELECT a, b FROM t").unwrap());
        assert_eq!(result.rows, vec![vec![Some(Value::Integer(1)), text("x")]]);
    }

    #[test]
    fn projection_follows_requested_order() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT, b TEXT)").unwrap();
        run(&exec, 2, "INSERT INTO t VALUES (1, 'x')").unwrap();

        let result = rows(run(&exec, 3, "SELECT b, a FROM t").unwrap());
        assert_eq!(result.field_names, vec!["b", "a"]);
        assert_eq!(result.rows, vec![vec![text("x"), Some(Value::Integer(1))]]);
    }

    #[test]
    fn wildcard_expands_to_declared_columns() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT, b TEXT)").unwrap();
        run(&exec, 2, "INSERT INTO t VALUES (7, 'y')").unwrap();

        let result = rows(run(&exec, 3, "SELECT * FROM t").unwrap());
        assert_eq!(result.field_names, vec!["a", "b"]);
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn unknown_field_fails_without_rows() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT, b TEXT)").unwrap();
        run(&exec, 2, "INSERT INTO t VALUES (1, 'x')").unwrap();

        let err = run(&exec, 3, "SELECT a, c FROM t").unwrap_err();
        assert!(matches!(err, ExecError::Query(QueryError::UnknownField(ref f)) if f == "c"));
    }

    #[test]
    fn unknown_table_is_a_query_error() {
        let exec = executor();
        let err = run(&exec, 1, "SELECT a FROM nope").unwrap_err();
        assert!(matches!(err, ExecError::Query(QueryError::UnknownTable(_))));
        assert!(!err.is_fault());
    }

    #[test]
    fn multi_row_insert_writes_each_row() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT, b TEXT)").unwrap();
        let outcome = run(&exec, 2, "INSERT INTO t VALUES (1, 'x'), (2, 'y'), (3, 'z')").unwrap();
        assert_eq!(outcome.command_tag(), "INSERT 0 3");

        let result = rows(run(&exec, 3, "SELECT a FROM t").unwrap());
        let mut seen: Vec<_> = result.rows.into_iter().flatten().flatten().collect();
        seen.sort_by_key(|v| v.to_string());
        assert_eq!(seen, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    }

    #[test]
    fn unsupported_literal_writes_nothing() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT, b TEXT)").unwrap();

        let err = run(&exec, 2, "INSERT INTO t VALUES (1, 'ok'), (2.5, 'bad')").unwrap_err();
        assert!(matches!(err, ExecError::Query(QueryError::UnsupportedValue(_))));

        let result = rows(run(&exec, 3, "SELECT a, b FROM t").unwrap());
        assert!(result.rows.is_empty());
    }

    #[test]
    fn delete_clears_rows_of_every_table_but_keeps_definitions() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT)").unwrap();
        run(&exec, 2, "CREATE TABLE u (b TEXT)").unwrap();
        run(&exec, 3, "INSERT INTO t VALUES (1), (2)").unwrap();
        run(&exec, 4, "INSERT INTO u VALUES ('x')").unwrap();

        let outcome = run(&exec, 5, "DELETE FROM t").unwrap();
        assert_eq!(outcome, Outcome::Deleted { rows: 3 });

        assert!(rows(run(&exec, 6, "SELECT a FROM t").unwrap()).rows.is_empty());
        assert!(rows(run(&exec, 7, "SELECT b FROM u").unwrap()).rows.is_empty());
        assert!(exec.table_definition("t").unwrap().is_some());
        assert!(exec.table_definition("u").unwrap().is_some());
    }

    #[test]
    fn create_overwrites_existing_definition() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT)").unwrap();
        run(&exec, 2, "CREATE TABLE t (z TEXT)").unwrap();

        let def = exec.table_definition("t").unwrap().unwrap();
        assert_eq!(def.column_names, vec!["z"]);
    }

    #[test]
    fn other_statements_change_nothing() {
        let exec = executor();
        let outcome = run(&exec, 1, "UPDATE t SET a = 1").unwrap();
        assert_eq!(outcome, Outcome::Ignored { kind: "UPDATE".to_string() });
        assert!(exec.keyspace().is_empty().unwrap());
    }

    #[test]
    fn short_rows_project_as_null() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT, b TEXT)").unwrap();
        run(&exec, 2, "INSERT INTO t VALUES (1)").unwrap();

        let result = rows(run(&exec, 3, "SELECT a, b FROM t").unwrap());
        assert_eq!(result.rows, vec![vec![Some(Value::Integer(1)), None]]);
    }

    #[test]
    fn corrupt_row_is_a_fault() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT)").unwrap();
        let key = schema::row_key("t", &schema::row_id("t", 99, 0));
        exec.keyspace().put(&key, b"{{{").unwrap();

        let err = run(&exec, 2, "SELECT a FROM t").unwrap_err();
        assert!(err.is_fault());
    }

    #[test]
    fn select_skips_rows_of_tables_sharing_the_name_prefix() {
        let exec = executor();
        run(&exec, 1, "CREATE TABLE t (a INT)").unwrap();
        run(&exec, 2, "CREATE TABLE t_x (a TEXT, b TEXT)").unwrap();
        run(&exec, 3, "INSERT INTO t_x VALUES ('leak', 'y')").unwrap();

        let result = rows(run(&exec, 4, "SELECT a FROM t").unwrap());
        assert!(result.rows.is_empty());

        let result = rows(run(&exec, 5, "SELECT a, b FROM t_x").unwrap());
        assert_eq!(result.rows, vec![vec![text("leak"), text("y")]]);
    }

    #[test]
    fn mismatched_definition_is_a_fault() {
        let exec = executor();
        exec.keyspace()
            .put(
                "tables_t",
                br#"{"name":"t","column_names":["a","b"],"column_types":["text"]}"#,
            )
            .unwrap();

        let err = run(&exec, 1, "SELECT * FROM t").unwrap_err();
        assert!(err.is_fault());
        assert!(matches!(err, ExecError::Corrupt { ref key, .. } if key == "tables_t"));
    }

    #[test]
    fn same_log_gives_same_keyspace() {
        let log = [
            "CREATE TABLE t (a INT, b TEXT)",
            "INSERT INTO t VALUES (1, 'x'), (2, 'y')",
            "CREATE TABLE u (c TEXT)",
            "INSERT INTO u VALUES ('z')",
            "INSERT INTO t VALUES (3, 'w')",
        ];
        let left = executor();
        let right = executor();
        for (i, sql) in log.iter().enumerate() {
            run(&left, i as u64 + 1, sql).unwrap();
            run(&right, i as u64 + 1, sql).unwrap();
        }
        assert_eq!(left.keyspace().dump().unwrap(), right.keyspace().dump().unwrap());
        assert_eq!(left.keyspace().len().unwrap(), 2 + 4);
    }
}
