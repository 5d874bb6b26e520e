//! Statement model and the adapter from `sqlparser`'s AST.
//!
//! The executor never sees the parser's AST. A statement is reduced to a
//! closed set of kinds it knows how to dispatch on, and anything the
//! executor must reject is carried along as an `Unsupported` description
//! so the rejection happens identically on every replica.

use sqlparser::ast::{self, Expr, SelectItem, SetExpr, TableFactor, UnaryOperator};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::ParseError;

/// One top-level statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Create(CreateTable),
    Insert(Insert),
    /// Target table and WHERE clause are deliberately not captured.
    Delete,
    Select(Select),
    /// Any other statement kind; applying it does nothing.
    Other(String),
}

/// `CREATE TABLE name (col type, ...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

/// A declared column with its canonical type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub type_name: String,
}

/// `INSERT INTO table VALUES (...), (...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub table: String,
    pub source: InsertSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertSource {
    /// Literal tuples, in statement order.
    Values(Vec<Vec<Literal>>),
    Unsupported(String),
}

/// A value as written in an INSERT tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Text(String),
    Integer(i64),
    /// Anything else, kept as SQL text for the error message.
    Other(String),
}

/// `SELECT col, ... FROM table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub source: SelectSource,
    pub projection: Vec<Projection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectSource {
    Table(String),
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Column(String),
    Wildcard,
    Unsupported(String),
}

impl Statement {
    /// Short name of the statement kind, for logs.
    pub fn kind(&self) -> &str {
        match self {
            Statement::Create(_) => "CREATE",
            Statement::Insert(_) => "INSERT",
            Statement::Delete => "DELETE",
            Statement::Select(_) => "SELECT",
            Statement::Other(kind) => kind,
        }
    }
}

/// Parse statement text.
///
/// Empty text parses to [`Statement::Other`]. More than one statement is an
/// error: a log entry carries exactly one.
pub fn parse(sql: &str) -> Result<Statement, ParseError> {
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| ParseError::Syntax(e.to_string()))?;

    match statements.len() {
        0 => Ok(Statement::Other(String::new())),
        1 => Ok(convert(statements.remove(0))),
        n => Err(ParseError::MultipleStatements(n)),
    }
}

fn convert(stmt: ast::Statement) -> Statement {
    match stmt {
        ast::Statement::CreateTable { name, columns, .. } => Statement::Create(CreateTable {
            name: object_name(&name),
            columns: columns
                .iter()
                .map(|c| ColumnSpec {
                    name: ident_name(&c.name),
                    type_name: canonical_type_name(&c.data_type),
                })
                .collect(),
        }),
        ast::Statement::Insert {
            table_name, source, ..
        } => Statement::Insert(Insert {
            table: object_name(&table_name),
            source: insert_source(source.as_deref()),
        }),
        ast::Statement::Delete { .. } => Statement::Delete,
        ast::Statement::Query(query) => Statement::Select(select(&query)),
        other => Statement::Other(keyword(&other)),
    }
}

fn insert_source(source: Option<&ast::Query>) -> InsertSource {
    let Some(query) = source else {
        return InsertSource::Unsupported("INSERT without VALUES".to_string());
    };
    match query.body.as_ref() {
        SetExpr::Values(values) => InsertSource::Values(
            values
                .rows
                .iter()
                .map(|row| row.iter().map(literal).collect())
                .collect(),
        ),
        other => InsertSource::Unsupported(format!("INSERT from {other}")),
    }
}

fn literal(expr: &Expr) -> Literal {
    match expr {
        Expr::Value(ast::Value::SingleQuotedString(s))
        | Expr::Value(ast::Value::EscapedStringLiteral(s)) => Literal::Text(s.clone()),
        Expr::Value(ast::Value::Number(n, _)) => integer(n).unwrap_or_else(|| Literal::Other(n.clone())),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match inner.as_ref() {
            Expr::Value(ast::Value::Number(n, _)) => {
                integer(&format!("-{n}")).unwrap_or_else(|| Literal::Other(expr.to_string()))
            }
            _ => Literal::Other(expr.to_string()),
        },
        other => Literal::Other(other.to_string()),
    }
}

fn integer(text: &str) -> Option<Literal> {
    text.parse::<i64>().ok().map(Literal::Integer)
}

fn select(query: &ast::Query) -> Select {
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Select {
            source: SelectSource::Unsupported(format!("query {}", query.body)),
            projection: Vec::new(),
        };
    };

    let source = match select.from.first().map(|t| &t.relation) {
        Some(TableFactor::Table { name, .. }) => SelectSource::Table(object_name(name)),
        Some(other) => SelectSource::Unsupported(format!("FROM {other}")),
        None => SelectSource::Unsupported("SELECT without FROM".to_string()),
    };

    let projection = select
        .projection
        .iter()
        .map(|item| match item {
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => Projection::Column(ident_name(ident)),
            SelectItem::UnnamedExpr(Expr::CompoundIdentifier(parts)) => match parts.last() {
                Some(ident) => Projection::Column(ident_name(ident)),
                None => Projection::Unsupported(item.to_string()),
            },
            SelectItem::Wildcard(_) => Projection::Wildcard,
            other => Projection::Unsupported(other.to_string()),
        })
        .collect();

    Select { source, projection }
}

/// Unquoted identifiers fold to lower case, as PostgreSQL does.
fn ident_name(ident: &ast::Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

/// The relation name without schema qualification.
fn object_name(name: &ast::ObjectName) -> String {
    name.0.last().map(ident_name).unwrap_or_default()
}

fn keyword(stmt: &ast::Statement) -> String {
    stmt.to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

/// Resolve a declared column type to the name PostgreSQL reports for it.
///
/// Built-in integer, character and boolean types resolve into the
/// `pg_catalog` namespace; custom type names keep their own qualification
/// joined with `.`.
pub fn canonical_type_name(data_type: &ast::DataType) -> String {
    if let ast::DataType::Custom(name, _) = data_type {
        return name
            .0
            .iter()
            .map(ident_name)
            .collect::<Vec<_>>()
            .join(".");
    }

    let spelled = data_type.to_string().to_lowercase();
    let base = spelled.split('(').next().unwrap_or_default().trim();
    let canonical = match base {
        "int" | "integer" | "int4" => "pg_catalog.int4",
        "bigint" | "int8" => "pg_catalog.int8",
        "smallint" | "int2" => "pg_catalog.int2",
        "varchar" | "character varying" => "pg_catalog.varchar",
        "char" | "character" => "pg_catalog.bpchar",
        "boolean" | "bool" => "pg_catalog.bool",
        "real" | "float4" => "pg_catalog.float4",
        "double precision" | "float8" => "pg_catalog.float8",
        "numeric" | "decimal" => "pg_catalog.numeric",
        "timestamp" => "pg_catalog.timestamp",
        "text" => "text",
        other => other,
    };
    canonical.to_string()
}
