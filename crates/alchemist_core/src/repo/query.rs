//! Unbound and session-bound entity queries.
//!
//! # Responsibility
//! - Carry a target schema plus filter predicates until bound to a session.
//! - Execute get/list/count/update/delete against exactly one session.
//!
//! # Invariants
//! - Column names in generated SQL come from the registered schema only;
//!   unknown names fail before any statement runs.
//! - Reads never begin a transaction; updates and deletes do.
//! - A query is consumed by execution and cannot be rebound.

use super::error::{RepoError, RepoResult};
use crate::db::{RowKey, Session};
use crate::model::{quote_ident, ColumnRef, Entity, TableSchema};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Column addressed by plain name or by typed reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKey {
    Name(String),
    Column(ColumnRef),
}

impl From<&str> for ColumnKey {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<String> for ColumnKey {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl From<ColumnRef> for ColumnKey {
    fn from(value: ColumnRef) -> Self {
        Self::Column(value)
    }
}

/// Ordered column assignments for an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateValues {
    entries: Vec<(ColumnKey, Value)>,
}

impl UpdateValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<ColumnKey>, value: impl Into<Value>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ColumnKey, Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<ColumnKey>, V: Into<Value>> FromIterator<(K, V)> for UpdateValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// How a bulk update/delete keeps the session's dirty set in sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Select matching primary keys first and record them as dirty.
    #[default]
    Fetch,
    /// Run the statement without bookkeeping.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// One `column <op> value` filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub key: ColumnKey,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(key: impl Into<ColumnKey>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    /// `Value::Null` compares with `IS NULL`.
    pub fn equals(key: impl Into<ColumnKey>, value: impl Into<Value>) -> Self {
        Self::new(key, CompareOp::Eq, value)
    }

    /// `Value::Null` compares with `IS NOT NULL`.
    pub fn not_equals(key: impl Into<ColumnKey>, value: impl Into<Value>) -> Self {
        Self::new(key, CompareOp::Ne, value)
    }

    pub fn less_than(key: impl Into<ColumnKey>, value: impl Into<Value>) -> Self {
        Self::new(key, CompareOp::Lt, value)
    }

    pub fn at_most(key: impl Into<ColumnKey>, value: impl Into<Value>) -> Self {
        Self::new(key, CompareOp::Le, value)
    }

    pub fn greater_than(key: impl Into<ColumnKey>, value: impl Into<Value>) -> Self {
        Self::new(key, CompareOp::Gt, value)
    }

    pub fn at_least(key: impl Into<ColumnKey>, value: impl Into<Value>) -> Self {
        Self::new(key, CompareOp::Ge, value)
    }
}

/// Resolves an update key to a declared column name.
pub(crate) fn resolve_update_key(schema: &TableSchema, key: &ColumnKey) -> RepoResult<&'static str> {
    match key {
        ColumnKey::Name(name) => schema
            .column(name)
            .map(|column| column.name)
            .ok_or_else(|| RepoError::UnknownColumn {
                table: schema.table(),
                column: name.clone(),
            }),
        ColumnKey::Column(column_ref) => {
            if column_ref.table != schema.table() {
                return Err(RepoError::UnknownUpdateKey {
                    table: schema.table(),
                    key: *column_ref,
                });
            }
            schema
                .column(column_ref.name)
                .map(|column| column.name)
                .ok_or(RepoError::UnknownUpdateKey {
                    table: schema.table(),
                    key: *column_ref,
                })
        }
    }
}

fn resolve_filter_column(schema: &TableSchema, key: &ColumnKey) -> RepoResult<&'static str> {
    let unknown = |column: String| RepoError::UnknownColumn {
        table: schema.table(),
        column,
    };
    match key {
        ColumnKey::Name(name) => schema
            .column(name)
            .map(|column| column.name)
            .ok_or_else(|| unknown(name.clone())),
        ColumnKey::Column(column_ref) if column_ref.table == schema.table() => schema
            .column(column_ref.name)
            .map(|column| column.name)
            .ok_or_else(|| unknown(column_ref.to_string())),
        ColumnKey::Column(column_ref) => Err(unknown(column_ref.to_string())),
    }
}

/// Query on one entity table, not yet bound to a session.
pub struct Query<E: Entity> {
    schema: Arc<TableSchema>,
    predicates: Vec<Predicate>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Query<E> {
    pub(crate) fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            predicates: Vec::new(),
            _entity: PhantomData,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Binds this query to `session` for execution.
    pub fn with_session(self, session: &mut Session) -> BoundQuery<'_, E> {
        BoundQuery {
            query: self,
            session,
        }
    }

    fn select_sql(&self, projection: &str, params: &mut Vec<Value>) -> RepoResult<String> {
        Ok(format!(
            "SELECT {projection} FROM {}{}",
            quote_ident(self.schema.table()),
            self.where_clause(params)?
        ))
    }

    fn where_clause(&self, params: &mut Vec<Value>) -> RepoResult<String> {
        let mut conditions = Vec::with_capacity(self.predicates.len());
        for predicate in &self.predicates {
            let column = quote_ident(resolve_filter_column(&self.schema, &predicate.key)?);
            let condition = match (&predicate.value, predicate.op) {
                (Value::Null, CompareOp::Eq) => format!("{column} IS NULL"),
                (Value::Null, CompareOp::Ne) => format!("{column} IS NOT NULL"),
                (value, op) => {
                    params.push(value.clone());
                    format!("{column} {} ?", op.as_sql())
                }
            };
            conditions.push(condition);
        }

        if conditions.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" WHERE {}", conditions.join(" AND ")))
        }
    }

    fn column_list(&self) -> String {
        self.schema
            .columns()
            .iter()
            .map(|column| quote_ident(column.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Query bound to exactly one session.
pub struct BoundQuery<'s, E: Entity> {
    query: Query<E>,
    session: &'s mut Session,
}

impl<E: Entity> BoundQuery<'_, E> {
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.query.predicates.push(predicate);
        self
    }

    /// Loads one row by primary key, honoring any filters.
    pub fn get(self, id: i64) -> RepoResult<Option<E>> {
        let primary_key = self.query.schema.primary_key();
        self.filter(Predicate::equals(primary_key, id)).first()
    }

    /// Loads all matching rows ordered by primary key.
    pub fn all(self) -> RepoResult<Vec<E>> {
        let mut params = Vec::new();
        let sql = format!(
            "{} ORDER BY {};",
            self.query.select_sql(&self.query.column_list(), &mut params)?,
            quote_ident(self.query.schema.primary_key())
        );

        let conn = self.session.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(E::from_row(row)?);
        }
        Ok(entities)
    }

    /// First matching row by primary key order.
    pub fn first(self) -> RepoResult<Option<E>> {
        let mut params = Vec::new();
        let sql = format!(
            "{} ORDER BY {} LIMIT 1;",
            self.query.select_sql(&self.query.column_list(), &mut params)?,
            quote_ident(self.query.schema.primary_key())
        );

        let conn = self.session.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        if let Some(row) = rows.next()? {
            return Ok(Some(E::from_row(row)?));
        }
        Ok(None)
    }

    pub fn count(self) -> RepoResult<u64> {
        let mut params = Vec::new();
        let sql = format!("{};", self.query.select_sql("COUNT(*)", &mut params)?);

        let conn = self.session.connection()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Applies `values` to every matching row; returns the affected count.
    ///
    /// An empty `values` set is a no-op returning `0`.
    pub fn update(self, values: &UpdateValues, policy: SyncPolicy) -> RepoResult<usize> {
        let mut assignments = Vec::with_capacity(values.len());
        let mut params = Vec::with_capacity(values.len());
        for (key, value) in values.iter() {
            let column = resolve_update_key(&self.query.schema, key)?;
            assignments.push(format!("{} = ?", quote_ident(column)));
            params.push(value.clone());
        }
        let where_clause = self.query.where_clause(&mut params)?;
        if assignments.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE {} SET {}{where_clause};",
            quote_ident(self.query.schema.table()),
            assignments.join(", ")
        );
        self.write(&sql, params, policy)
    }

    /// Deletes every matching row; returns the affected count.
    pub fn delete(self, policy: SyncPolicy) -> RepoResult<usize> {
        let mut params = Vec::new();
        let where_clause = self.query.where_clause(&mut params)?;
        let sql = format!(
            "DELETE FROM {}{where_clause};",
            quote_ident(self.query.schema.table())
        );
        self.write(&sql, params, policy)
    }

    fn write(self, sql: &str, params: Vec<Value>, policy: SyncPolicy) -> RepoResult<usize> {
        let table = self.query.schema.table();
        let affected_keys = match policy {
            SyncPolicy::Fetch => Some(self.matching_keys()?),
            SyncPolicy::Skip => None,
        };

        let conn = self.session.write_connection()?;
        let affected = conn.execute(sql, params_from_iter(params.iter()))?;
        if let Some(ids) = affected_keys {
            self.session
                .mark_dirty(ids.into_iter().map(|id| RowKey { table, id }));
        }
        Ok(affected)
    }

    fn matching_keys(&self) -> RepoResult<Vec<i64>> {
        let mut params = Vec::new();
        let sql = format!(
            "{};",
            self.query
                .select_sql(&quote_ident(self.query.schema.primary_key()), &mut params)?
        );

        let conn = self.session.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}
