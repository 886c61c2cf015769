use std::collections::HashMap;

use async_trait::async_trait;
use dyn_clone::DynClone;
use sea_query::{
    PostgresQueryBuilder, QueryStatementWriter, SchemaStatementBuilder, SqliteQueryBuilder,
};

use crate::error::{Result, StoreError};

#[cfg(feature = "pg")]
mod pg;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "pg")]
pub use pg::*;
#[cfg(feature = "sqlite")]
pub use sqlite::*;

pub const SQLITE_PROVIDER: &str = "sqlite";
pub const POSTGRES_PROVIDER: &str = "postgres";

/// SQL dialect spoken by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    /// Renders a schema statement (table, index, alter) for this dialect.
    pub fn schema<S: SchemaStatementBuilder>(&self, statement: &S) -> String {
        match self {
            Backend::Sqlite => statement.to_string(SqliteQueryBuilder),
            Backend::Postgres => statement.to_string(PostgresQueryBuilder),
        }
    }

    /// Renders a query statement with its values inlined.
    pub fn query<Q: QueryStatementWriter>(&self, statement: &Q) -> String {
        match self {
            Backend::Sqlite => statement.to_string(SqliteQueryBuilder),
            Backend::Postgres => statement.to_string(PostgresQueryBuilder),
        }
    }
}

/// A configured relational store.
///
/// Engines are cheap to clone, every clone shares the same connection pool.
#[async_trait]
pub trait Engine: DynClone + Send + Sync {
    fn provider_name(&self) -> &str;

    fn backend(&self) -> Backend;

    /// Opens and closes a dedicated connection. Never fails, an unreachable
    /// database is reported as `false`.
    async fn can_connect(&self) -> bool;

    /// Creates the physical database (file or instance) if it is missing.
    async fn create_database(&self) -> Result<()>;

    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

dyn_clone::clone_trait_object!(Engine);

/// An open database transaction.
///
/// Dropping a transaction without calling [`Transaction::commit`] rolls it back.
#[async_trait]
pub trait Transaction: Send {
    fn backend(&self) -> Backend;

    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Runs a query returning a single integer, typically a `COUNT(*)`.
    async fn count(&mut self, sql: &str) -> Result<i64>;

    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    async fn column_exists(&mut self, table: &str, column: &str) -> Result<bool>;

    async fn index_exists(&mut self, index: &str) -> Result<bool>;

    async fn foreign_key_exists(&mut self, table: &str, referenced_table: &str) -> Result<bool>;

    /// Every key-value row whose key starts with `prefix`. Empty when the
    /// key-value table does not exist yet.
    async fn key_values(&mut self, prefix: &str) -> Result<HashMap<String, Option<String>>>;

    /// Upserts a key-value row, creating the key-value table on first use.
    async fn set_key_value(&mut self, key: &str, value: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Builds a lazily connected engine from a provider name and connection string.
///
/// No connection is opened here, use [`Engine::can_connect`] to probe it.
pub fn connect(provider_name: &str, connection_string: &str) -> Result<Box<dyn Engine>> {
    match provider_name {
        SQLITE_PROVIDER => connect_sqlite(connection_string),
        POSTGRES_PROVIDER => connect_pg(connection_string),
        name => Err(StoreError::UnknownProvider(name.to_owned())),
    }
}

#[cfg(feature = "sqlite")]
fn connect_sqlite(connection_string: &str) -> Result<Box<dyn Engine>> {
    Ok(Box::new(SqliteEngine::connect_lazy(connection_string)?))
}

#[cfg(not(feature = "sqlite"))]
fn connect_sqlite(_connection_string: &str) -> Result<Box<dyn Engine>> {
    Err(StoreError::ProviderNotEnabled(SQLITE_PROVIDER.to_owned()))
}

#[cfg(feature = "pg")]
fn connect_pg(connection_string: &str) -> Result<Box<dyn Engine>> {
    Ok(Box::new(PgEngine::connect_lazy(connection_string)?))
}

#[cfg(not(feature = "pg"))]
fn connect_pg(_connection_string: &str) -> Result<Box<dyn Engine>> {
    Err(StoreError::ProviderNotEnabled(POSTGRES_PROVIDER.to_owned()))
}

pub(crate) fn filter_prefix(
    rows: Vec<(String, Option<String>)>,
    prefix: &str,
) -> HashMap<String, Option<String>> {
    rows.into_iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .collect()
}
