use std::{collections::HashMap, str::FromStr};

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    ConnectOptions, Connection, Sqlite, SqlitePool,
};
use tracing::debug;

use crate::{
    engine::{filter_prefix, Backend, Engine, Transaction, SQLITE_PROVIDER},
    error::Result,
    key_value::{self, KeyValue},
};

#[derive(Debug, Clone)]
pub struct SqliteEngine {
    pool: SqlitePool,
}

impl SqliteEngine {
    pub fn new(pool: &SqlitePool) -> Self {
        Self { pool: pool.clone() }
    }

    /// Builds a pool without connecting. A missing database file is not
    /// created implicitly, see [`Engine::create_database`].
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.foreign_keys(true);

        Ok(Self {
            pool: SqlitePoolOptions::new().connect_lazy_with(options),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    fn provider_name(&self) -> &str {
        SQLITE_PROVIDER
    }

    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn can_connect(&self) -> bool {
        match self.pool.connect_options().connect().await {
            Ok(connection) => {
                let _ = connection.close().await;

                true
            }
            Err(err) => {
                debug!(error = %err, "sqlite connection attempt failed");

                false
            }
        }
    }

    async fn create_database(&self) -> Result<()> {
        let options = (*self.pool.connect_options())
            .clone()
            .create_if_missing(true);

        if let Some(parent) = options
            .get_filename()
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(sqlx::Error::Io)?;
        }

        options.connect().await?.close().await?;

        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(SqliteTransaction(self.pool.begin().await?)))
    }
}

pub struct SqliteTransaction(sqlx::Transaction<'static, Sqlite>);

#[async_trait]
impl Transaction for SqliteTransaction {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let result = sqlx::query(sql).execute(&mut *self.0).await?;

        Ok(result.rows_affected())
    }

    async fn count(&mut self, sql: &str) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(&mut *self.0)
            .await?)
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&mut *self.0)
        .await?;

        Ok(count > 0)
    }

    async fn column_exists(&mut self, table: &str, column: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
        )
        .bind(table)
        .bind(column)
        .fetch_one(&mut *self.0)
        .await?;

        Ok(count > 0)
    }

    async fn index_exists(&mut self, index: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?",
        )
        .bind(index)
        .fetch_one(&mut *self.0)
        .await?;

        Ok(count > 0)
    }

    async fn foreign_key_exists(&mut self, table: &str, referenced_table: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM pragma_foreign_key_list(?) WHERE "table" = ?"#,
        )
        .bind(table)
        .bind(referenced_table)
        .fetch_one(&mut *self.0)
        .await?;

        Ok(count > 0)
    }

    async fn key_values(&mut self, prefix: &str) -> Result<HashMap<String, Option<String>>> {
        if !self.table_exists(&KeyValue::table_name()).await? {
            return Ok(HashMap::new());
        }

        let sql = Backend::Sqlite.query(&key_value::select_by_prefix(prefix));
        let rows = sqlx::query_as::<_, (String, Option<String>)>(&sql)
            .fetch_all(&mut *self.0)
            .await?;

        Ok(filter_prefix(rows, prefix))
    }

    async fn set_key_value(&mut self, key: &str, value: &str) -> Result<()> {
        let create = Backend::Sqlite.schema(&key_value::create_key_value_table());
        sqlx::query(&create).execute(&mut *self.0).await?;

        let upsert = Backend::Sqlite.query(&key_value::upsert(key, value)?);
        sqlx::query(&upsert).execute(&mut *self.0).await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.0.commit().await?;

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.0.rollback().await?;

        Ok(())
    }
}
