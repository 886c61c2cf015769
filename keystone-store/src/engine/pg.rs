use std::{collections::HashMap, str::FromStr};

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    ConnectOptions, Connection, PgPool, Postgres,
};
use tracing::debug;

use crate::{
    engine::{filter_prefix, Backend, Engine, Transaction, POSTGRES_PROVIDER},
    error::Result,
    key_value::{self, KeyValue},
};

#[derive(Debug, Clone)]
pub struct PgEngine {
    pool: PgPool,
}

impl PgEngine {
    pub fn new(pool: &PgPool) -> Self {
        Self { pool: pool.clone() }
    }

    pub fn connect_lazy(url: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(url)?;

        Ok(Self {
            pool: PgPoolOptions::new().connect_lazy_with(options),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Engine for PgEngine {
    fn provider_name(&self) -> &str {
        POSTGRES_PROVIDER
    }

    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn can_connect(&self) -> bool {
        match self.pool.connect_options().connect().await {
            Ok(connection) => {
                let _ = connection.close().await;

                true
            }
            Err(err) => {
                debug!(error = %err, "postgres connection attempt failed");

                false
            }
        }
    }

    async fn create_database(&self) -> Result<()> {
        let options = self.pool.connect_options();
        let Some(database) = options.get_database().map(ToOwned::to_owned) else {
            return Ok(());
        };

        let mut connection = (*options).clone().database("postgres").connect().await?;

        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM pg_database WHERE datname = $1",
        )
        .bind(&database)
        .fetch_one(&mut connection)
        .await?;

        if exists == 0 {
            let sql = format!(r#"CREATE DATABASE "{}""#, database.replace('"', "\"\""));
            sqlx::query(&sql).execute(&mut connection).await?;
        }

        connection.close().await?;

        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(PgTransaction(self.pool.begin().await?)))
    }
}

pub struct PgTransaction(sqlx::Transaction<'static, Postgres>);

#[async_trait]
impl Transaction for PgTransaction {
    fn backend(&self) -> Backend {
        Backend::Postgres
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
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1",
        )
        .bind(table)
        .fetch_one(&mut *self.0)
        .await?;

        Ok(count > 0)
    }

    async fn column_exists(&mut self, table: &str, column: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM information_schema.columns WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2",
        )
        .bind(table)
        .bind(column)
        .fetch_one(&mut *self.0)
        .await?;

        Ok(count > 0)
    }

    async fn index_exists(&mut self, index: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM pg_indexes WHERE schemaname = current_schema() AND indexname = $1",
        )
        .bind(index)
        .fetch_one(&mut *self.0)
        .await?;

        Ok(count > 0)
    }

    async fn foreign_key_exists(&mut self, table: &str, referenced_table: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*)
            FROM information_schema.table_constraints tc
            JOIN information_schema.constraint_column_usage ccu
                ON tc.constraint_name = ccu.constraint_name
                AND tc.constraint_schema = ccu.constraint_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
                AND tc.table_schema = current_schema()
                AND tc.table_name = $1
                AND ccu.table_name = $2"#,
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

        let sql = Backend::Postgres.query(&key_value::select_by_prefix(prefix));
        let rows = sqlx::query_as::<_, (String, Option<String>)>(&sql)
            .fetch_all(&mut *self.0)
            .await?;

        Ok(filter_prefix(rows, prefix))
    }

    async fn set_key_value(&mut self, key: &str, value: &str) -> Result<()> {
        let create = Backend::Postgres.schema(&key_value::create_key_value_table());
        sqlx::query(&create).execute(&mut *self.0).await?;

        let upsert = Backend::Postgres.query(&key_value::upsert(key, value)?);
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
