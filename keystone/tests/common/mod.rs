#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use keystone::{
    config::{BootConfig, ConfigBuilder, ConnectionStrings},
    install::DatabaseSchemaCreator,
    migrations::{state_value_key, Migration, MigrationContext, MigrationPlan},
    store::{Backend, Engine, KeyValueService, Result, SqliteEngine, Transaction},
    DatabaseFactory,
};
use sea_query::{Alias, ColumnDef, Table, TableCreateStatement};

pub const CORE_PLAN: &str = "Keystone.Core";

pub fn sqlite_path(key: &str) -> anyhow::Result<PathBuf> {
    let dir = Path::new("../target/tmp");
    std::fs::create_dir_all(dir)?;

    let path = dir.join(format!("test_keystone_{key}.db"));
    for suffix in ["", "-journal", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }

    Ok(path)
}

pub fn sqlite_connection_strings(path: &Path) -> ConnectionStrings {
    ConnectionStrings::new(format!("sqlite:{}", path.display()), "sqlite")
}

/// A factory over a fresh, empty database file.
pub async fn create_sqlite_factory(key: &str) -> anyhow::Result<DatabaseFactory> {
    let factory = missing_sqlite_factory(key)?;
    factory.create_database().await?;

    Ok(factory)
}

/// A factory configured for a database file that does not exist.
pub fn missing_sqlite_factory(key: &str) -> anyhow::Result<DatabaseFactory> {
    let path = sqlite_path(key)?;
    let factory = DatabaseFactory::new();
    factory.configure(sqlite_connection_strings(&path))?;

    Ok(factory)
}

/// A factory whose engine counts transactions and writes.
pub async fn create_counting_factory(
    key: &str,
) -> anyhow::Result<(DatabaseFactory, CountingEngine)> {
    let path = sqlite_path(key)?;
    let connection_strings = sqlite_connection_strings(&path);
    let engine = CountingEngine::new(SqliteEngine::connect_lazy(
        connection_strings.connection_string.as_deref().unwrap_or_default(),
    )?);
    engine.create_database().await?;

    let factory = DatabaseFactory::with_engine(connection_strings, Box::new(engine.clone()));

    Ok((factory, engine))
}

pub fn fast_config() -> ConfigBuilder {
    ConfigBuilder::new()
        .connect_attempts(2)
        .connect_retry_interval(Duration::from_millis(1))
}

pub fn default_fast_config() -> BootConfig {
    fast_config().build()
}

/// Creates the baseline tables and seed rows without recording any plan
/// state, which is what an installed but never upgraded database looks like.
pub async fn create_baseline(factory: &DatabaseFactory) -> anyhow::Result<()> {
    let scopes = factory.scope_provider().ok_or_else(|| anyhow::anyhow!("not configured"))?;
    let scope = scopes.create_scope().await?;
    DatabaseSchemaCreator::new(&scope).create_schema().await?;
    scope.complete().await?;

    Ok(())
}

/// Creates the baseline and records `plan` as fully applied.
pub async fn install(factory: &DatabaseFactory, plan: &MigrationPlan) -> anyhow::Result<()> {
    let scopes = factory.scope_provider().ok_or_else(|| anyhow::anyhow!("not configured"))?;
    let scope = scopes.create_scope().await?;
    DatabaseSchemaCreator::new(&scope).initialize(plan).await?;
    scope.complete().await?;

    Ok(())
}

pub async fn table_exists(factory: &DatabaseFactory, table: &str) -> anyhow::Result<bool> {
    let scopes = factory.scope_provider().ok_or_else(|| anyhow::anyhow!("not configured"))?;
    let scope = scopes.create_scope().await?;
    let exists = scope.table_exists(table).await?;
    scope.complete().await?;

    Ok(exists)
}

pub async fn column_exists(
    factory: &DatabaseFactory,
    table: &str,
    column: &str,
) -> anyhow::Result<bool> {
    let scopes = factory.scope_provider().ok_or_else(|| anyhow::anyhow!("not configured"))?;
    let scope = scopes.create_scope().await?;
    let exists = scope.column_exists(table, column).await?;
    scope.complete().await?;

    Ok(exists)
}

pub async fn plan_state(factory: &DatabaseFactory, plan: &str) -> anyhow::Result<Option<String>> {
    let scopes = factory.scope_provider().ok_or_else(|| anyhow::anyhow!("not configured"))?;

    Ok(KeyValueService::new(scopes)
        .get_value(&state_value_key(plan))
        .await?)
}

pub async fn set_plan_state(
    factory: &DatabaseFactory,
    plan: &str,
    state: &str,
) -> anyhow::Result<()> {
    let scopes = factory.scope_provider().ok_or_else(|| anyhow::anyhow!("not configured"))?;
    KeyValueService::new(scopes)
        .set_value(&state_value_key(plan), state)
        .await?;

    Ok(())
}

fn id_table(name: &str) -> TableCreateStatement {
    Table::create()
        .table(Alias::new(name))
        .col(
            ColumnDef::new(Alias::new("id"))
                .integer()
                .not_null()
                .primary_key(),
        )
        .to_owned()
}

/// The baseline itself is created by the installer, reaching the first state
/// needs no work.
#[derive(Default)]
pub struct Baseline;

#[async_trait]
impl Migration for Baseline {
    async fn migrate(&self, _context: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct CreateAlpha;

#[async_trait]
impl Migration for CreateAlpha {
    async fn migrate(&self, context: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        context.create_table(id_table("alpha")).await?;

        Ok(())
    }
}

#[derive(Default)]
pub struct CreateBeta;

#[async_trait]
impl Migration for CreateBeta {
    async fn migrate(&self, context: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        context.create_table(id_table("beta")).await?;

        Ok(())
    }
}

#[derive(Default)]
pub struct CreateGammaThenFail;

#[async_trait]
impl Migration for CreateGammaThenFail {
    async fn migrate(&self, context: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        context.create_table(id_table("gamma")).await?;

        anyhow::bail!("gamma failed")
    }
}

#[derive(Default)]
pub struct AddUserNickname;

#[async_trait]
impl Migration for AddUserNickname {
    async fn migrate(&self, context: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        context
            .add_column(
                "ks_user",
                ColumnDef::new(Alias::new("nickname")).string().null().to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(Default)]
pub struct CreateAcmeProduct;

#[async_trait]
impl Migration for CreateAcmeProduct {
    async fn migrate(&self, context: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        context.create_table(id_table("acme_product")).await?;

        Ok(())
    }
}

/// `"" -> a -> done`
pub fn alpha_beta_plan(name: &str) -> anyhow::Result<MigrationPlan> {
    Ok(MigrationPlan::builder(name)
        .from("")
        .to::<CreateAlpha>("a")
        .to::<CreateBeta>("done")
        .build()?)
}

/// `"" -> a -> done`, the second step fails after creating `gamma`.
pub fn failing_plan(name: &str) -> anyhow::Result<MigrationPlan> {
    Ok(MigrationPlan::builder(name)
        .from("")
        .to::<CreateAlpha>("a")
        .to::<CreateGammaThenFail>("done")
        .build()?)
}

pub fn core_plan_v1() -> anyhow::Result<MigrationPlan> {
    Ok(MigrationPlan::builder(CORE_PLAN)
        .from("")
        .to::<Baseline>("1.0.0")
        .build()?)
}

pub fn core_plan_v2() -> anyhow::Result<MigrationPlan> {
    Ok(MigrationPlan::builder(CORE_PLAN)
        .from("")
        .to::<Baseline>("1.0.0")
        .to::<AddUserNickname>("1.1.0")
        .build()?)
}

pub fn broken_core_plan() -> anyhow::Result<MigrationPlan> {
    Ok(MigrationPlan::builder(CORE_PLAN)
        .from("")
        .to::<Baseline>("1.0.0")
        .to::<CreateGammaThenFail>("1.1.0")
        .build()?)
}

pub fn acme_plan() -> anyhow::Result<MigrationPlan> {
    Ok(MigrationPlan::builder("Acme.Package")
        .from("")
        .to::<CreateAcmeProduct>("1")
        .build()?)
}

#[derive(Debug, Default)]
pub struct Counters {
    pub begins: AtomicUsize,
    pub writes: AtomicUsize,
}

/// Wraps a sqlite engine and counts what goes through it.
#[derive(Clone)]
pub struct CountingEngine {
    inner: SqliteEngine,
    counters: Arc<Counters>,
}

impl CountingEngine {
    pub fn new(inner: SqliteEngine) -> Self {
        Self {
            inner,
            counters: Arc::default(),
        }
    }

    pub fn begins(&self) -> usize {
        self.counters.begins.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.counters.writes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.counters.begins.store(0, Ordering::SeqCst);
        self.counters.writes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Engine for CountingEngine {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    async fn can_connect(&self) -> bool {
        self.inner.can_connect().await
    }

    async fn create_database(&self) -> Result<()> {
        self.inner.create_database().await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.counters.begins.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(CountingTransaction {
            inner: self.inner.begin().await?,
            counters: self.counters.clone(),
        }))
    }
}

struct CountingTransaction {
    inner: Box<dyn Transaction>,
    counters: Arc<Counters>,
}

#[async_trait]
impl Transaction for CountingTransaction {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);

        self.inner.execute(sql).await
    }

    async fn count(&mut self, sql: &str) -> Result<i64> {
        self.inner.count(sql).await
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.inner.table_exists(table).await
    }

    async fn column_exists(&mut self, table: &str, column: &str) -> Result<bool> {
        self.inner.column_exists(table, column).await
    }

    async fn index_exists(&mut self, index: &str) -> Result<bool> {
        self.inner.index_exists(index).await
    }

    async fn foreign_key_exists(&mut self, table: &str, referenced_table: &str) -> Result<bool> {
        self.inner.foreign_key_exists(table, referenced_table).await
    }

    async fn key_values(&mut self, prefix: &str) -> Result<HashMap<String, Option<String>>> {
        self.inner.key_values(prefix).await
    }

    async fn set_key_value(&mut self, key: &str, value: &str) -> Result<()> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);

        self.inner.set_key_value(key, value).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}
