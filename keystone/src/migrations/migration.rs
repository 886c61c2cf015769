use async_trait::async_trait;
use keystone_store::{Backend, Result, Scope, ScopeProvider};
use sea_query::{Alias, ColumnDef, IndexCreateStatement, Table, TableCreateStatement};
use tracing::debug;

/// One schema or data change, bound to an edge of a migration plan.
///
/// Steps must be idempotent: a crash between a step's own statements and the
/// commit of its transaction, or an engine without transactional DDL, means
/// the step can run again against a partially modified schema. Prefer the
/// idempotent helpers of [`MigrationContext`] over raw statements.
#[async_trait]
pub trait Migration: Send + Sync {
    fn name(&self) -> &str {
        let name = std::any::type_name::<Self>();

        name.rsplit("::").next().unwrap_or(name)
    }

    async fn migrate(&self, context: &mut MigrationContext<'_>) -> anyhow::Result<()>;
}

/// What a running step can see: the plan it belongs to and the scope its
/// transaction runs in.
pub struct MigrationContext<'a> {
    plan: &'a str,
    scope: &'a Scope,
    scopes: &'a ScopeProvider,
}

impl<'a> MigrationContext<'a> {
    pub fn new(plan: &'a str, scope: &'a Scope, scopes: &'a ScopeProvider) -> Self {
        Self {
            plan,
            scope,
            scopes,
        }
    }

    pub fn plan_name(&self) -> &str {
        self.plan
    }

    pub fn scope(&self) -> &Scope {
        self.scope
    }

    /// Scopes created from this provider join the step's transaction.
    pub fn scope_provider(&self) -> &ScopeProvider {
        self.scopes
    }

    pub fn backend(&self) -> Backend {
        self.scope.backend()
    }

    pub async fn execute(&self, sql: &str) -> Result<u64> {
        self.scope.execute(sql).await
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        self.scope.table_exists(table).await
    }

    pub async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        self.scope.column_exists(table, column).await
    }

    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        self.scope.index_exists(index).await
    }

    /// Creates a table, doing nothing when it already exists.
    pub async fn create_table(&self, mut statement: TableCreateStatement) -> Result<()> {
        statement.if_not_exists();
        self.scope.execute_schema(&statement).await?;

        Ok(())
    }

    pub async fn create_index(&self, mut statement: IndexCreateStatement) -> Result<()> {
        statement.if_not_exists();
        self.scope.execute_schema(&statement).await?;

        Ok(())
    }

    /// Adds `column` to `table` unless a column with that name exists.
    /// Returns whether the column was added.
    pub async fn add_column(&self, table: &str, mut column: ColumnDef) -> Result<bool> {
        let name = column.get_column_name();

        if self.scope.column_exists(table, &name).await? {
            debug!(table, column = %name, "column already exists, skipping");

            return Ok(false);
        }

        let statement = Table::alter()
            .table(Alias::new(table))
            .add_column(&mut column)
            .to_owned();

        self.scope.execute_schema(&statement).await?;

        Ok(true)
    }
}
