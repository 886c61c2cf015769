use std::collections::HashMap;

use chrono::Utc;
use sea_query::{
    ColumnDef, Expr, Iden, InsertStatement, OnConflict, Query, SelectStatement, Table,
    TableCreateStatement,
};

use crate::{error::Result, scope::ScopeProvider};

#[derive(Iden, Clone, Copy)]
pub enum KeyValue {
    #[iden = "ks_key_value"]
    Table,
    Key,
    Value,
    Updated,
}

impl KeyValue {
    pub fn table_name() -> String {
        KeyValue::Table.to_string()
    }
}

pub fn create_key_value_table() -> TableCreateStatement {
    Table::create()
        .table(KeyValue::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(KeyValue::Key)
                .string()
                .string_len(256)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(KeyValue::Value).text())
        .col(
            ColumnDef::new(KeyValue::Updated)
                .string()
                .string_len(64)
                .not_null(),
        )
        .to_owned()
}

pub(crate) fn select_by_prefix(prefix: &str) -> SelectStatement {
    Query::select()
        .columns([KeyValue::Key, KeyValue::Value])
        .from(KeyValue::Table)
        .and_where(Expr::col(KeyValue::Key).like(format!("{prefix}%")))
        .to_owned()
}

pub(crate) fn upsert(key: &str, value: &str) -> Result<InsertStatement> {
    let mut statement = Query::insert();

    statement
        .into_table(KeyValue::Table)
        .columns([KeyValue::Key, KeyValue::Value, KeyValue::Updated]);

    statement.values([
        key.into(),
        value.into(),
        Utc::now().to_rfc3339().into(),
    ])?;

    statement.on_conflict(
        OnConflict::column(KeyValue::Key)
            .update_columns([KeyValue::Value, KeyValue::Updated])
            .to_owned(),
    );

    Ok(statement)
}

/// Reads and writes namespaced key-value rows.
/// Every call runs in its own scope, which joins the calling task's ambient scope when one
/// Every call runs in its own scope, which joins the ambient scope when one
/// is already open, so a write issued while a migration step runs commits or
/// rolls back together with that step.
#[derive(Clone)]
pub struct KeyValueService {
    scopes: ScopeProvider,
}

impl KeyValueService {
    pub fn new(scopes: ScopeProvider) -> Self {
        Self { scopes }
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let values = self.find_by_key_prefix(key).await?;

        Ok(values.get(key).cloned().flatten())
    }

    pub async fn find_by_key_prefix(&self, prefix: &str) -> Result<HashMap<String, Option<String>>> {
        let scope = self.scopes.create_scope().await?;
        let values = scope.key_values(prefix).await?;
        scope.complete().await?;

        Ok(values)
    }

    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let scope = self.scopes.create_scope().await?;
        scope.set_key_value(key, value).await?;
        scope.complete().await
    }
}
