use std::fmt::Write;

use chrono::Utc;
use keystone_store::{create_key_value_table, KeyValue, Result, Scope};
use sea_query::{
    ColumnDef, ForeignKey, ForeignKeyAction, Iden, Index, IndexCreateStatement, OnConflict, Query,
    Table, TableCreateStatement,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::migrations::{state_value_key, MigrationPlan};

/// Id of the superuser seeded by the baseline schema.
pub const SUPER_USER_ID: i32 = -1;

/// Password the superuser is seeded with, replaced when the operator
/// finishes the install.
pub const DEFAULT_SUPER_USER_PASSWORD: &str = "default";

pub const ADMIN_GROUP_ID: i32 = 1;

/// Presence of this table marks a database as installed.
pub const BASELINE_MARKER_TABLE: &str = "ks_user";

#[derive(Iden, Clone, Copy)]
pub enum User {
    #[iden = "ks_user"]
    Table,
    Id,
    UserName,
    Email,
    Password,
    Disabled,
    CreateDate,
}

#[derive(Iden, Clone, Copy)]
pub enum UserGroup {
    #[iden = "ks_user_group"]
    Table,
    Id,
    Alias,
    Name,
}

#[derive(Iden, Clone, Copy)]
pub enum UserToUserGroup {
    #[iden = "ks_user2user_group"]
    Table,
    UserId,
    UserGroupId,
}

#[derive(Iden, Clone, Copy)]
pub enum Language {
    #[iden = "ks_language"]
    Table,
    Id,
    IsoCode,
    CultureName,
}

#[derive(Iden, Clone, Copy)]
pub enum Node {
    #[iden = "ks_node"]
    Table,
    Id,
    UniqueId,
    ParentId,
    Level,
    Path,
    SortOrder,
    Text,
    CreateDate,
}

/// One table of the baseline schema with the indexes and foreign keys that
/// belong to it.
pub struct TableDefinition {
    pub name: String,
    pub create: TableCreateStatement,
    pub indexes: Vec<(String, IndexCreateStatement)>,
    /// Tables referenced by a foreign key of this table.
    pub references: Vec<String>,
}

/// The baseline schema, in creation order.
pub fn baseline_tables() -> Vec<TableDefinition> {
    vec![
        TableDefinition {
            name: User::Table.to_string(),
            create: Table::create()
                .table(User::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(User::Id)
                        .integer()
                        .not_null()
                        .auto_increment()
                        .primary_key(),
                )
                .col(
                    ColumnDef::new(User::UserName)
                        .string()
                        .string_len(255)
                        .not_null(),
                )
                .col(ColumnDef::new(User::Email).string().string_len(255))
                .col(
                    ColumnDef::new(User::Password)
                        .string()
                        .string_len(500)
                        .not_null(),
                )
                .col(
                    ColumnDef::new(User::Disabled)
                        .boolean()
                        .not_null()
                        .default(false),
                )
                .col(
                    ColumnDef::new(User::CreateDate)
                        .string()
                        .string_len(64)
                        .not_null(),
                )
                .to_owned(),
            indexes: vec![unique_index("ix_ks_user_user_name", User::Table, User::UserName)],
            references: vec![],
        },
        TableDefinition {
            name: UserGroup::Table.to_string(),
            create: Table::create()
                .table(UserGroup::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(UserGroup::Id)
                        .integer()
                        .not_null()
                        .auto_increment()
                        .primary_key(),
                )
                .col(
                    ColumnDef::new(UserGroup::Alias)
                        .string()
                        .string_len(200)
                        .not_null(),
                )
                .col(
                    ColumnDef::new(UserGroup::Name)
                        .string()
                        .string_len(200)
                        .not_null(),
                )
                .to_owned(),
            indexes: vec![unique_index(
                "ix_ks_user_group_alias",
                UserGroup::Table,
                UserGroup::Alias,
            )],
            references: vec![],
        },
        TableDefinition {
            name: UserToUserGroup::Table.to_string(),
            create: Table::create()
                .table(UserToUserGroup::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(UserToUserGroup::UserId)
                        .integer()
                        .not_null(),
                )
                .col(
                    ColumnDef::new(UserToUserGroup::UserGroupId)
                        .integer()
                        .not_null(),
                )
                .primary_key(
                    Index::create()
                        .col(UserToUserGroup::UserId)
                        .col(UserToUserGroup::UserGroupId),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_ks_user2user_group_ks_user")
                        .from(UserToUserGroup::Table, UserToUserGroup::UserId)
                        .to(User::Table, User::Id)
                        .on_delete(ForeignKeyAction::Cascade),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_ks_user2user_group_ks_user_group")
                        .from(UserToUserGroup::Table, UserToUserGroup::UserGroupId)
                        .to(UserGroup::Table, UserGroup::Id)
                        .on_delete(ForeignKeyAction::Cascade),
                )
                .to_owned(),
            indexes: vec![],
            references: vec![User::Table.to_string(), UserGroup::Table.to_string()],
        },
        TableDefinition {
            name: Language::Table.to_string(),
            create: Table::create()
                .table(Language::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(Language::Id)
                        .integer()
                        .not_null()
                        .auto_increment()
                        .primary_key(),
                )
                .col(
                    ColumnDef::new(Language::IsoCode)
                        .string()
                        .string_len(14)
                        .not_null(),
                )
                .col(
                    ColumnDef::new(Language::CultureName)
                        .string()
                        .string_len(100),
                )
                .to_owned(),
            indexes: vec![unique_index(
                "ix_ks_language_iso_code",
                Language::Table,
                Language::IsoCode,
            )],
            references: vec![],
        },
        TableDefinition {
            name: Node::Table.to_string(),
            create: Table::create()
                .table(Node::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(Node::Id)
                        .integer()
                        .not_null()
                        .auto_increment()
                        .primary_key(),
                )
                .col(
                    ColumnDef::new(Node::UniqueId)
                        .string()
                        .string_len(36)
                        .not_null(),
                )
                .col(ColumnDef::new(Node::ParentId).integer())
                .col(ColumnDef::new(Node::Level).integer().not_null())
                .col(
                    ColumnDef::new(Node::Path)
                        .string()
                        .string_len(150)
                        .not_null(),
                )
                .col(ColumnDef::new(Node::SortOrder).integer().not_null())
                .col(ColumnDef::new(Node::Text).string().string_len(255))
                .col(
                    ColumnDef::new(Node::CreateDate)
                        .string()
                        .string_len(64)
                        .not_null(),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_ks_node_parent")
                        .from(Node::Table, Node::ParentId)
                        .to(Node::Table, Node::Id),
                )
                .to_owned(),
            indexes: vec![
                unique_index("ix_ks_node_unique_id", Node::Table, Node::UniqueId),
                (
                    "ix_ks_node_parent_id".to_owned(),
                    Index::create()
                        .if_not_exists()
                        .name("ix_ks_node_parent_id")
                        .table(Node::Table)
                        .col(Node::ParentId)
                        .to_owned(),
                ),
            ],
            references: vec![Node::Table.to_string()],
        },
        TableDefinition {
            name: KeyValue::table_name(),
            create: create_key_value_table(),
            indexes: vec![],
            references: vec![],
        },
    ]
}

fn unique_index<T, C>(name: &str, table: T, column: C) -> (String, IndexCreateStatement)
where
    T: Iden + 'static,
    C: Iden + 'static,
{
    (
        name.to_owned(),
        Index::create()
            .if_not_exists()
            .name(name)
            .table(table)
            .col(column)
            .unique()
            .to_owned(),
    )
}

/// Creates the baseline schema and its seed data in one pass.
///
/// Every statement is `IF NOT EXISTS` or `ON CONFLICT DO NOTHING`, running the
/// creator twice leaves the database unchanged.
pub struct DatabaseSchemaCreator<'a> {
    scope: &'a Scope,
}

impl<'a> DatabaseSchemaCreator<'a> {
    pub fn new(scope: &'a Scope) -> Self {
        Self { scope }
    }

    /// Creates tables, indexes and seed rows, then records `core_plan` as
    /// fully applied since the baseline already is its final state.
    pub async fn initialize(&self, core_plan: &MigrationPlan) -> Result<()> {
        self.create_schema().await?;

        self.scope
            .set_key_value(&state_value_key(core_plan.name()), core_plan.final_state())
            .await?;

        info!(plan = core_plan.name(), state = core_plan.final_state(), "baseline schema created");

        Ok(())
    }

    /// Creates tables, indexes and seed rows without recording any plan
    /// state.
    pub async fn create_schema(&self) -> Result<()> {
        for table in baseline_tables() {
            debug!(table = %table.name, "creating table");
            self.scope.execute_schema(&table.create).await?;

            for (_, index) in &table.indexes {
                self.scope.execute_schema(index).await?;
            }
        }

        self.seed().await
    }

    async fn seed(&self) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        let group = Query::insert()
            .into_table(UserGroup::Table)
            .columns([UserGroup::Id, UserGroup::Alias, UserGroup::Name])
            .values([ADMIN_GROUP_ID.into(), "admin".into(), "Administrators".into()])?
            .on_conflict(OnConflict::column(UserGroup::Id).do_nothing().to_owned())
            .to_owned();

        let super_user = Query::insert()
            .into_table(User::Table)
            .columns([
                User::Id,
                User::UserName,
                User::Email,
                User::Password,
                User::Disabled,
                User::CreateDate,
            ])
            .values([
                SUPER_USER_ID.into(),
                "admin".into(),
                "".into(),
                DEFAULT_SUPER_USER_PASSWORD.into(),
                false.into(),
                now.as_str().into(),
            ])?
            .on_conflict(OnConflict::column(User::Id).do_nothing().to_owned())
            .to_owned();

        let membership = Query::insert()
            .into_table(UserToUserGroup::Table)
            .columns([UserToUserGroup::UserId, UserToUserGroup::UserGroupId])
            .values([SUPER_USER_ID.into(), ADMIN_GROUP_ID.into()])?
            .on_conflict(
                OnConflict::columns([UserToUserGroup::UserId, UserToUserGroup::UserGroupId])
                    .do_nothing()
                    .to_owned(),
            )
            .to_owned();

        let language = Query::insert()
            .into_table(Language::Table)
            .columns([Language::Id, Language::IsoCode, Language::CultureName])
            .values([1i32.into(), "en-US".into(), "English (United States)".into()])?
            .on_conflict(OnConflict::column(Language::Id).do_nothing().to_owned())
            .to_owned();

        let root = Query::insert()
            .into_table(Node::Table)
            .columns([
                Node::Id,
                Node::UniqueId,
                Node::ParentId,
                Node::Level,
                Node::Path,
                Node::SortOrder,
                Node::Text,
                Node::CreateDate,
            ])
            .values([
                (-1i32).into(),
                Uuid::new_v4().to_string().into(),
                Option::<i32>::None.into(),
                0i32.into(),
                "-1".into(),
                0i32.into(),
                "Root".into(),
                now.as_str().into(),
            ])?
            .on_conflict(OnConflict::column(Node::Id).do_nothing().to_owned())
            .to_owned();

        for statement in [group, super_user, membership, language, root] {
            self.scope.execute_query(&statement).await?;
        }

        Ok(())
    }
}

/// Differences between the live database and the baseline schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSchemaResult {
    pub valid_tables: Vec<String>,
    pub missing_tables: Vec<String>,
    pub valid_indexes: Vec<String>,
    pub missing_indexes: Vec<String>,
    pub valid_foreign_keys: Vec<String>,
    pub missing_foreign_keys: Vec<String>,
}

impl DatabaseSchemaResult {
    pub fn is_valid(&self) -> bool {
        self.missing_tables.is_empty()
            && self.missing_indexes.is_empty()
            && self.missing_foreign_keys.is_empty()
    }

    /// Whether the database holds an installed version, upgradable or not.
    pub fn determine_has_installed_version(&self) -> bool {
        self.valid_tables
            .iter()
            .any(|table| table == BASELINE_MARKER_TABLE)
    }

    pub fn summary(&self) -> String {
        if self.is_valid() {
            return "The database schema is valid.".to_owned();
        }

        let mut summary = String::new();

        for (label, items) in [
            ("tables", &self.missing_tables),
            ("indexes", &self.missing_indexes),
            ("foreign keys", &self.missing_foreign_keys),
        ] {
            if !items.is_empty() {
                let _ = writeln!(summary, "Missing {label}: {}", items.join(", "));
            }
        }

        summary.trim_end().to_owned()
    }
}

/// Compares the database behind `scope` with [`baseline_tables`].
pub async fn validate_schema(scope: &Scope) -> Result<DatabaseSchemaResult> {
    let mut result = DatabaseSchemaResult::default();

    for table in baseline_tables() {
        if !scope.table_exists(&table.name).await? {
            result.missing_indexes.extend(table.indexes.into_iter().map(|(name, _)| name));
            result.missing_foreign_keys.extend(
                table
                    .references
                    .iter()
                    .map(|referenced| format!("{}->{referenced}", table.name)),
            );
            result.missing_tables.push(table.name);

            continue;
        }

        for (name, _) in table.indexes {
            if scope.index_exists(&name).await? {
                result.valid_indexes.push(name);
            } else {
                result.missing_indexes.push(name);
            }
        }

        for referenced in &table.references {
            let name = format!("{}->{referenced}", table.name);

            if scope.foreign_key_exists(&table.name, referenced).await? {
                result.valid_foreign_keys.push(name);
            } else {
                result.missing_foreign_keys.push(name);
            }
        }

        result.valid_tables.push(table.name);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_missing_items() {
        let result = DatabaseSchemaResult {
            valid_tables: vec!["ks_user".to_owned()],
            missing_tables: vec!["ks_node".to_owned()],
            missing_indexes: vec!["ix_ks_node_unique_id".to_owned()],
            ..Default::default()
        };

        assert!(!result.is_valid());
        assert!(result.determine_has_installed_version());
        assert_eq!(
            result.summary(),
            "Missing tables: ks_node\nMissing indexes: ix_ks_node_unique_id"
        );
        assert_eq!(
            DatabaseSchemaResult::default().summary(),
            "The database schema is valid."
        );
        assert!(!DatabaseSchemaResult::default().determine_has_installed_version());
    }

    #[test]
    fn baseline_starts_with_marker_table() {
        let tables = baseline_tables();

        assert_eq!(tables[0].name, BASELINE_MARKER_TABLE);
        assert!(tables.iter().any(|t| t.name == KeyValue::table_name()));
    }
}
