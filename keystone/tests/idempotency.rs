mod common;

use keystone::{
    install::{validate_schema, DatabaseSchemaCreator},
    migrations::{Migration, MigrationContext},
};
use sea_query::{Alias, ColumnDef, Index, Table};

use crate::common::*;

#[tokio::test]
async fn baseline_schema_can_be_created_twice() -> anyhow::Result<()> {
    let factory = create_sqlite_factory("baseline_twice").await?;
    let scopes = factory.scope_provider().unwrap();

    let scope = scopes.create_scope().await?;
    DatabaseSchemaCreator::new(&scope).create_schema().await?;
    DatabaseSchemaCreator::new(&scope).create_schema().await?;
    scope.complete().await?;

    let scope = scopes.create_scope().await?;
    DatabaseSchemaCreator::new(&scope).create_schema().await?;

    let schema = validate_schema(&scope).await?;
    let users = scope.count("SELECT COUNT(*) FROM ks_user").await?;
    let groups = scope.count("SELECT COUNT(*) FROM ks_user_group").await?;
    let memberships = scope
        .count("SELECT COUNT(*) FROM ks_user2user_group")
        .await?;
    scope.complete().await?;

    assert!(schema.is_valid(), "{}", schema.summary());
    assert_eq!(users, 1);
    assert_eq!(groups, 1);
    assert_eq!(memberships, 1);

    Ok(())
}

#[tokio::test]
async fn steps_rerun_against_a_modified_schema() -> anyhow::Result<()> {
    let factory = create_sqlite_factory("steps_twice").await?;
    install(&factory, &core_plan_v1()?).await?;
    let scopes = factory.scope_provider().unwrap();

    let scope = scopes.create_scope().await?;
    let mut context = MigrationContext::new(CORE_PLAN, &scope, &scopes);

    AddUserNickname.migrate(&mut context).await?;
    AddUserNickname.migrate(&mut context).await?;
    CreateAlpha.migrate(&mut context).await?;
    CreateAlpha.migrate(&mut context).await?;

    let nickname = ColumnDef::new(Alias::new("nickname")).string().null().to_owned();
    assert!(!context.add_column("ks_user", nickname).await?);

    let index = Index::create()
        .name("idx_alpha_id")
        .table(Alias::new("alpha"))
        .col(Alias::new("id"))
        .to_owned();
    context.create_index(index.clone()).await?;
    context.create_index(index).await?;

    context
        .create_table(
            Table::create()
                .table(Alias::new("alpha"))
                .col(ColumnDef::new(Alias::new("id")).integer().not_null().primary_key())
                .to_owned(),
        )
        .await?;

    assert!(context.index_exists("idx_alpha_id").await?);
    assert_eq!(
        scope
            .count("SELECT COUNT(*) FROM pragma_table_info('ks_user') WHERE name = 'nickname'")
            .await?,
        1
    );
    scope.complete().await?;

    assert!(column_exists(&factory, "ks_user", "nickname").await?);
    assert!(table_exists(&factory, "alpha").await?);

    Ok(())
}
