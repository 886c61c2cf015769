use std::path::Path;

use keystone_store::{Engine, ScopeProvider, SqliteEngine};

pub async fn create_sqlite_scopes(key: impl Into<String>) -> anyhow::Result<ScopeProvider> {
    let key = key.into();
    let dir = Path::new("../target/tmp");
    std::fs::create_dir_all(dir)?;

    let path = dir.join(format!("test_store_{key}.db"));
    for suffix in ["", "-journal", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }

    let engine = SqliteEngine::connect_lazy(&format!("sqlite:{}", path.display()))?;
    engine.create_database().await?;

    Ok(ScopeProvider::new(engine))
}

pub async fn create_note_table(scopes: &ScopeProvider) -> anyhow::Result<()> {
    let scope = scopes.create_scope().await?;
    scope
        .execute("CREATE TABLE IF NOT EXISTS note (id INTEGER PRIMARY KEY, body TEXT NOT NULL)")
        .await?;
    scope.complete().await?;

    Ok(())
}

pub async fn count_notes(scopes: &ScopeProvider) -> anyhow::Result<i64> {
    let scope = scopes.create_scope().await?;
    let count = scope.count("SELECT COUNT(*) FROM note").await?;
    scope.complete().await?;

    Ok(count)
}
