use std::collections::HashMap;

use keystone_store::{Result, ScopeProvider};

use crate::{install::BASELINE_MARKER_TABLE, migrations::MIGRATION_STATE_PREFIX};

/// What a single look at the database revealed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseInspection {
    /// Whether the baseline schema is present.
    pub installed: bool,
    /// Every persisted plan state, keyed by state key.
    pub migration_states: HashMap<String, Option<String>>,
}

/// Reads the baseline marker and all plan states in one scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaInspector;

impl SchemaInspector {
    pub async fn inspect(&self, scopes: &ScopeProvider) -> Result<DatabaseInspection> {
        let scope = scopes.create_scope().await?;

        if !scope.table_exists(BASELINE_MARKER_TABLE).await? {
            scope.complete().await?;

            return Ok(DatabaseInspection::default());
        }

        let migration_states = scope.key_values(MIGRATION_STATE_PREFIX).await?;
        scope.complete().await?;

        Ok(DatabaseInspection {
            installed: true,
            migration_states,
        })
    }
}
