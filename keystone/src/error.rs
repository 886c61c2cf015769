use std::sync::Arc;

use keystone_store::StoreError;

use crate::runtime::RuntimeLevelReason;

/// A fatal boot error. Once stored on the runtime state the process stays
/// `BootFailed` and every request is answered with this message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct BootFailedError {
    pub reason: RuntimeLevelReason,
    pub message: String,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl BootFailedError {
    pub fn new(reason: RuntimeLevelReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("invalid migration plan `{plan}`: {message}")]
    InvalidPlan { plan: String, message: String },

    #[error("unable to resolve a transition from state `{state}` in plan `{plan}`")]
    UnresolvablePath { plan: String, state: String },

    #[error("migration `{migration}` to state `{target}` failed: {source}")]
    Step {
        migration: String,
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("store `{0}`")]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("unknown database provider `{0}`")]
    UnknownProvider(String),

    #[error("the database is already configured")]
    AlreadyConfigured,

    #[error("the database is not configured")]
    NotConfigured,

    #[error("no configuration storage to persist the connection string to")]
    NoConfigStorage,

    #[error("timed out waiting for the connection string to be reloaded")]
    ConfigurationReloadTimeout,

    #[error("store `{0}`")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Migration(Arc<MigrationError>),

    #[error("io `{0}`")]
    Io(#[from] std::io::Error),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("{0}")]
    Any(#[from] anyhow::Error),
}

impl From<MigrationError> for InstallError {
    fn from(value: MigrationError) -> Self {
        InstallError::Migration(Arc::new(value))
    }
}
