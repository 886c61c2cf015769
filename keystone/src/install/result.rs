use serde::Serialize;

/// Outcome of an install or upgrade, shaped for an installer UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub success: bool,
    pub message: String,
    pub requires_upgrade: bool,
    /// Coarse progress: 10 not connectable, 30 upgrade required, 90 failed,
    /// 100 done.
    pub percentage: u8,
}

impl BuildResult {
    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            requires_upgrade: false,
            percentage: 100,
        }
    }

    pub fn requires_upgrade() -> Self {
        Self {
            success: true,
            message: "Upgrading database, this may take some time...".to_owned(),
            requires_upgrade: true,
            percentage: 30,
        }
    }

    pub fn not_connectable() -> Self {
        Self {
            success: false,
            message: "Database configuration is invalid. Please check that the entered database exists and that the provided username and password has write access to the database.".to_owned(),
            requires_upgrade: false,
            percentage: 10,
        }
    }

    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            message: format!(
                "The database configuration failed with the following message: {message}\n Please check log file for additional information."
            ),
            requires_upgrade: false,
            percentage: 90,
        }
    }
}

/// Outcome of validating connection details without persisting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstallOperationStatus {
    Success,
    UnknownDatabaseProvider,
    MissingConnectionString,
    MissingProviderName,
    DatabaseConnectionFailed,
}
