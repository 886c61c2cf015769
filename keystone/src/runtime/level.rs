use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse state of the process with respect to its database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeLevel {
    #[default]
    Unknown,
    Boot,
    Install,
    Upgrade,
    Run,
    /// Sticky for the lifetime of the process once a fatal error is stored.
    BootFailed,
}

impl fmt::Display for RuntimeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a [`RuntimeLevel`] was chosen. Diagnostic only, callers may branch on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeLevelReason {
    #[default]
    Unknown,
    BootFailedOnException,
    BootFailedCannotConnectToDatabase,
    BootFailedCannotCheckUpgradeState,
    InstallNoDatabase,
    InstallMissingDatabase,
    InstallEmptyDatabase,
    UpgradeMigrations,
    UpgradePackageMigrations,
    Run,
}

impl RuntimeLevelReason {
    /// Reasons for which an unattended install may proceed.
    pub fn is_install(&self) -> bool {
        matches!(
            self,
            RuntimeLevelReason::InstallMissingDatabase | RuntimeLevelReason::InstallEmptyDatabase
        )
    }
}

impl fmt::Display for RuntimeLevelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
