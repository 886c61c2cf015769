use serde::Serialize;

use crate::{
    error::BootFailedError,
    runtime::{LevelDecision, RuntimeLevel, RuntimeLevelReason},
};

/// The process's view of its database. Owned by the core runtime, everything
/// else reads snapshots of it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeState {
    level: RuntimeLevel,
    reason: RuntimeLevelReason,
    #[serde(skip)]
    boot_failed: Option<BootFailedError>,
    current_migration_state: Option<String>,
    final_migration_state: Option<String>,
    pending_package_migrations: Vec<String>,
}

impl RuntimeState {
    pub fn booting() -> Self {
        Self {
            level: RuntimeLevel::Boot,
            ..Default::default()
        }
    }

    pub fn level(&self) -> RuntimeLevel {
        self.level
    }

    pub fn reason(&self) -> RuntimeLevelReason {
        self.reason
    }

    pub fn boot_failed(&self) -> Option<&BootFailedError> {
        self.boot_failed.as_ref()
    }

    pub fn current_migration_state(&self) -> Option<&str> {
        self.current_migration_state.as_deref()
    }

    pub fn final_migration_state(&self) -> Option<&str> {
        self.final_migration_state.as_deref()
    }

    pub fn pending_package_migrations(&self) -> &[String] {
        &self.pending_package_migrations
    }

    /// Whether the process may go on booting: not failed, or failed only
    /// because a creatable database is missing.
    pub fn can_boot(&self) -> bool {
        self.level != RuntimeLevel::BootFailed
            || (self.boot_failed.is_none()
                && self.reason == RuntimeLevelReason::InstallMissingDatabase)
    }

    /// Applies a decision. Ignored once a fatal error is stored.
    pub fn apply(&mut self, decision: LevelDecision) {
        if self.boot_failed.is_some() {
            return;
        }

        self.level = decision.level;
        self.reason = decision.reason;
        self.boot_failed = decision.boot_failed;
        self.current_migration_state = decision.current_migration_state;
        self.final_migration_state = decision.final_migration_state;
        self.pending_package_migrations = decision.pending_package_migrations;
    }

    /// Forces the level, used after an unattended upgrade.
    pub fn configure(&mut self, level: RuntimeLevel, reason: RuntimeLevelReason) {
        if self.boot_failed.is_some() {
            return;
        }

        self.level = level;
        self.reason = reason;
    }

    /// Stores a fatal error. The state stays `BootFailed` from now on.
    pub fn fail(&mut self, error: BootFailedError) {
        self.level = RuntimeLevel::BootFailed;
        self.reason = error.reason;
        self.boot_failed = Some(error);
    }
}
