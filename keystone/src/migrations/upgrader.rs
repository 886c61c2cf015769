use tracing::info;

use crate::migrations::{ExecutedMigrationPlan, MigrationPlan, MigrationPlanExecutor};

/// Prefix shared by every persisted plan state. Core and package plans live
/// under the same prefix so one query reads all of them.
pub const MIGRATION_STATE_PREFIX: &str = "Keystone.Upgrader.State+";

/// The key-value key holding the state of the plan named `plan_name`.
pub fn state_value_key(plan_name: &str) -> String {
    format!("{MIGRATION_STATE_PREFIX}{plan_name}")
}

/// Upgrades a database by running one plan to its final state.
#[derive(Debug, Clone)]
pub struct Upgrader {
    plan: MigrationPlan,
}

impl Upgrader {
    pub fn new(plan: MigrationPlan) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }

    pub fn state_value_key(&self) -> String {
        state_value_key(self.plan.name())
    }

    pub async fn execute(&self, executor: &MigrationPlanExecutor) -> ExecutedMigrationPlan {
        let executed = executor.execute(&self.plan).await;

        if executed.successful {
            info!(
                plan = self.plan.name(),
                from = %executed.initial_state,
                to = %executed.final_state,
                "upgrade completed"
            );
        }

        executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_uses_shared_prefix() {
        assert_eq!(
            state_value_key("Keystone.Core"),
            "Keystone.Upgrader.State+Keystone.Core"
        );
    }
}
