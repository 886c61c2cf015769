use std::collections::HashMap;

use tracing::{info, warn};

use crate::migrations::{state_value_key, ExecutedMigrationPlan, MigrationPlan, MigrationPlanExecutor};

/// Migration plans shipped by packages, run after the core plan.
#[derive(Debug, Clone, Default)]
pub struct PackageMigrationPlans {
    plans: Vec<MigrationPlan>,
}

impl PackageMigrationPlans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, plan: MigrationPlan) -> Self {
        self.plans.push(plan);
        self
    }

    pub fn plans(&self) -> &[MigrationPlan] {
        &self.plans
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Names of the plans whose persisted state, read from `key_values`, is not
    /// their final state. `key_values` holds the rows under
    /// [`MIGRATION_STATE_PREFIX`](crate::migrations::MIGRATION_STATE_PREFIX).
    pub fn pending(&self, key_values: &HashMap<String, Option<String>>) -> Vec<String> {
        self.plans
            .iter()
            .filter(|plan| {
                let state = key_values
                    .get(&state_value_key(plan.name()))
                    .and_then(|value| value.as_deref())
                    .unwrap_or_default();

                state != plan.final_state()
            })
            .map(|plan| plan.name().to_owned())
            .collect()
    }

    /// Runs the plans named in `pending`, in registration order, stopping at
    /// the first failure.
    pub async fn execute_pending(
        &self,
        executor: &MigrationPlanExecutor,
        pending: &[String],
    ) -> Vec<ExecutedMigrationPlan> {
        let mut executed = Vec::new();

        for plan in self
            .plans
            .iter()
            .filter(|plan| pending.iter().any(|name| name == plan.name()))
        {
            info!(plan = plan.name(), "running package migrations");

            let result = executor.execute(plan).await;
            let successful = result.successful;
            executed.push(result);

            if !successful {
                warn!(plan = plan.name(), "package migrations failed, skipping the remaining plans");
                break;
            }
        }

        executed
    }
}
