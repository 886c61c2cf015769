use std::sync::Arc;

use keystone_store::{KeyValueService, ScopeProvider};
use tracing::{error, info, warn};

use crate::{
    error::MigrationError,
    migrations::{state_value_key, MigrationContext, MigrationPlan, Transition},
};

/// Outcome of running a plan.
#[derive(Debug, Clone)]
pub struct ExecutedMigrationPlan {
    pub plan: MigrationPlan,
    pub initial_state: String,
    /// The last state persisted, equal to `initial_state` when nothing ran.
    pub final_state: String,
    pub successful: bool,
    pub error: Option<Arc<MigrationError>>,
    pub completed_transitions: Vec<Transition>,
}

/// Walks a plan from its persisted state to its final state.
///
/// Each transition runs in its own scope, the step and the write of the state
/// it reaches commit together. The first failing step aborts the run, nothing
/// is retried.
#[derive(Clone)]
pub struct MigrationPlanExecutor {
    scopes: ScopeProvider,
    key_values: KeyValueService,
}

impl MigrationPlanExecutor {
    pub fn new(scopes: ScopeProvider) -> Self {
        Self {
            key_values: KeyValueService::new(scopes.clone()),
            scopes,
        }
    }

    pub fn scope_provider(&self) -> &ScopeProvider {
        &self.scopes
    }

    /// The persisted state of `plan`, empty when the plan never ran.
    pub async fn current_state(&self, plan: &MigrationPlan) -> Result<String, MigrationError> {
        let state = self
            .key_values
            .get_value(&state_value_key(plan.name()))
            .await?;

        Ok(state.unwrap_or_default())
    }

    /// Reads the persisted state of `plan` and runs the remaining transitions.
    pub async fn execute(&self, plan: &MigrationPlan) -> ExecutedMigrationPlan {
        match self.current_state(plan).await {
            Ok(state) => self.execute_from(plan, &state).await,
            Err(err) => {
                error!(plan = plan.name(), error = %err, "unable to read the migration state");

                ExecutedMigrationPlan {
                    plan: plan.clone(),
                    initial_state: String::new(),
                    final_state: String::new(),
                    successful: false,
                    error: Some(Arc::new(err)),
                    completed_transitions: Vec::new(),
                }
            }
        }
    }

    /// Runs the transitions leading from `from_state` to the final state.
    /// Returns without touching the database when `from_state` is final.
    pub async fn execute_from(&self, plan: &MigrationPlan, from_state: &str) -> ExecutedMigrationPlan {
        let mut executed = ExecutedMigrationPlan {
            plan: plan.clone(),
            initial_state: from_state.to_owned(),
            final_state: from_state.to_owned(),
            successful: true,
            error: None,
            completed_transitions: Vec::new(),
        };

        if from_state == plan.final_state() {
            return executed;
        }

        info!(
            plan = plan.name(),
            from = from_state,
            to = plan.final_state(),
            "starting migration plan"
        );

        while executed.final_state != plan.final_state() {
            let Some(transition) = plan.transition_from(&executed.final_state) else {
                let err = MigrationError::UnresolvablePath {
                    plan: plan.name().to_owned(),
                    state: executed.final_state.to_owned(),
                };

                error!(plan = plan.name(), error = %err, "migration plan aborted");

                executed.successful = false;
                executed.error = Some(Arc::new(err));

                return executed;
            };

            if let Err(err) = self.run_transition(plan, transition).await {
                error!(
                    plan = plan.name(),
                    state = %executed.final_state,
                    error = %err,
                    "migration plan aborted"
                );

                executed.successful = false;
                executed.error = Some(Arc::new(err));

                return executed;
            }

            info!(
                plan = plan.name(),
                migration = transition.migration.name(),
                state = %transition.target,
                "migration completed"
            );

            executed.final_state = transition.target.to_owned();
            executed.completed_transitions.push(transition.clone());
        }

        executed
    }

    async fn run_transition(
        &self,
        plan: &MigrationPlan,
        transition: &Transition,
    ) -> Result<(), MigrationError> {
        let scope = self.scopes.create_scope().await?;

        let result = {
            let mut context = MigrationContext::new(plan.name(), &scope, &self.scopes);
            transition.migration.migrate(&mut context).await
        };

        if let Err(source) = result {
            if let Err(err) = scope.rollback().await {
                warn!(error = %err, "rollback after a failed migration failed");
            }

            return Err(MigrationError::Step {
                migration: transition.migration.name().to_owned(),
                target: transition.target.to_owned(),
                source,
            });
        }

        scope
            .set_key_value(&state_value_key(plan.name()), &transition.target)
            .await?;
        scope.complete().await?;

        Ok(())
    }
}
