use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use crate::{error::MigrationError, migrations::Migration};

/// An edge of a migration plan.
#[derive(Clone)]
pub struct Transition {
    pub source: String,
    pub target: String,
    pub migration: Arc<dyn Migration>,
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("migration", &self.migration.name())
            .finish()
    }
}

/// An immutable, validated migration graph.
///
/// Every state has at most one outgoing transition and every state leads to
/// the single final state, so the path from any state is deterministic. The
/// implicit initial state is the empty string.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    name: String,
    transitions: HashMap<String, Transition>,
    final_state: String,
}

impl MigrationPlan {
    pub fn builder(name: impl Into<String>) -> MigrationPlanBuilder {
        MigrationPlanBuilder::new(name)
    }

    /// The plan name, also the key its state is persisted under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_state(&self) -> &str {
        ""
    }

    pub fn final_state(&self) -> &str {
        &self.final_state
    }

    pub fn transition_from(&self, state: &str) -> Option<&Transition> {
        self.transitions.get(state)
    }

    /// Whether `state` is a state of this plan.
    pub fn contains_state(&self, state: &str) -> bool {
        state == self.final_state || self.transitions.contains_key(state)
    }

    /// Transitions leading from `state` to the final state, in order.
    pub fn path_from(&self, state: &str) -> Result<Vec<&Transition>, MigrationError> {
        let mut path = Vec::new();
        let mut current = state;

        while current != self.final_state {
            let transition =
                self.transitions
                    .get(current)
                    .ok_or_else(|| MigrationError::UnresolvablePath {
                        plan: self.name.to_owned(),
                        state: current.to_owned(),
                    })?;

            path.push(transition);
            current = transition.target.as_str();
        }

        Ok(path)
    }
}

/// Builds a [`MigrationPlan`] one edge at a time.
///
/// ```ignore
/// let plan = MigrationPlan::builder("Keystone.Core")
///     .from("")
///     .to::<CreateUserTable>("user-table")
///     .to::<AddUserEmail>("user-email")
///     .build()?;
/// ```
pub struct MigrationPlanBuilder {
    name: String,
    cursor: Option<String>,
    transitions: HashMap<String, Transition>,
    errors: Vec<String>,
}

impl MigrationPlanBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cursor: None,
            transitions: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Moves the cursor to `state`, the next transition starts there.
    pub fn from(mut self, state: impl Into<String>) -> Self {
        self.cursor = Some(state.into());
        self
    }

    /// Adds a transition from the cursor to `target` running `M`, then moves
    /// the cursor to `target`.
    pub fn to<M: Migration + Default + 'static>(self, target: impl Into<String>) -> Self {
        self.to_migration(target, M::default())
    }

    pub fn to_migration<M: Migration + 'static>(
        mut self,
        target: impl Into<String>,
        migration: M,
    ) -> Self {
        let target = target.into();
        let Some(source) = self.cursor.take() else {
            self.errors
                .push(format!("transition to `{target}` has no source state"));
            return self;
        };

        if target.trim().is_empty() {
            self.errors
                .push(format!("transition from `{source}` has an empty target state"));
        } else if source == target {
            self.errors
                .push(format!("transition from `{source}` targets itself"));
        } else if self.transitions.contains_key(&source) {
            self.errors
                .push(format!("state `{source}` already has an outgoing transition"));
        } else {
            self.transitions.insert(
                source.to_owned(),
                Transition {
                    source,
                    target: target.to_owned(),
                    migration: Arc::new(migration),
                },
            );
        }

        self.cursor = Some(target);
        self
    }

    pub fn build(self) -> Result<MigrationPlan, MigrationError> {
        let invalid = |message: String| MigrationError::InvalidPlan {
            plan: self.name.to_owned(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("plan name is empty".to_owned()));
        }

        if let Some(message) = self.errors.first() {
            return Err(invalid(message.to_owned()));
        }

        if !self.transitions.contains_key("") {
            return Err(invalid("no transition from the initial state".to_owned()));
        }

        let mut terminals = self
            .transitions
            .values()
            .map(|transition| transition.target.as_str())
            .filter(|target| !self.transitions.contains_key(*target))
            .collect::<Vec<_>>();
        terminals.sort_unstable();
        terminals.dedup();

        let final_state = match terminals.as_slice() {
            [state] => state.to_string(),
            [] => return Err(invalid("the plan has no final state".to_owned())),
            states => {
                return Err(invalid(format!(
                    "the plan has multiple final states: {}",
                    states.join(", ")
                )))
            }
        };

        for source in self.transitions.keys() {
            let mut visited = HashSet::new();
            let mut current = source.as_str();

            while current != final_state {
                if !visited.insert(current) {
                    return Err(invalid(format!("state `{current}` is part of a cycle")));
                }

                match self.transitions.get(current) {
                    Some(transition) => current = transition.target.as_str(),
                    None => break,
                }
            }
        }

        Ok(MigrationPlan {
            name: self.name.to_owned(),
            transitions: self.transitions,
            final_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::migrations::MigrationContext;

    #[derive(Default)]
    struct Noop;

    #[async_trait]
    impl Migration for Noop {
        async fn migrate(&self, _context: &mut MigrationContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn assert_invalid(result: Result<MigrationPlan, MigrationError>, expected: &str) {
        match result {
            Err(MigrationError::InvalidPlan { message, .. }) => {
                assert!(message.contains(expected), "`{message}` lacks `{expected}`")
            }
            other => panic!("expected an invalid plan, got {other:?}"),
        }
    }

    #[test]
    fn linear_plan() {
        let plan = MigrationPlan::builder("test")
            .from("")
            .to::<Noop>("a")
            .to::<Noop>("b")
            .to::<Noop>("done")
            .build()
            .unwrap();

        assert_eq!(plan.name(), "test");
        assert_eq!(plan.final_state(), "done");
        assert!(plan.contains_state("b"));
        assert!(!plan.contains_state("c"));
        assert_eq!(plan.transition_from("a").unwrap().target, "b");
        assert_eq!(plan.transition_from("a").unwrap().migration.name(), "Noop");

        let targets = plan
            .path_from("a")
            .unwrap()
            .into_iter()
            .map(|t| t.target.as_str())
            .collect::<Vec<_>>();
        assert_eq!(targets, ["b", "done"]);
        assert!(plan.path_from("done").unwrap().is_empty());
        assert!(matches!(
            plan.path_from("unknown"),
            Err(MigrationError::UnresolvablePath { state, .. }) if state == "unknown"
        ));
    }

    #[test]
    fn merged_branch() {
        let plan = MigrationPlan::builder("test")
            .from("")
            .to::<Noop>("a")
            .to::<Noop>("done")
            .from("legacy")
            .to::<Noop>("a")
            .build()
            .unwrap();

        assert_eq!(plan.final_state(), "done");
        assert_eq!(plan.path_from("legacy").unwrap().len(), 2);
    }

    #[test]
    fn duplicate_source() {
        let result = MigrationPlan::builder("test")
            .from("")
            .to::<Noop>("a")
            .from("")
            .to::<Noop>("b")
            .build();

        assert_invalid(result, "already has an outgoing transition");
    }

    #[test]
    fn missing_initial_state() {
        let result = MigrationPlan::builder("test")
            .from("a")
            .to::<Noop>("b")
            .build();

        assert_invalid(result, "initial state");
    }

    #[test]
    fn multiple_final_states() {
        let result = MigrationPlan::builder("test")
            .from("")
            .to::<Noop>("a")
            .from("x")
            .to::<Noop>("y")
            .build();

        assert_invalid(result, "multiple final states");
    }

    #[test]
    fn cycle() {
        let result = MigrationPlan::builder("test")
            .from("")
            .to::<Noop>("done")
            .from("a")
            .to::<Noop>("b")
            .to::<Noop>("a")
            .build();

        assert_invalid(result, "cycle");
    }

    #[test]
    fn empty_target() {
        let result = MigrationPlan::builder("test")
            .from("")
            .to::<Noop>("")
            .build();

        assert_invalid(result, "empty target");
    }

    #[test]
    fn missing_source() {
        let result = MigrationPlan::builder("test").to::<Noop>("a").build();

        assert_invalid(result, "no source state");
    }
}
