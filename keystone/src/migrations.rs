//! Named, resumable migration plans.
//!
//! A [`MigrationPlan`] is a linear graph of states. Each edge is bound to a
//! [`Migration`] step, and the [`MigrationPlanExecutor`] walks the graph from
//! the persisted state to the final state, persisting every state it reaches
//! in the same transaction as the step that produced it.

mod executor;
mod migration;
mod package;
mod plan;
mod upgrader;

pub use executor::*;
pub use migration::*;
pub use package::*;
pub use plan::*;
pub use upgrader::*;
