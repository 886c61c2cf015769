//! Baseline schema creation and the bootstrap orchestrator.

mod builder;
mod result;
mod schema;

pub use builder::*;
pub use result::*;
pub use schema::*;
