//! Boot-level determination and the core runtime driving it.

mod core_runtime;
mod inspector;
mod level;
mod prober;
mod resolver;
mod routes;
mod state;
mod validation;

pub use core_runtime::*;
pub use inspector::*;
pub use level::*;
pub use prober::*;
pub use resolver::*;
pub use routes::*;
pub use state::*;
pub use validation::*;
