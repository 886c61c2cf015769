#![forbid(unsafe_code)]

mod engine;
mod error;
mod key_value;
mod scope;

pub use engine::*;
pub use error::*;
pub use key_value::*;
pub use scope::*;
