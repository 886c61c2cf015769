#![forbid(unsafe_code)]

pub mod config;
pub mod install;
pub mod migrations;
pub mod runtime;

mod error;
mod factory;
mod notification;
mod provider;
mod settings;

pub use error::*;
pub use factory::*;
pub use notification::*;
pub use provider::*;
pub use settings::*;

pub use keystone_store as store;
