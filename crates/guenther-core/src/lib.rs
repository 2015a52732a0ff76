pub mod agents;
pub mod config;
pub mod error;
pub mod log;
pub mod webhooks;

pub use error::{GuentherError, Result};
