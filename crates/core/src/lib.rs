//! Shared building blocks for the drip marketing workspace: configuration,
//! the error taxonomy, and the user record every other crate queries.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{DripError, DripResult};
pub use types::User;
