//! Configuration module.
//!
//! - `loader`: optional TOML settings merged over built-in defaults
//! - `validator`: turns raw command line inputs into an immutable [`BuildConfig`]
//!
//! [`BuildConfig`]: crate::models::BuildConfig

pub mod loader;
pub mod validator;

pub use loader::{load_settings, Settings};
pub use validator::{build_config, path_to_absolute, BuildInputs};
