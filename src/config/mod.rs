pub mod error;
pub mod loader;
pub mod model;
mod raw;

pub use error::ConfigError;
pub use loader::{load_from_path, load_from_str, load_or_default};
pub use model::*;
