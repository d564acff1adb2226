pub mod api;
pub mod config;
pub mod error;
pub mod ids;
pub mod normalize;
pub mod types;

pub use error::{OemWatchError, Result};
pub use ids::*;
