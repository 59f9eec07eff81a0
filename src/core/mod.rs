pub mod config;
pub mod error;
pub mod metrics;

pub use config::*;
pub use error::*;
