pub mod loader;
pub mod schema;

pub use schema::{EngineConfig, ServiceConfig};
