pub mod agent;
pub mod assistant;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod llm;
pub mod safety;

pub use error::{PilotError, Result};
