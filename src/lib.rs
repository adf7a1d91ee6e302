pub mod access;
pub mod assessment;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod identity;
pub mod models;
pub mod objects;
pub mod payment;
pub mod progress;
pub mod routes;
pub mod store;

pub use engine::Engine;
pub use error::{EngineError, EngineResult};
