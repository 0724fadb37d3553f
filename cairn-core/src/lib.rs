pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod render;

pub use application::agent::{Agent, AgentSettings, QueryRequest};
pub use application::context;
pub use application::tooling;
pub use config::AppConfig;
pub use domain::types;
pub use infrastructure::model;
