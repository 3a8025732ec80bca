pub mod candidate_generator;
pub mod llm_service;
pub mod metric_dictionary; // Catalog index and intent resolution
pub mod repair_controller;
pub mod schema_provider; // Cached table schema (static or live Timeplus)
pub mod translation_service;

pub use candidate_generator::*;
pub use llm_service::*;
pub use metric_dictionary::*;
pub use repair_controller::*;
pub use schema_provider::*;
pub use translation_service::*;
