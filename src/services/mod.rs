pub mod catalog;
pub mod duplicate_resolver;
pub mod excel;
pub mod orchestrator;
pub mod preview_store;
pub mod progress;
pub mod session;
