pub mod artifact;
pub mod audit;
pub mod checker;
pub mod clarification;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gates;
pub mod phase;
pub mod process;
pub mod project;
pub mod remediation;
pub mod rollback;
pub mod store;
pub mod ui;
pub mod util;
pub mod validation;
