// selfevolve - self-repairing test loop for a Python workspace
// Library exports

// Core pipeline
pub mod controller;
pub mod patcher;
pub mod planner;
pub mod reflect;
pub mod runner;
pub mod signature;
pub mod store;

// Workspace state and collaborators
pub mod audit;
pub mod context;
pub mod knowledge;

// Ambient
pub mod config;
pub mod errors;
pub mod logging;

pub use controller::{Controller, RunReport, StopReason};
pub use errors::{FixerError, FixerResult};
