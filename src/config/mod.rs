// Configuration module
// Public interface for configuration loading

pub mod constants;
mod loader;
mod settings;

pub use loader::{apply_env_overrides, load_config, EnvOverrides};
pub use settings::{
    AuditConfig, KnowledgeConfig, KnowledgeProvider, LearningConfig, RunConfig, TestsConfig,
};
