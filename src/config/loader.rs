// Configuration loader
// Loads run parameters from <workspace>/.selfevolve/config.toml (or an explicit
// path) and applies environment overrides

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::constants::{CONFIG_FILE, STATE_DIR};
use super::settings::{KnowledgeProvider, RunConfig};

/// Environment values the loader consults. Core logic never reads the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub firecrawl_api_key: Option<String>,
    pub pytest_args: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            firecrawl_api_key: std::env::var("FIRECRAWL_API_KEY").ok(),
            pytest_args: std::env::var("PYTEST_ARGS").ok(),
        }
    }
}

/// Load configuration for `workspace`.
///
/// An explicit path must exist; the default location is optional.
pub fn load_config(workspace: &Path, explicit: Option<&Path>) -> Result<RunConfig> {
    let mut config = match explicit {
        Some(path) => read_config_file(path)?,
        None => {
            let path = workspace.join(STATE_DIR).join(CONFIG_FILE);
            if path.exists() {
                read_config_file(&path)?
            } else {
                debug!("No config file at {}, using defaults", path.display());
                RunConfig::default()
            }
        }
    };

    config.workspace = workspace.to_path_buf();
    apply_env_overrides(&mut config, EnvOverrides::from_env());
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<RunConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: RunConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Apply environment overrides.
///
/// `PYTEST_ARGS` replaces the extra test arguments. A non-empty
/// `FIRECRAWL_API_KEY` supplies the key and enables the Firecrawl lookup when
/// no provider was chosen.
pub fn apply_env_overrides(config: &mut RunConfig, env: EnvOverrides) {
    if let Some(args) = env.pytest_args {
        config.tests.args = args.split_whitespace().map(str::to_string).collect();
        debug!(args = ?config.tests.args, "test args from PYTEST_ARGS");
    }

    if let Some(key) = env.firecrawl_api_key.filter(|k| !k.trim().is_empty()) {
        config.knowledge.api_key = Some(key);
        if config.knowledge.provider == KnowledgeProvider::None {
            config.knowledge.provider = KnowledgeProvider::Firecrawl;
            debug!("FIRECRAWL_API_KEY set, enabling reference lookup");
        }
    }
}
