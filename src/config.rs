use anyhow::{Context, Result};
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ticket service connection details. The token is optional because some
/// deployments sit behind network-level auth instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketConfig {
    pub endpoint: String,
    pub token: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default directory for transcripts and reports; the --output-dir
    /// flag wins over this.
    pub output_dir: Option<PathBuf>,
    pub ticket: Option<TicketConfig>,
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("sounder").join("config.yaml"))
    }
}

/// Optional YAML file overlaid with `SOUNDER_*` environment variables,
/// nested keys split on `__` (SOUNDER_TICKET__ENDPOINT and so on). A
/// missing file is not an error; a malformed one is.
pub fn load() -> Result<Config> {
    let path = Config::path()?;
    let mut figment = Figment::new();
    if path.exists() {
        figment = figment.merge(Yaml::file(&path));
    }
    figment
        .merge(Env::prefixed("SOUNDER_").split("__"))
        .extract()
        .with_context(|| format!("loading configuration from {}", path.display()))
}
