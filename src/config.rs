use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{ASSOCIATION_PROPERTY_CV, FEATURE_PROPERTY_CV, PRODUCT_CV};

const APP_NAME: &str = "chado-io";
const CONFIG_FILE: &str = "config.json";
const DATABASE_ENV: &str = "CHADO_IO_DATABASE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store location; the platform data directory when unset
    pub database: Option<PathBuf>,
    /// Vocabularies the resolver may add terms to during a load
    pub extensible_vocabularies: Vec<String>,
    /// Residues per FASTA line on export, 0 for a single line
    pub fasta_line_width: usize,
    /// Type assigned to new sequence entries without a declared type
    pub default_sequence_type: String,
    pub gaf_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            extensible_vocabularies: vec![
                FEATURE_PROPERTY_CV.to_string(),
                ASSOCIATION_PROPERTY_CV.to_string(),
                PRODUCT_CV.to_string(),
            ],
            fasta_line_width: 60,
            default_sequence_type: "region".to_string(),
            gaf_version: "2.2".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the user's config directory.
    /// Returns defaults if the file doesn't exist or fails to parse.
    pub fn load() -> Self {
        let config = match get_config_path().and_then(|path| Self::load_from(&path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;

        let config = serde_json::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(database) = std::env::var_os(DATABASE_ENV).filter(|value| !value.is_empty()) {
            self.database = Some(PathBuf::from(database));
        }
        self
    }

    /// Save the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
