use std::path::{Path, PathBuf};

use {
    boltline_common::{Context, Error, Result},
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::BoltlineConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "boltline.toml",
    "boltline.yaml",
    "boltline.yml",
    "boltline.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<BoltlineConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./boltline.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/boltline/boltline.{toml,yaml,yml,json}` (user-global)
///
/// Returns `BoltlineConfig::default()` if no config file is found or the file
/// cannot be parsed.
pub fn discover_and_load() -> BoltlineConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    BoltlineConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    find_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_in(&dir)))
}

/// Returns the user-global config directory (`~/.config/boltline/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "boltline").map(|d| d.config_dir().to_path_buf())
}

/// Serialize the effective config as TOML.
pub fn to_toml_string(config: &BoltlineConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn parse_config(raw: &str, path: &Path) -> Result<BoltlineConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}
