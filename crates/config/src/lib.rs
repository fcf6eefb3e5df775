//! Configuration loading and env substitution.
//!
//! Config files: `boltline.toml`, `boltline.yaml`, or `boltline.json`
//! Searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config, to_toml_string},
    schema::{BoltlineConfig, ParserConfig, PlaceholderStyle, RunnerConfig, SandboxBackend, SandboxConfig},
};
