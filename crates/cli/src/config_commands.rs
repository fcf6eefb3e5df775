use std::path::Path;

use {anyhow::Result, boltline_config::BoltlineConfig, clap::Subcommand};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the path of the config file in use.
    Path,
}

pub fn handle_config(
    action: ConfigAction,
    config: &BoltlineConfig,
    explicit: Option<&Path>,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", boltline_config::to_toml_string(config)?);
            Ok(())
        },
        ConfigAction::Path => {
            match explicit
                .map(Path::to_path_buf)
                .or_else(boltline_config::find_config_file)
            {
                Some(path) => println!("{}", path.display()),
                None => eprintln!("No config file found; using defaults."),
            }
            Ok(())
        },
    }
}
