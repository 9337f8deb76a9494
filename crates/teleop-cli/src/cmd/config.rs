use anyhow::Result;
use std::path::Path;
use teleop_core::config::Config;

/// Print the merged configuration, defaults filled in, as YAML.
pub fn run(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
