use anyhow::Result;
use std::path::Path;
use teleop_core::config::Config;

pub fn run(config_path: &Path, port: Option<u16>) -> Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(port) = port {
        config.port = port;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(teleop_server::serve(config))
}
