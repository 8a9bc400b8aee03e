pub mod daemon;
pub mod slots;

use std::path::Path;

use skybot_control::DaemonClient;
use skybot_types::config::daemon_config_path;
use skybot_types::DaemonConfig;

/// Load the daemon config from `path`, or the default location.
///
/// A missing default config yields the built-in defaults; a missing
/// explicitly named config is an error.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<DaemonConfig> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (daemon_config_path(), false),
    };
    if !path.exists() {
        if explicit {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Ok(DaemonConfig::default());
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(DaemonConfig::from_toml(&content)?)
}

/// Control-socket client for the configured daemon.
pub fn client(config: Option<&Path>) -> anyhow::Result<DaemonClient> {
    let config = load_config(config)?;
    Ok(DaemonClient::new(config.control.socket_path))
}
