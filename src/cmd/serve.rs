//! HTTP server command: `kartavya serve`.

use anyhow::Result;

use kartavya::config::{Config, KartavyaToml};
use kartavya::tracker::server::{ServerConfig, start_server};

pub async fn cmd_serve(config: &Config) -> Result<()> {
    for warning in KartavyaToml::from(config).validate() {
        tracing::warn!("{}", warning);
    }
    start_server(ServerConfig::from(config)).await
}
