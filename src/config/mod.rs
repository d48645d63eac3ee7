pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use crate::options::{HeaderBehaviors, HostnameSubstitution, ProxyOptions, RegexReplacement};
use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

impl GatewayConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used — allowing the proxy to start with zero configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            GatewayConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("loaded gateway configuration");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PROXY_LISTEN") {
            self.server.listen = v;
        }
        if let Ok(v) = std::env::var("PROXY_ADMIN_LISTEN") {
            self.server.admin_listen = v;
        }
        if let Ok(v) = std::env::var("PROXY_ACCEPT_ANY_CERT") {
            self.proxy_options.accept_any_cert = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("PROXY_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("PROXY_HOST_OVERRIDE") {
            self.proxy_options.host_override = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.server
            .listen
            .parse::<std::net::SocketAddr>()
            .context("server.listen must be a valid socket address")?;
        self.server
            .admin_listen
            .parse::<std::net::SocketAddr>()
            .context("server.admin_listen must be a valid socket address")?;

        if let DestinationMode::Fixed { host, .. } = &self.destination {
            if host.is_empty() {
                anyhow::bail!("destination.host cannot be empty in fixed mode");
            }
        }

        for net in &self.proxy_options.trusted_ranges {
            net.parse::<ipnetwork::IpNetwork>()
                .with_context(|| format!("invalid trusted CIDR range: {net}"))?;
        }
        for r in &self.proxy_options.regex_replacements {
            regex::Regex::new(&r.pattern)
                .with_context(|| format!("invalid regex replacement pattern: {}", r.pattern))?;
        }

        if !(1_000..=60_000).contains(&self.proxy_options.connect_timeout_ms) {
            anyhow::bail!("proxy_options.connect_timeout_ms must be in [1000, 60000]");
        }
        if !(1_000..=600_000).contains(&self.proxy_options.network_timeout_ms) {
            anyhow::bail!("proxy_options.network_timeout_ms must be in [1000, 600000]");
        }

        Ok(())
    }

    /// Build the live `ProxyOptions` the engine runs with. Called once at
    /// startup; there is no hot-reload of these values (§6.5).
    pub fn proxy_options(&self) -> Result<ProxyOptions> {
        let cfg = &self.proxy_options;
        let trusted_ranges = cfg
            .trusted_ranges
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>, _>>()
            .context("invalid trusted CIDR range")?;
        let regex_replacements = cfg
            .regex_replacements
            .iter()
            .map(|r| {
                Ok(RegexReplacement {
                    pattern: regex::Regex::new(&r.pattern)?,
                    replacement: r.replacement.clone(),
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()
            .context("invalid regex replacement pattern")?;
        let hostname_substitutions = cfg
            .hostname_substitutions
            .iter()
            .map(|s| HostnameSubstitution {
                from: s.from.clone(),
                to: s.to.clone(),
            })
            .collect();

        Ok(ProxyOptions {
            connect_timeout: std::time::Duration::from_millis(cfg.connect_timeout_ms),
            network_timeout: std::time::Duration::from_millis(cfg.network_timeout_ms),
            long_read_timeout: std::time::Duration::from_millis(cfg.long_read_timeout_ms),
            accept_any_cert: cfg.accept_any_cert,
            host_override: cfg.host_override.clone(),
            cancellation: CancellationToken::new(),
            allow_gateway_timeout_response: cfg.allow_gateway_timeout_response,
            allow_connection_keepalive: cfg.allow_connection_keepalive,
            header_behaviors: HeaderBehaviors {
                x_forwarded_for: cfg.header_behaviors.x_forwarded_for.into(),
                x_forwarded_host: cfg.header_behaviors.x_forwarded_host.into(),
                x_forwarded_proto: cfg.header_behaviors.x_forwarded_proto.into(),
                x_real_ip: cfg.header_behaviors.x_real_ip.into(),
            },
            trusted_ranges,
            hostname_substitutions,
            regex_replacements,
            snoop_dir: cfg.snoop_dir.as_ref().map(std::path::PathBuf::from),
            include_server_timing_header: cfg.include_server_timing_header,
        })
    }
}
