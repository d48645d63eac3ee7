use serde::{Deserialize, Serialize};

/// Top-level process configuration (§6.5). Loaded once at startup; there is
/// no hot-reload of these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub destination: DestinationMode,

    #[serde(default)]
    pub proxy_options: ProxyOptionsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            destination: DestinationMode::default(),
            proxy_options: ProxyOptionsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_admin_listen")]
    pub admin_listen: String,

    /// Once `active_conns` reaches this count, the server is considered
    /// under high load: new outgoing upstream connections stop advertising
    /// `Connection: keep-alive` and finished bridges aren't returned to the
    /// pool (§4.H Analyze/Finalize).
    #[serde(default = "default_high_load_connection_threshold")]
    pub high_load_connection_threshold: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin_listen: default_admin_listen(),
            high_load_connection_threshold: default_high_load_connection_threshold(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_admin_listen() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_high_load_connection_threshold() -> u32 {
    10_000
}

/// How the destination origin for each request is chosen (§9, resolved open
/// question — routing by path/cluster is out of scope for this core).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DestinationMode {
    Fixed {
        scheme: String,
        host: String,
        port: u16,
    },
    HostHeader {
        scheme: String,
        #[serde(default)]
        port_override: Option<u16>,
    },
}

impl Default for DestinationMode {
    fn default() -> Self {
        DestinationMode::HostHeader {
            scheme: "http".to_string(),
            port_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Serializable mirror of a single forwarded-header behavior (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyHeaderBehaviorConfig {
    Drop,
    Create,
    CombineUnsafe,
    CombineIfTrustedElseCreate,
    PassthroughUnsafe,
    PassthroughIfTrustedElseDrop,
    PassthroughIfTrustedElseCreate,
}

impl Default for ProxyHeaderBehaviorConfig {
    fn default() -> Self {
        ProxyHeaderBehaviorConfig::Drop
    }
}

impl From<ProxyHeaderBehaviorConfig> for crate::options::ProxyHeaderBehavior {
    fn from(v: ProxyHeaderBehaviorConfig) -> Self {
        use crate::options::ProxyHeaderBehavior as P;
        match v {
            ProxyHeaderBehaviorConfig::Drop => P::Drop,
            ProxyHeaderBehaviorConfig::Create => P::Create,
            ProxyHeaderBehaviorConfig::CombineUnsafe => P::CombineUnsafe,
            ProxyHeaderBehaviorConfig::CombineIfTrustedElseCreate => P::CombineIfTrustedElseCreate,
            ProxyHeaderBehaviorConfig::PassthroughUnsafe => P::PassthroughUnsafe,
            ProxyHeaderBehaviorConfig::PassthroughIfTrustedElseDrop => P::PassthroughIfTrustedElseDrop,
            ProxyHeaderBehaviorConfig::PassthroughIfTrustedElseCreate => P::PassthroughIfTrustedElseCreate,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderBehaviorsConfig {
    #[serde(default)]
    pub x_forwarded_for: ProxyHeaderBehaviorConfig,
    #[serde(default)]
    pub x_forwarded_host: ProxyHeaderBehaviorConfig,
    #[serde(default)]
    pub x_forwarded_proto: ProxyHeaderBehaviorConfig,
    #[serde(default)]
    pub x_real_ip: ProxyHeaderBehaviorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostnameSubstitutionConfig {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexReplacementConfig {
    pub pattern: String,
    pub replacement: String,
}

/// Serializable mirror of `ProxyOptions` (§3/§6.4). `GatewayConfig::proxy_options`
/// converts this into the live `ProxyOptions` the engine actually runs with,
/// compiling regexes and CIDR ranges once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyOptionsConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    #[serde(default = "default_long_read_timeout_ms")]
    pub long_read_timeout_ms: u64,

    #[serde(default)]
    pub accept_any_cert: bool,

    #[serde(default)]
    pub host_override: Option<String>,

    #[serde(default = "default_true")]
    pub allow_gateway_timeout_response: bool,

    #[serde(default = "default_true")]
    pub allow_connection_keepalive: bool,

    #[serde(default)]
    pub header_behaviors: HeaderBehaviorsConfig,

    #[serde(default)]
    pub trusted_ranges: Vec<String>,

    #[serde(default)]
    pub hostname_substitutions: Vec<HostnameSubstitutionConfig>,

    #[serde(default)]
    pub regex_replacements: Vec<RegexReplacementConfig>,

    #[serde(default)]
    pub snoop_dir: Option<String>,

    #[serde(default)]
    pub include_server_timing_header: bool,
}

impl Default for ProxyOptionsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            network_timeout_ms: default_network_timeout_ms(),
            long_read_timeout_ms: default_long_read_timeout_ms(),
            accept_any_cert: false,
            host_override: None,
            allow_gateway_timeout_response: true,
            allow_connection_keepalive: true,
            header_behaviors: HeaderBehaviorsConfig::default(),
            trusted_ranges: Vec::new(),
            hostname_substitutions: Vec::new(),
            regex_replacements: Vec::new(),
            snoop_dir: None,
            include_server_timing_header: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_network_timeout_ms() -> u64 {
    60_000
}

fn default_long_read_timeout_ms() -> u64 {
    5 * 60 * 1000
}
