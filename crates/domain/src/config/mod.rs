mod llm;
mod mcp;
mod server;
mod sessions;

pub use llm::*;
pub use mcp::*;
pub use server::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process configuration, assembled from environment variables at startup
/// (see [`Config::from_env`]). Sections default individually so a bare
/// environment still yields a runnable dev configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. The literal `":memory:"` opens an in-memory
    /// database (used by tests and `aris config validate`).
    #[serde(default = "d_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: d_db_path() }
    }
}

fn d_db_path() -> String {
    "./data/aris.db".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|v| v.parse().ok())
}

impl Config {
    /// Assemble the configuration from environment variables.
    ///
    /// | variable | meaning |
    /// |---|---|
    /// | `ARIS_HOST`, `ARIS_PORT` | bind address |
    /// | `ARIS_TLS_CERT_PATH`, `ARIS_TLS_KEY_PATH` | TLS material (terminated upstream) |
    /// | `ARIS_CORS_ORIGINS` | comma-separated allowed origins |
    /// | `ARIS_DB_PATH` | SQLite database path |
    /// | `BEDROCK_REGION` / `REGION` | LLM region |
    /// | `ARIS_BEDROCK_BASE_URL` | LLM endpoint override |
    /// | `ARIS_DEFAULT_MODEL_ID` | default model |
    /// | `ARIS_MCP_SERVERS` | JSON array of server entries |
    /// | `ARIS_AGENT_KIND` | agent variant selector |
    ///
    /// Secrets (`ARIS_API_TOKEN`, `AWS_BEARER_TOKEN_BEDROCK`, per-server
    /// MCP credentials) are read lazily at the point of use, never stored
    /// in the config tree.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Some(host) = env_str("ARIS_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("ARIS_PORT") {
            config.server.port = port;
        }
        config.server.tls_cert_path = env_str("ARIS_TLS_CERT_PATH");
        config.server.tls_key_path = env_str("ARIS_TLS_KEY_PATH");
        if let Some(origins) = env_str("ARIS_CORS_ORIGINS") {
            config.server.cors.allowed_origins =
                origins.split(',').map(|o| o.trim().to_owned()).collect();
        }

        if let Some(path) = env_str("ARIS_DB_PATH") {
            config.store.db_path = path;
        }

        if let Some(region) = env_str("BEDROCK_REGION").or_else(|| env_str("REGION")) {
            config.llm.region = region;
        }
        config.llm.base_url = env_str("ARIS_BEDROCK_BASE_URL");
        if let Some(model) = env_str("ARIS_DEFAULT_MODEL_ID") {
            config.llm.default_model_id = model;
        }
        if let Some(timeout) = env_parse::<u64>("ARIS_LLM_TIMEOUT_SECS") {
            config.llm.timeout_secs = timeout;
        }

        if let Some(raw) = env_str("ARIS_MCP_SERVERS") {
            config.mcp.servers = serde_json::from_str(&raw).map_err(|e| {
                crate::Error::Config(format!("ARIS_MCP_SERVERS is not a valid JSON array: {e}"))
            })?;
        }

        if let Some(kind) = env_str("ARIS_AGENT_KIND") {
            config.sessions.agent_kind = kind;
        }

        Ok(config)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        // TLS paths must come in pairs.
        if self.server.tls_cert_path.is_some() != self.server.tls_key_path.is_some() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.tls".into(),
                message: "ARIS_TLS_CERT_PATH and ARIS_TLS_KEY_PATH must be set together".into(),
            });
        }

        if self.store.db_path.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "store.db_path".into(),
                message: "db_path must not be empty".into(),
            });
        }

        if self.llm.region.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.region".into(),
                message: "region must not be empty".into(),
            });
        }
        if self.llm.default_model_id.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.default_model_id".into(),
                message: "default model id must not be empty".into(),
            });
        }
        if let Some(base) = &self.llm.base_url {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "llm.base_url".into(),
                    message: format!("base_url must start with http:// or https:// (got \"{base}\")"),
                });
            }
        }

        // ── MCP server validation ─────────────────────────────────────
        if self.mcp.servers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "mcp.servers".into(),
                message: "no MCP servers configured — tool calls will fail".into(),
            });
        }
        let mut seen_names: HashSet<&str> = HashSet::new();
        for (i, server) in self.mcp.servers.iter().enumerate() {
            if server.name.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("mcp.servers[{i}].name"),
                    message: "server name must not be empty".into(),
                });
            }
            if !server.url.starts_with("http://") && !server.url.starts_with("https://") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("mcp.servers[{i}].url"),
                    message: format!("url must start with http:// or https:// (got \"{}\")", server.url),
                });
            }
            if !server.name.is_empty() && !seen_names.insert(&server.name) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("mcp.servers[{i}].name"),
                    message: format!("duplicate MCP server name \"{}\"", server.name),
                });
            }
            if server.requires_auth && server.auth.is_none() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("mcp.servers[{i}].auth"),
                    message: format!(
                        "server \"{}\" requires auth but has no login configuration",
                        server.name
                    ),
                });
            }
        }

        if self.sessions.recent_window == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.recent_window".into(),
                message: "recent_window must be greater than 0".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
