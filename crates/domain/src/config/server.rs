use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Environment variable holding the client bearer token.
    /// When the variable is unset the handshake is unauthenticated
    /// (dev mode).
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    /// TLS certificate/key paths. Accepted for deployment parity; the
    /// binary itself serves plain TCP and expects the fronting ingress to
    /// terminate TLS.
    #[serde(default)]
    pub tls_cert_path: Option<String>,
    #[serde(default)]
    pub tls_key_path: Option<String>,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            api_token_env: d_api_token_env(),
            tls_cert_path: None,
            tls_key_path: None,
            cors: CorsConfig::default(),
        }
    }
}

fn d_host() -> String {
    "0.0.0.0".into()
}

fn d_port() -> u16 {
    8080
}

fn d_api_token_env() -> String {
    "ARIS_API_TOKEN".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CORS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_allowed_origins(),
        }
    }
}

fn d_allowed_origins() -> Vec<String> {
    vec!["*".into()]
}
