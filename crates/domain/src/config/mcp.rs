use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP servers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-tool timeout ceiling (heavy document tools may legitimately run
/// for minutes, but never longer than this).
pub const TOOL_TIMEOUT_CEILING_SECS: u64 = 1_800;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Static server list, loaded once at startup from
    /// `ARIS_MCP_SERVERS` (a JSON array of [`McpServerConfig`]).
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
    /// Environment variable holding the shared static API key sent as a
    /// bearer header on every request (transport-level auth, distinct
    /// from per-server login tokens).
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// Discovery cache TTL.
    #[serde(default = "d_discovery_ttl")]
    pub discovery_ttl_secs: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            api_key_env: d_api_key_env(),
            discovery_ttl_secs: d_discovery_ttl(),
        }
    }
}

fn d_api_key_env() -> String {
    "ARIS_MCP_API_KEY".into()
}

fn d_discovery_ttl() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    /// HTTP endpoint of the remote server.
    pub url: String,
    /// Whether tools on this server need a login-derived token.
    #[serde(default)]
    pub requires_auth: bool,
    /// Login configuration; required when `requires_auth` is set.
    #[serde(default)]
    pub auth: Option<McpAuthConfig>,
    /// When set, the current session id is injected into every call's
    /// arguments under this name, overriding whatever the planner put
    /// there (document generators expect the ambient chat id).
    #[serde(default)]
    pub session_id_argument: Option<String>,
    /// Per-call timeout; clamped to [`TOOL_TIMEOUT_CEILING_SECS`].
    #[serde(default = "d_tool_timeout")]
    pub timeout_secs: u64,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            requires_auth: false,
            auth: None,
            session_id_argument: None,
            timeout_secs: d_tool_timeout(),
        }
    }
}

impl McpServerConfig {
    /// Effective per-call timeout after applying the ceiling.
    pub fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.min(TOOL_TIMEOUT_CEILING_SECS)
    }
}

fn d_tool_timeout() -> u64 {
    60
}

/// How to obtain and apply a login token for an auth-requiring server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpAuthConfig {
    /// Name of the login tool exposed by the server.
    pub login_tool: String,
    /// Environment variables holding the credentials.
    pub username_env: String,
    pub password_env: String,
    /// Field of the login result carrying the token.
    #[serde(default = "d_token_field")]
    pub token_field: String,
    /// Argument name the token is injected under on subsequent calls.
    #[serde(default = "d_token_argument")]
    pub token_argument: String,
}

fn d_token_field() -> String {
    "jwt_token".into()
}

fn d_token_argument() -> String {
    "jwt_token".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_list_parses_from_json() {
        let raw = r#"[
            {"name": "core", "url": "https://mcp.example.com/core", "requires_auth": true,
             "auth": {"login_tool": "core_login", "username_env": "CORE_USER", "password_env": "CORE_PASSWORD"}},
            {"name": "file-generator", "url": "https://mcp.example.com/files",
             "session_id_argument": "chat_id"}
        ]"#;
        let servers: Vec<McpServerConfig> = serde_json::from_str(raw).unwrap();
        assert_eq!(servers.len(), 2);
        assert!(servers[0].requires_auth);
        let auth = servers[0].auth.as_ref().unwrap();
        assert_eq!(auth.login_tool, "core_login");
        assert_eq!(auth.token_field, "jwt_token");
        assert_eq!(servers[1].session_id_argument.as_deref(), Some("chat_id"));
        assert_eq!(servers[1].timeout_secs, 60);
    }

    #[test]
    fn timeout_is_clamped_to_ceiling() {
        let server = McpServerConfig {
            timeout_secs: 86_400,
            ..McpServerConfig::default()
        };
        assert_eq!(server.effective_timeout_secs(), TOOL_TIMEOUT_CEILING_SECS);

        let fast = McpServerConfig {
            timeout_secs: 5,
            ..McpServerConfig::default()
        };
        assert_eq!(fast.effective_timeout_secs(), 5);
    }
}
