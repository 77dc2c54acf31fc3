//! Connection specs and configuration loading
//!
//! Supports project-level (`.mcp.json`) and user-level (`~/.config/agent-rs/mcp.json`)
//! configuration files with merge support. Server entries are parsed one at a
//! time so a single malformed entry never invalidates the rest of the file.

use crate::error::MCPError;
use crate::server::McpServer;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tracing::warn;

type Result<T> = std::result::Result<T, MCPError>;

/// The only stdout encoding pipe transports understand
pub const UTF8: &str = "utf-8";

/// Root MCP configuration
///
/// # Example
///
/// ```json
/// {
///   "servers": {
///     "filesystem": {
///       "command": "npx",
///       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/workspace"]
///     },
///     "search": {
///       "url": "https://mcp.example.com/sse",
///       "headers": {"Authorization": "Bearer ${SEARCH_TOKEN}"}
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MCPConfig {
    /// Server entries, kept raw until [`MCPConfig::connection_specs`] validates them
    #[serde(default, alias = "mcpServers")]
    pub servers: HashMap<String, Value>,
}

/// Which kind of channel a connection uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Child process speaking over stdin/stdout
    Pipe,
    /// Long-lived HTTP event stream
    Stream,
    /// Linked endpoints inside this process
    InProcess,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pipe => "pipe",
            Self::Stream => "stream",
            Self::InProcess => "in-process",
        };
        f.write_str(name)
    }
}

/// What to do with bytes on a server's stdout that are not valid UTF-8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingErrorPolicy {
    /// Treat undecodable output as fatal for the stream
    #[default]
    Strict,
    /// Substitute U+FFFD for undecodable sequences
    Replace,
    /// Drop undecodable sequences
    Ignore,
}

/// Child-process server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipeSpec {
    /// Command to execute
    #[serde(default)]
    pub command: String,

    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the child
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Encoding of the child's stdout
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Handling of undecodable stdout bytes
    #[serde(default)]
    pub error_policy: EncodingErrorPolicy,
}

impl PipeSpec {
    /// Spec for `command` with the given arguments and default settings
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            cwd: None,
            encoding: default_encoding(),
            error_policy: EncodingErrorPolicy::default(),
        }
    }
}

/// HTTP event-stream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSpec {
    /// Event-stream URL
    #[serde(default)]
    pub url: String,

    /// HTTP headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Use the header-aware event-stream implementation, which also sends
    /// `headers` on the stream request itself rather than only on posted messages
    #[serde(default)]
    pub use_alternate_stream_impl: bool,
}

impl StreamSpec {
    /// Spec for `url` with no extra headers
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            use_alternate_stream_impl: false,
        }
    }
}

/// Server object living in this process
#[derive(Clone, Default)]
pub struct InProcessSpec {
    /// The server to drive; `None` makes the spec invalid
    pub server: Option<Arc<dyn McpServer>>,
}

impl InProcessSpec {
    /// Spec driving `server`
    pub fn new(server: Arc<dyn McpServer>) -> Self {
        Self {
            server: Some(server),
        }
    }
}

impl fmt::Debug for InProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessSpec")
            .field(
                "server",
                &self.server.as_ref().map(|server| server.server_info().name),
            )
            .finish()
    }
}

/// How to reach one server
#[derive(Debug, Clone)]
pub enum ConnectionSpec {
    Pipe(PipeSpec),
    Stream(StreamSpec),
    InProcess(InProcessSpec),
}

impl ConnectionSpec {
    /// Transport kind this spec declares
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Pipe(_) => TransportKind::Pipe,
            Self::Stream(_) => TransportKind::Stream,
            Self::InProcess(_) => TransportKind::InProcess,
        }
    }

    /// Check that the fields the declared transport needs are present
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Pipe(spec) => {
                if spec.command.trim().is_empty() {
                    return Err(MCPError::Configuration(
                        "pipe transport requires a command".to_string(),
                    ));
                }
                if !spec.encoding.eq_ignore_ascii_case(UTF8)
                    && !spec.encoding.eq_ignore_ascii_case("utf8")
                {
                    return Err(MCPError::Configuration(format!(
                        "unsupported encoding '{}'",
                        spec.encoding
                    )));
                }
            }
            Self::Stream(spec) => {
                if spec.url.trim().is_empty() {
                    return Err(MCPError::Configuration(
                        "stream transport requires a url".to_string(),
                    ));
                }
                url::Url::parse(&spec.url).map_err(|e| {
                    MCPError::Configuration(format!("invalid url '{}': {e}", spec.url))
                })?;
            }
            Self::InProcess(spec) => {
                if spec.server.is_none() {
                    return Err(MCPError::Configuration(
                        "in-process transport requires a server handle".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Parse one server entry of a configuration document
    ///
    /// An explicit `"transport"` field wins; otherwise `command` means a pipe
    /// and `url` means a stream. In-process servers cannot come from JSON.
    pub fn from_json(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(MCPError::Configuration(
                "server entry must be an object".to_string(),
            ));
        }

        let declared = value.get("transport").and_then(Value::as_str);
        let kind = match declared {
            Some("stdio" | "pipe") => TransportKind::Pipe,
            Some("sse" | "stream" | "http") => TransportKind::Stream,
            Some("in-process" | "inprocess") => TransportKind::InProcess,
            Some(other) => {
                return Err(MCPError::Configuration(format!(
                    "unknown transport '{other}'"
                )));
            }
            None if value.get("command").is_some() => TransportKind::Pipe,
            None if value.get("url").is_some() => TransportKind::Stream,
            None => {
                return Err(MCPError::Configuration(
                    "server entry has neither a command nor a url".to_string(),
                ));
            }
        };

        let parse_error = |e: serde_json::Error| MCPError::Configuration(e.to_string());
        match kind {
            TransportKind::Pipe => Ok(Self::Pipe(
                serde_json::from_value(value.clone()).map_err(parse_error)?,
            )),
            TransportKind::Stream => Ok(Self::Stream(
                serde_json::from_value(value.clone()).map_err(parse_error)?,
            )),
            TransportKind::InProcess => Err(MCPError::Configuration(
                "in-process servers must be registered in code".to_string(),
            )),
        }
    }

    /// Resolve `${VAR}` and `$VAR` references in string fields
    pub fn resolve_env_vars(&mut self) -> Result<()> {
        match self {
            Self::Pipe(spec) => {
                spec.command = resolve_env_string(&spec.command)?;

                for arg in &mut spec.args {
                    *arg = resolve_env_string(arg)?;
                }

                for value in spec.env.values_mut() {
                    *value = resolve_env_string(value)?;
                }

                if let Some(path) = &mut spec.cwd {
                    let resolved = resolve_env_string(&path.to_string_lossy())?;
                    *path = PathBuf::from(resolved);
                }
            }
            Self::Stream(spec) => {
                spec.url = resolve_env_string(&spec.url)?;

                for value in spec.headers.values_mut() {
                    *value = resolve_env_string(value)?;
                }
            }
            Self::InProcess(_) => {}
        }
        Ok(())
    }
}

fn default_encoding() -> String {
    UTF8.to_string()
}

impl MCPConfig {
    /// Load configuration from a file
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use agent_mcp_adapters::config::MCPConfig;
    /// let config = MCPConfig::from_file(".mcp.json")?;
    /// # Ok::<(), agent_mcp_adapters::error::MCPError>(())
    /// ```
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MCPError::Configuration(format!("Failed to read config file: {e}")))?;

        Self::from_json_str(&content)
    }

    /// Parse a configuration document
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| MCPError::Configuration(format!("Failed to parse config file: {e}")))
    }

    /// Load merged configuration (user + project)
    ///
    /// Loads the user-level config from `~/.config/agent-rs/mcp.json` and merges it
    /// with the project-level config from `.mcp.json`. Project-level settings
    /// take precedence. Missing files are not an error.
    pub fn load_merged() -> Self {
        let mut config = Self::load_user_config().unwrap_or_default();

        if let Ok(project_config) = Self::load_project_config() {
            config.merge(project_config);
        }

        config
    }

    /// Load user-level config from `~/.config/agent-rs/mcp.json`
    pub fn load_user_config() -> Result<Self> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map_err(|_| MCPError::Configuration("HOME or USERPROFILE not set".to_string()))?;

        let path = PathBuf::from(home)
            .join(".config")
            .join("agent-rs")
            .join("mcp.json");

        Self::from_file(path)
    }

    /// Load project-level config from `.mcp.json`
    pub fn load_project_config() -> Result<Self> {
        Self::from_file(".mcp.json")
    }

    /// Merge another config into this one
    ///
    /// The `other` config's values take precedence over this config's values.
    pub fn merge(&mut self, other: MCPConfig) {
        self.servers.extend(other.servers);
    }

    /// Parse, expand and validate every server entry
    ///
    /// Entries that fail any step are dropped with a warning. The result is
    /// sorted by server name so connection order is stable.
    pub fn connection_specs(&self) -> Vec<(String, ConnectionSpec)> {
        let mut specs: Vec<(String, ConnectionSpec)> = self
            .servers
            .iter()
            .filter_map(|(name, raw)| {
                let parsed = ConnectionSpec::from_json(raw).and_then(|mut spec| {
                    spec.resolve_env_vars()?;
                    spec.validate()?;
                    Ok(spec)
                });
                match parsed {
                    Ok(spec) => Some((name.clone(), spec)),
                    Err(e) => {
                        warn!("Dropping MCP server '{}': {}", name, e);
                        None
                    }
                }
            })
            .collect();

        specs.sort_by(|a, b| a.0.cmp(&b.0));
        specs
    }
}

/// `${VAR}` or `$VAR`
static ENV_REFERENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").ok()
});

/// Resolve environment variable references in strings
///
/// Supports `${VAR}` and `$VAR` syntax.
///
/// # Example
///
/// ```
/// # use agent_mcp_adapters::config::resolve_env_string;
/// unsafe { std::env::set_var("DOC_TEST_VAR", "test_value") };
/// let result = resolve_env_string("prefix_${DOC_TEST_VAR}_suffix")?;
/// assert_eq!(result, "prefix_test_value_suffix");
/// # Ok::<(), agent_mcp_adapters::error::MCPError>(())
/// ```
pub fn resolve_env_string(s: &str) -> Result<String> {
    let pattern = ENV_REFERENCE
        .as_ref()
        .ok_or_else(|| MCPError::InvalidPattern("environment reference".to_string()))?;

    // Single pass over the input: substituted values are never rescanned.
    let mut result = String::with_capacity(s.len());
    let mut last = 0;
    for cap in pattern.captures_iter(s) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1).or_else(|| cap.get(2))) else {
            continue;
        };
        let value = std::env::var(name.as_str())
            .map_err(|_| MCPError::EnvVarNotFound(name.as_str().to_string()))?;
        result.push_str(&s[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }
    result.push_str(&s[last..]);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_parsing_pipe() {
        let json = r#"{
            "servers": {
                "test": {
                    "command": "test-server",
                    "args": ["--verbose"],
                    "errorPolicy": "replace"
                }
            }
        }"#;

        let config = MCPConfig::from_json_str(json).unwrap();
        let specs = config.connection_specs();
        assert_eq!(specs.len(), 1);

        match &specs[0].1 {
            ConnectionSpec::Pipe(spec) => {
                assert_eq!(spec.command, "test-server");
                assert_eq!(spec.args, vec!["--verbose"]);
                assert!(spec.env.is_empty());
                assert_eq!(spec.encoding, UTF8);
                assert_eq!(spec.error_policy, EncodingErrorPolicy::Replace);
            }
            other => panic!("Expected pipe transport, got {other:?}"),
        }
    }

    #[test]
    fn test_config_parsing_stream() {
        let json = r#"{
            "servers": {
                "test": {
                    "url": "http://localhost:8080/sse",
                    "headers": {"Authorization": "Bearer token"},
                    "useAlternateStreamImpl": true
                }
            }
        }"#;

        let config = MCPConfig::from_json_str(json).unwrap();
        match &config.connection_specs()[0].1 {
            ConnectionSpec::Stream(spec) => {
                assert_eq!(spec.url, "http://localhost:8080/sse");
                assert_eq!(spec.headers.get("Authorization").unwrap(), "Bearer token");
                assert!(spec.use_alternate_stream_impl);
            }
            other => panic!("Expected stream transport, got {other:?}"),
        }
    }

    #[test]
    fn test_legacy_mcp_servers_key() {
        let json = r#"{"mcpServers": {"fs": {"transport": "stdio", "command": "fs-server"}}}"#;
        let config = MCPConfig::from_json_str(json).unwrap();
        assert_eq!(config.connection_specs().len(), 1);
    }

    #[test]
    fn test_invalid_entries_are_dropped() {
        let json = r#"{
            "servers": {
                "no-command": {"transport": "stdio", "args": ["x"]},
                "no-url": {"transport": "sse", "headers": {}},
                "bad-url": {"url": "not a url"},
                "neither": {"args": []},
                "bad-encoding": {"command": "srv", "encoding": "latin-1"},
                "not-object": 5,
                "good": {"command": "srv"}
            }
        }"#;

        let specs = MCPConfig::from_json_str(json).unwrap().connection_specs();
        let names: Vec<&str> = specs.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["good"]);
    }

    #[test]
    fn test_validate_in_process_requires_server() {
        let spec = ConnectionSpec::InProcess(InProcessSpec::default());
        assert!(matches!(spec.validate(), Err(MCPError::Configuration(_))));
        assert_eq!(spec.kind(), TransportKind::InProcess);
    }

    #[test]
    fn test_in_process_not_configurable_from_json() {
        let result = ConnectionSpec::from_json(&json!({"transport": "in-process"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_var_resolution() {
        unsafe {
            std::env::set_var("AGENT_MCP_TEST_VAR", "test_value");
            std::env::set_var("AGENT_MCP_OTHER_VAR", "another_value");
        }

        let result = resolve_env_string("${AGENT_MCP_TEST_VAR}").unwrap();
        assert_eq!(result, "test_value");

        let result = resolve_env_string("prefix_${AGENT_MCP_TEST_VAR}_suffix").unwrap();
        assert_eq!(result, "prefix_test_value_suffix");

        let result = resolve_env_string("$AGENT_MCP_TEST_VAR").unwrap();
        assert_eq!(result, "test_value");

        let result = resolve_env_string("${AGENT_MCP_TEST_VAR}_${AGENT_MCP_OTHER_VAR}").unwrap();
        assert_eq!(result, "test_value_another_value");

        let result = resolve_env_string("$AGENT_MCP_TEST_VAR-$AGENT_MCP_OTHER_VAR").unwrap();
        assert_eq!(result, "test_value-another_value");
    }

    #[test]
    fn test_substituted_values_are_not_expanded_again() {
        unsafe {
            std::env::set_var("AGENT_MCP_DOLLAR_VAR", "p$AGENT_MCP_SURELY_UNSET_2");
        }

        let result = resolve_env_string("${AGENT_MCP_DOLLAR_VAR}").unwrap();
        assert_eq!(result, "p$AGENT_MCP_SURELY_UNSET_2");

        let result = resolve_env_string("x=$AGENT_MCP_DOLLAR_VAR").unwrap();
        assert_eq!(result, "x=p$AGENT_MCP_SURELY_UNSET_2");
    }

    #[test]
    fn test_missing_env_var_drops_entry() {
        let json = r#"{
            "servers": {
                "secret": {"url": "https://example.com/sse", "headers": {"X-Key": "${AGENT_MCP_SURELY_UNSET}"}}
            }
        }"#;
        assert!(MCPConfig::from_json_str(json).unwrap().connection_specs().is_empty());
    }

    #[test]
    fn test_config_merge() {
        let mut config1 = MCPConfig::default();
        config1
            .servers
            .insert("server1".to_string(), json!({"command": "one"}));
        config1
            .servers
            .insert("shared".to_string(), json!({"command": "old"}));

        let mut config2 = MCPConfig::default();
        config2
            .servers
            .insert("shared".to_string(), json!({"command": "new"}));

        config1.merge(config2);
        assert_eq!(config1.servers.len(), 2);
        assert_eq!(config1.servers["shared"]["command"], "new");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, r#"{"servers": {"a": {"command": "srv"}}}"#).unwrap();

        let config = MCPConfig::from_file(&path).unwrap();
        assert!(config.servers.contains_key("a"));

        let missing = MCPConfig::from_file(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(MCPError::Configuration(_))));
    }

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::Pipe.to_string(), "pipe");
        assert_eq!(TransportKind::InProcess.to_string(), "in-process");
    }
}
