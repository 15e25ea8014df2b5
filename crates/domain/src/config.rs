//! Dialograph configuration.
//!
//! Loaded from a TOML file (`dialograph.toml` by default, overridable via
//! the `DIALOGRAPH_CONFIG` env var). Every section has serde defaults so an
//! empty file — or no file at all — yields a working development setup:
//! in-memory stores, in-memory event bus, heuristic parser, no auth, no
//! content encryption.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub downstream: DownstreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub stores: StoresConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from `path`, falling back to the
    /// `DIALOGRAPH_CONFIG` env var and then `./dialograph.toml`.
    /// A missing file yields defaults; a malformed file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved: PathBuf = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var("DIALOGRAPH_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("dialograph.toml")),
        };

        if !resolved.exists() {
            tracing::debug!(path = %resolved.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&resolved)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_dialogue_port")]
    pub dialogue_port: u16,
    #[serde(default = "d_parser_port")]
    pub parser_port: u16,
    #[serde(default = "d_graph_port")]
    pub graph_port: u16,
    #[serde(default = "d_suggestion_port")]
    pub suggestion_port: u16,
    /// Origins allowed for CORS. `["*"]` is permissive (the dev default).
    #[serde(default = "d_cors_origins")]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            dialogue_port: d_dialogue_port(),
            parser_port: d_parser_port(),
            graph_port: d_graph_port(),
            suggestion_port: d_suggestion_port(),
            cors_allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Downstream services (as seen from the dialogue orchestrator)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamConfig {
    #[serde(default = "d_parser_url")]
    pub parser_url: String,
    #[serde(default = "d_graph_url")]
    pub graph_url: String,
    #[serde(default = "d_suggestion_url")]
    pub suggestion_url: String,
    /// Per-call deadline for every downstream HTTP request.
    #[serde(default = "d_2000")]
    pub timeout_ms: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            parser_url: d_parser_url(),
            graph_url: d_graph_url(),
            suggestion_url: d_suggestion_url(),
            timeout_ms: d_2000(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tenant auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Trust the `X-Tenant-ID` header as-is (dev mode).
    #[default]
    None,
    /// Per-tenant static API keys, compared in constant time.
    ApiKey,
    /// `Authorization: Bearer <jwt>` with a tenant claim.
    Jwt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    #[serde(default = "d_tenant")]
    pub default_tenant: String,
    /// tenant id -> API key (api_key mode).
    #[serde(default)]
    pub tenant_api_keys: HashMap<String, String>,
    #[serde(default = "d_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default)]
    pub jwt_audience: Option<String>,
    #[serde(default)]
    pub jwt_issuer: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            default_tenant: d_tenant(),
            tenant_api_keys: HashMap::new(),
            jwt_secret: d_jwt_secret(),
            jwt_audience: None,
            jwt_issuer: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Content encryption at rest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EncryptionConfig {
    /// Hex-encoded 32-byte key for turn-content encryption.
    /// Absent key = plaintext storage (development mode).
    #[serde(default)]
    pub content_key_hex: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BusBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default)]
    pub backend: BusBackend,
    #[serde(default = "d_consumer_group")]
    pub consumer_group: String,
    /// Namespace prefix for stream names.
    #[serde(default = "d_stream_prefix")]
    pub stream_prefix: String,
    #[serde(default = "d_bus_db")]
    pub db_path: PathBuf,
    /// How long an unacked delivery stays invisible before redelivery
    /// (sqlite backend only).
    #[serde(default = "d_30000")]
    pub visibility_timeout_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::Memory,
            consumer_group: d_consumer_group(),
            stream_prefix: d_stream_prefix(),
            db_path: d_bus_db(),
            visibility_timeout_ms: d_30000(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence stores
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoresConfig {
    #[serde(default)]
    pub session_backend: StoreBackend,
    #[serde(default)]
    pub job_backend: StoreBackend,
    #[serde(default = "d_state_db")]
    pub db_path: PathBuf,
    /// TTL for job records in the durable job store.
    #[serde(default = "d_86400")]
    pub job_ttl_seconds: u64,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            session_backend: StoreBackend::Memory,
            job_backend: StoreBackend::Memory,
            db_path: d_state_db(),
            job_ttl_seconds: d_86400(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parser backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParserBackendKind {
    #[default]
    Heuristic,
    Transformer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default)]
    pub backend: ParserBackendKind,
    /// Remote inference endpoint (transformer backend).
    #[serde(default)]
    pub inference_url: Option<String>,
    #[serde(default = "d_5000")]
    pub timeout_ms: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            backend: ParserBackendKind::Heuristic,
            inference_url: None,
            timeout_ms: d_5000(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Async pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Whether the async submission endpoint and the ingest worker run.
    #[serde(default)]
    pub async_enabled: bool,
    #[serde(default = "d_3")]
    pub retry_max_attempts: u32,
    #[serde(default = "d_250")]
    pub retry_base_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            async_enabled: false,
            retry_max_attempts: d_3(),
            retry_base_delay_ms: d_250(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
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

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        for (field, url) in [
            ("downstream.parser_url", &self.downstream.parser_url),
            ("downstream.graph_url", &self.downstream.graph_url),
            ("downstream.suggestion_url", &self.downstream.suggestion_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: format!("must start with http:// or https:// (got \"{url}\")"),
                });
            }
        }

        if self.auth.mode == AuthMode::ApiKey && self.auth.tenant_api_keys.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "auth.tenant_api_keys".into(),
                message: "api_key mode requires at least one tenant key".into(),
            });
        }

        if self.auth.mode == AuthMode::Jwt && self.auth.jwt_secret == d_jwt_secret() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "auth.jwt_secret".into(),
                message: "jwt mode is using the built-in development secret".into(),
            });
        }

        if let Some(key) = &self.encryption.content_key_hex {
            let decodable = key.len() == 64 && key.chars().all(|c| c.is_ascii_hexdigit());
            if !decodable {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "encryption.content_key_hex".into(),
                    message: "must be 64 hex characters (32 bytes)".into(),
                });
            }
        }

        if self.parser.backend == ParserBackendKind::Transformer
            && self.parser.inference_url.is_none()
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "parser.inference_url".into(),
                message: "transformer backend without inference_url falls back to heuristic"
                    .into(),
            });
        }

        if self.pipeline.retry_max_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "pipeline.retry_max_attempts".into(),
                message: "0 is clamped to 1 attempt".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_dialogue_port() -> u16 {
    8101
}

fn d_parser_port() -> u16 {
    8102
}

fn d_graph_port() -> u16 {
    8103
}

fn d_suggestion_port() -> u16 {
    8104
}

fn d_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

fn d_parser_url() -> String {
    "http://127.0.0.1:8102".into()
}

fn d_graph_url() -> String {
    "http://127.0.0.1:8103".into()
}

fn d_suggestion_url() -> String {
    "http://127.0.0.1:8104".into()
}

fn d_tenant() -> String {
    "public".into()
}

fn d_jwt_secret() -> String {
    "dev-only-secret-change-me".into()
}

fn d_consumer_group() -> String {
    "dialogue-service".into()
}

fn d_stream_prefix() -> String {
    "dialograph".into()
}

fn d_bus_db() -> PathBuf {
    PathBuf::from("./data/bus.db")
}

fn d_state_db() -> PathBuf {
    PathBuf::from("./data/state.db")
}

fn d_2000() -> u64 {
    2000
}

fn d_5000() -> u64 {
    5000
}

fn d_30000() -> u64 {
    30_000
}

fn d_86400() -> u64 {
    86_400
}

fn d_3() -> u32 {
    3
}

fn d_250() -> u64 {
    250
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.dialogue_port, 8101);
        assert_eq!(config.auth.mode, AuthMode::None);
        assert_eq!(config.event_bus.backend, BusBackend::Memory);
        assert!(!config.pipeline.async_enabled);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn parses_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            async_enabled = true
            retry_max_attempts = 5

            [event_bus]
            backend = "sqlite"
            consumer_group = "dialogue-pool"
            "#,
        )
        .unwrap();
        assert!(config.pipeline.async_enabled);
        assert_eq!(config.pipeline.retry_max_attempts, 5);
        assert_eq!(config.event_bus.backend, BusBackend::Sqlite);
        assert_eq!(config.event_bus.consumer_group, "dialogue-pool");
        // Untouched sections keep defaults.
        assert_eq!(config.server.graph_port, 8103);
    }

    #[test]
    fn validate_flags_bad_encryption_key() {
        let config: Config = toml::from_str(
            r#"
            [encryption]
            content_key_hex = "not-hex"
            "#,
        )
        .unwrap();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "encryption.content_key_hex"
                && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn validate_flags_api_key_mode_without_keys() {
        let config: Config = toml::from_str(
            r#"
            [auth]
            mode = "api_key"
            "#,
        )
        .unwrap();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "auth.tenant_api_keys" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn load_missing_file_is_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/dialograph.toml"))).unwrap();
        assert_eq!(config.auth.default_tenant, "public");
    }
}
