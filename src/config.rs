use base64::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub library: LibraryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub opds: OpdsConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// URL prefix stripped from incoming paths and prepended to every
    /// generated link (for reverse proxies serving the catalog at a
    /// sub-path).
    #[serde(default)]
    pub root_prefix: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    /// Root directory of books.
    pub path: PathBuf,
    /// Where catalog database files live (one per library path).
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    /// Keep a filesystem watcher on the library root.
    #[serde(default)]
    pub watch: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub use_http_auth: bool,
    /// Remember successfully authenticated clients by fingerprint.
    #[serde(default)]
    pub remember_clients: bool,
    /// Refuse an IP outright once it exceeds the failure threshold.
    #[serde(default)]
    pub ban_clients: bool,
    #[serde(default = "default_wrong_attempts")]
    pub wrong_attempts_count: u32,
    /// `user:pass[;user:pass]…`, optionally base64-encoded (see `encred`).
    #[serde(default)]
    pub credentials: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpdsConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_items_per_page")]
    pub items_per_page: usize,
    /// User-Agent substrings of readers that take FB2 natively.
    #[serde(default = "default_accept_fb2_agents")]
    pub accept_fb2_agents: Vec<String>,
    /// Affects sort collation and genre display names only.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_cover_width")]
    pub cover_width: u32,
    #[serde(default = "default_cover_height")]
    pub cover_height: u32,
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,
    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConverterConfig {
    /// Directory containing the external FB2→EPUB converter binary.
    /// Empty disables conversion.
    #[serde(default)]
    pub path: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Root prefix normalized to "" or "/prefix".
    pub fn root_prefix(&self) -> String {
        let trimmed = self.server.root_prefix.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }

    /// Decode the configured credential list. The blob is accepted
    /// either base64-encoded (the `encred` output) or plain.
    pub fn credentials(&self) -> Vec<(String, String)> {
        let raw = self.auth.credentials.trim();
        if raw.is_empty() {
            return Vec::new();
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(raw)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|s| s.contains(':'))
            .unwrap_or_else(|| raw.to_string());
        parse_credentials(&decoded)
    }
}

/// Parse `user:pass[;user:pass]…` into pairs.
pub fn parse_credentials(s: &str) -> Vec<(String, String)> {
    s.split(';')
        .filter_map(|pair| {
            let (user, pass) = pair.split_once(':')?;
            let user = user.trim();
            if user.is_empty() {
                return None;
            }
            Some((user.to_string(), pass.to_string()))
        })
        .collect()
}

/// Encode a credential list the way the config expects it.
pub fn encode_credentials(pairs: &[(String, String)]) -> String {
    let joined = pairs
        .iter()
        .map(|(u, p)| format!("{u}:{p}"))
        .collect::<Vec<_>>()
        .join(";");
    base64::engine::general_purpose::STANDARD.encode(joined)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            root_prefix: String::new(),
            log_level: default_log_level(),
        }
    }
}

impl Default for OpdsConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            items_per_page: default_items_per_page(),
            accept_fb2_agents: default_accept_fb2_agents(),
            language: default_language(),
            cover_width: default_cover_width(),
            cover_height: default_cover_height(),
            thumbnail_width: default_thumbnail_width(),
            thumbnail_height: default_thumbnail_height(),
        }
    }
}

// Default value functions

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_wrong_attempts() -> u32 {
    3
}

fn default_title() -> String {
    "TinyOPDS".to_string()
}

fn default_items_per_page() -> usize {
    30
}

fn default_accept_fb2_agents() -> Vec<String> {
    vec!["FBReader".to_string(), "Moon+ Reader".to_string()]
}

fn default_language() -> String {
    "en".to_string()
}

fn default_cover_width() -> u32 {
    480
}

fn default_cover_height() -> u32 {
    800
}

fn default_thumbnail_width() -> u32 {
    96
}

fn default_thumbnail_height() -> u32 {
    144
}
