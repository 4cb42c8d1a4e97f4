use std::collections::HashMap;

/// OAuth 2.0 client-credentials configuration. When absent, [`crate::auth`]
/// falls back to a static API key, or to no auth at all.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: url::Url,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiConfig {
    pub base_url: url::Url,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
    /// Source key -> destination key. Keys absent from this map fall back
    /// to the default camelCase -> snake_case rule in [`crate::transform`].
    #[serde(default)]
    pub column_mapping: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WarehouseConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

fn default_batch_size() -> usize {
    100_000
}
fn default_ceiling() -> i64 {
    1500
}
fn default_page_size() -> usize {
    20
}
fn default_max_pages() -> u32 {
    100
}
fn default_max_bisection_depth() -> u32 {
    5
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Tunables {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_ceiling")]
    pub max_records_per_period: i64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_bisection_depth")]
    pub max_bisection_depth: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_records_per_period: default_ceiling(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            max_bisection_depth: default_max_bisection_depth(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub tunables: Tunables,
}

impl Config {
    /// Reads and parses a JSON config file, following the same
    /// read-then-deserialize shape as `connector-init`'s image config
    /// loader.
    pub fn parse_from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context_path(path, "reading config file")?;
        let config: Config = serde_json::from_slice(&bytes)
            .with_context_path(path, "parsing config file")?;
        Ok(config)
    }
}

trait WithContextPath<T> {
    fn with_context_path(self, path: &std::path::Path, what: &str) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> WithContextPath<T> for Result<T, E> {
    fn with_context_path(self, path: &std::path::Path, what: &str) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{what} {}: {e}", path.display()))
    }
}
