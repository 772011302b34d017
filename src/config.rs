use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::campaign::ContentKind;
use crate::error::Error;

pub const CONFIG_PATH_VAR: &str = "CAMPAIGN_SYNC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "campaign_sync.toml";

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ad_server: AdServerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    /// Reads the config file at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Config, Error> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;

        Ok(config)
    }

    pub fn load_from_env() -> Result<Config, Error> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Config::load(Path::new(&path))
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "debug".into()
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_uri")]
    pub uri: String,
    #[serde(default = "default_database_name")]
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> DatabaseConfig {
        DatabaseConfig {
            uri: default_database_uri(),
            name: default_database_name(),
        }
    }
}

fn default_database_uri() -> String {
    "mongodb://localhost:27017".into()
}

fn default_database_name() -> String {
    "campaign_sync".into()
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AdServerConfig {
    #[serde(default = "default_ad_server_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for AdServerConfig {
    fn default() -> AdServerConfig {
        AdServerConfig {
            base_url: default_ad_server_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_ad_server_url() -> String {
    "http://localhost:9000".into()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Everything the reconciliation pipeline reads besides the documents.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_delete_delay_ms")]
    pub delete_delay_ms: u64,
    #[serde(default = "default_delete_max_attempts")]
    pub delete_max_attempts: u32,
    #[serde(default)]
    pub templates: BannerTemplates,
}

impl SyncConfig {
    pub fn delete_delay(&self) -> Duration {
        Duration::from_millis(self.delete_delay_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> SyncConfig {
        SyncConfig {
            delete_delay_ms: default_delete_delay_ms(),
            delete_max_attempts: default_delete_max_attempts(),
            templates: BannerTemplates::default(),
        }
    }
}

fn default_delete_delay_ms() -> u64 {
    1000
}

fn default_delete_max_attempts() -> u32 {
    10
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BannerTemplates {
    #[serde(default = "default_sponsored_card_template")]
    pub sponsored_card: Value,
    #[serde(default = "default_sponsored_minireel_template")]
    pub sponsored_minireel: Value,
    #[serde(default = "default_group_minireel_template")]
    pub group_minireel: Value,
}

impl BannerTemplates {
    pub fn select(&self, kind: ContentKind, is_sponsored: bool) -> &Value {
        match (kind, is_sponsored) {
            (ContentKind::Card, _) => &self.sponsored_card,
            (ContentKind::MiniReel, true) => &self.sponsored_minireel,
            (ContentKind::MiniReel, false) => &self.group_minireel,
        }
    }
}

impl Default for BannerTemplates {
    fn default() -> BannerTemplates {
        BannerTemplates {
            sponsored_card: default_sponsored_card_template(),
            sponsored_minireel: default_sponsored_minireel_template(),
            group_minireel: default_group_minireel_template(),
        }
    }
}

fn default_sponsored_card_template() -> Value {
    json!({ "template": "sponsored-card", "size": "2x2" })
}

fn default_sponsored_minireel_template() -> Value {
    json!({ "template": "sponsored-minireel", "size": "2x2" })
}

fn default_group_minireel_template() -> Value {
    json!({ "template": "group-minireel", "size": "1x1" })
}
