use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub meta: MetaConfig,
    pub discord: DiscordConfig,
    pub relay: RelayConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_webhook_path_prefix")]
    pub webhook_path_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetaConfig {
    pub verify_token: String,
    pub app_secret: String,
    #[serde(default = "default_graph_version")]
    pub graph_version: String,
    pub page_id: String,
    pub page_access_token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscordConfig {
    pub webhook_url: String,
    #[serde(default = "default_webhook_wait")]
    pub wait: bool,
    #[serde(default)]
    pub disclaimer: String,
    #[serde(default)]
    pub mention_role_id: Option<String>,
    #[serde(default)]
    pub channel_routes: HashMap<String, String>,
    #[serde(default)]
    pub channel_priority: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_alerts_enabled")]
    pub alerts_enabled: bool,
    #[serde(default = "default_trigger_tag")]
    pub trigger_tag: String,
    #[serde(default)]
    pub max_post_age_minutes: i64,
    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Config {
    /// Load the configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config {
            server: ServerConfig {
                port: env_parsed("PORT", default_port())?,
                bind_address: env_string("BIND_ADDRESS", default_bind_address()),
                webhook_path_prefix: env_string(
                    "WEBHOOK_PATH_PREFIX",
                    default_webhook_path_prefix(),
                ),
            },
            meta: MetaConfig {
                verify_token: env_required("META_VERIFY_TOKEN")?,
                app_secret: env_required("META_APP_SECRET")?,
                graph_version: env_string("META_GRAPH_VERSION", default_graph_version()),
                page_id: env_required("META_PAGE_ID")?,
                page_access_token: env_required("META_PAGE_ACCESS_TOKEN")?,
            },
            discord: DiscordConfig {
                webhook_url: env_required("DISCORD_WEBHOOK_URL")?,
                wait: env_bool("DISCORD_WEBHOOK_WAIT", default_webhook_wait()),
                disclaimer: env_string("DISCORD_DISCLAIMER", String::new()),
                mention_role_id: env_optional("DISCORD_MENTION_ROLE_ID"),
                channel_routes: parse_channel_routes(
                    env_optional("CHANNEL_ROUTES").as_deref().unwrap_or("{}"),
                )?,
                channel_priority: parse_channel_priority(
                    env_optional("CHANNEL_PRIORITY").as_deref().unwrap_or(""),
                ),
            },
            relay: RelayConfig {
                alerts_enabled: env_bool("ALERTS_ENABLED", default_alerts_enabled()),
                trigger_tag: env_string("TRIGGER_TAG", default_trigger_tag()),
                max_post_age_minutes: env_parsed("MAX_POST_AGE_MINUTES", 0)?,
                worker_batch_size: env_parsed("WORKER_BATCH_SIZE", default_worker_batch_size())?,
            },
            database: DatabaseConfig {
                url: env_required("DATABASE_URL")?,
                max_connections: env_optional("DATABASE_MAX_CONNECTIONS")
                    .map(|v| parse_number(&v, "DATABASE_MAX_CONNECTIONS"))
                    .transpose()?,
                min_connections: env_optional("DATABASE_MIN_CONNECTIONS")
                    .map(|v| parse_number(&v, "DATABASE_MIN_CONNECTIONS"))
                    .transpose()?,
            },
            logging: LoggingConfig {
                level: env_string("LOG_LEVEL", default_log_level()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "PORT must be between 1 and 65535".to_string(),
            ));
        }

        if looks_like_placeholder(&self.meta.page_access_token) {
            return Err(ConfigError::InvalidConfig(
                "META_PAGE_ACCESS_TOKEN is still using a placeholder value; set a real page token"
                    .to_string(),
            ));
        }
        if looks_like_placeholder(&self.meta.app_secret) {
            return Err(ConfigError::InvalidConfig(
                "META_APP_SECRET is still using a placeholder value".to_string(),
            ));
        }

        ensure_https_url("DISCORD_WEBHOOK_URL", &self.discord.webhook_url)?;
        for (tag, url) in &self.discord.channel_routes {
            ensure_https_url(&format!("CHANNEL_ROUTES entry for {tag}"), url)?;
        }

        if !self.relay.trigger_tag.starts_with('#') || self.relay.trigger_tag.len() < 2 {
            return Err(ConfigError::InvalidConfig(
                "TRIGGER_TAG must be a hashtag, e.g. #discord".to_string(),
            ));
        }
        if self.relay.max_post_age_minutes < 0 {
            return Err(ConfigError::InvalidConfig(
                "MAX_POST_AGE_MINUTES cannot be negative".to_string(),
            ));
        }
        if self.relay.worker_batch_size < 1 {
            return Err(ConfigError::InvalidConfig(
                "WORKER_BATCH_SIZE must be at least 1".to_string(),
            ));
        }

        if self.database.url.is_empty() {
            return Err(ConfigError::Missing("DATABASE_URL".to_string()));
        }

        Ok(())
    }
}

fn env_required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::Missing(name.to_string()))
}

fn env_string(name: &str, default: String) -> String {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    env_optional(name)
        .map(|value| parse_bool(&value))
        .unwrap_or(default)
}

fn env_parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env_optional(name) {
        Some(value) => parse_number(&value, name),
        None => Ok(default),
    }
}

fn parse_number<T>(value: &str, name: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    value
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidConfig(format!("{name} has a non-numeric value")))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// `CHANNEL_ROUTES` is a JSON object mapping hashtags to webhook URLs.
fn parse_channel_routes(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let routes: HashMap<String, String> = serde_json::from_str(raw)?;
    Ok(routes
        .into_iter()
        .map(|(tag, url)| (tag.to_lowercase(), url))
        .collect())
}

/// `CHANNEL_PRIORITY` is a comma-separated, case-insensitive ordered tag list.
fn parse_channel_priority(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn ensure_https_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(value)
        .map_err(|e| ConfigError::InvalidConfig(format!("{name} is not a valid URL: {e}")))?;
    if parsed.scheme() != "https" {
        return Err(ConfigError::InvalidConfig(format!(
            "{name} must use https, got {}",
            parsed.scheme()
        )));
    }
    Ok(())
}

fn looks_like_placeholder(value: &str) -> bool {
    let lower = value.trim().to_ascii_lowercase();
    lower == "changeme"
        || lower == "your_token_here"
        || lower == "your_app_secret"
        || lower == "your_page_access_token"
        || lower.starts_with("<") && lower.ends_with(">")
}

fn default_port() -> u16 {
    3000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_webhook_path_prefix() -> String {
    "meta".to_string()
}

fn default_graph_version() -> String {
    "v19.0".to_string()
}

fn default_webhook_wait() -> bool {
    true
}

fn default_alerts_enabled() -> bool {
    true
}

fn default_trigger_tag() -> String {
    "#discord".to_string()
}

fn default_worker_batch_size() -> i64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            server: ServerConfig {
                port: default_port(),
                bind_address: default_bind_address(),
                webhook_path_prefix: default_webhook_path_prefix(),
            },
            meta: MetaConfig {
                verify_token: "verify".to_string(),
                app_secret: "secret".to_string(),
                graph_version: default_graph_version(),
                page_id: "1234567890".to_string(),
                page_access_token: "EAAG-token".to_string(),
            },
            discord: DiscordConfig {
                webhook_url: "https://discord.com/api/webhooks/1/abc".to_string(),
                wait: true,
                disclaimer: String::new(),
                mention_role_id: None,
                channel_routes: HashMap::new(),
                channel_priority: Vec::new(),
            },
            relay: RelayConfig {
                alerts_enabled: true,
                trigger_tag: default_trigger_tag(),
                max_post_age_minutes: 0,
                worker_batch_size: default_worker_batch_size(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/relay".to_string(),
                max_connections: None,
                min_connections: None,
            },
            logging: LoggingConfig {
                level: default_log_level(),
            },
        }
    }

    #[test]
    fn sample_config_validates() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn trigger_tag_must_be_a_hashtag() {
        let mut config = sample_config();
        config.relay.trigger_tag = "discord".to_string();
        assert!(config.validate().is_err());

        config.relay.trigger_tag = "#".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn webhook_urls_must_be_well_formed_https() {
        let mut config = sample_config();
        config.discord.webhook_url = "http://discord.com/api/webhooks/1/abc".to_string();
        assert!(config.validate().is_err());

        config.discord.webhook_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = sample_config();
        config
            .discord
            .channel_routes
            .insert("#stocks".to_string(), "ftp://hook.example/x".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn placeholder_tokens_are_rejected() {
        let mut config = sample_config();
        config.meta.page_access_token = "CHANGEME".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn channel_routes_parse_and_lowercase_tags() {
        let routes =
            parse_channel_routes(r##"{"#Stocks": "https://discord.com/api/webhooks/2/x"}"##)
                .unwrap();
        assert_eq!(
            routes.get("#stocks").map(String::as_str),
            Some("https://discord.com/api/webhooks/2/x")
        );
    }

    #[test]
    fn channel_routes_reject_malformed_json() {
        assert!(parse_channel_routes("not-json").is_err());
    }

    #[test]
    fn channel_priority_splits_trims_and_lowercases() {
        let priority = parse_channel_priority(" #Stocks, #crypto ,,#FX ");
        assert_eq!(priority, vec!["#stocks", "#crypto", "#fx"]);
    }

    #[test]
    fn bool_parsing_accepts_common_forms() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("Yes"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("nope"));
    }
}
