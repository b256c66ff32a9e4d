use crate::proxy::types::{ProxyConfig, RequestSizeLimit, RoutePrefix, TargetUrl};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub proxy: ProxySettings,
    pub site: SiteSettings,
    pub sink: SinkSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxySettings {
    pub route_prefix: String,
    pub upstream_url: String,
    pub max_request_size: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteSettings {
    pub root: String,
    pub blocked_routes: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkSettings {
    /// Record destination: "stdout", "tracing", or "file"
    pub output: String,
    /// Target path when `output` is "file"
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("application.host", "0.0.0.0")?
            .set_default("application.port", 3000)?
            .set_default("application.environment", environment.clone())?
            .set_default("proxy.route_prefix", "/my-service")?
            .set_default("proxy.upstream_url", "https://jsonplaceholder.typicode.com")?
            .set_default("proxy.max_request_size", 10 * 1024 * 1024)?
            .set_default("proxy.request_timeout_secs", 30)?
            .set_default("site.root", ".")?
            // The server's own files are never served, even when the site
            // root contains them
            .set_default(
                "site.blocked_routes",
                vec![
                    "/Cargo.toml".to_string(),
                    "/Cargo.lock".to_string(),
                    "/src/main.rs".to_string(),
                    "/.gitignore".to_string(),
                    "/README.md".to_string(),
                ],
            )?
            .set_default("sink.output", "stdout")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            // Add configuration file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix
            .add_source(Environment::with_prefix("GLASSWIRE").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

impl ProxySettings {
    /// Validate the raw settings into typed proxy configuration
    pub fn to_proxy_config(&self) -> Result<ProxyConfig, String> {
        Ok(ProxyConfig {
            route_prefix: RoutePrefix::try_new(self.route_prefix.clone())
                .map_err(|e| format!("proxy.route_prefix: {e}"))?,
            upstream_url: TargetUrl::try_new(self.upstream_url.clone())
                .map_err(|e| format!("proxy.upstream_url: {e}"))?,
            max_request_size: RequestSizeLimit::try_new(self.max_request_size)
                .map_err(|e| format!("proxy.max_request_size: {e}"))?,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}
