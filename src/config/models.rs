use crate::batch::Batch;
use crate::dispatch::Isolation;
use crate::humanize::HumanDuration;
use crate::sink::OutputFormat;
use crate::worker::HttpConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub batches: Vec<Batch>,
}

/// Worker pool configuration (one pool per execution context)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    5
}

/// Fan-out configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DispatcherConfig {
    /// Maximum concurrent execution contexts, 0 = hardware concurrency
    #[serde(default)]
    pub parallelism: usize,
    #[serde(default)]
    pub isolation: Isolation,
}

/// HTTP fetcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: HumanDuration,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            proxy: None,
        }
    }
}

impl HttpSettings {
    pub fn to_http_config(&self) -> HttpConfig {
        HttpConfig {
            connect_timeout: self.connect_timeout.as_duration(),
            request_timeout: self.request_timeout.as_duration(),
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
        }
    }
}

fn default_connect_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(60)
}

fn default_user_agent() -> String {
    "fetchpool/0.1.0".to_string()
}

/// Record output configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.pool.workers, 5);
        assert_eq!(config.dispatcher.parallelism, 0);
        assert_eq!(config.dispatcher.isolation, Isolation::Process);
        assert_eq!(config.http.request_timeout, HumanDuration::from_secs(60));
        assert_eq!(config.output.format, OutputFormat::Text);
        assert!(config.batches.is_empty());
    }

    #[test]
    fn test_http_settings_conversion() {
        let settings = HttpSettings {
            connect_timeout: HumanDuration::from_millis(1500),
            proxy: Some("http://proxy:8080".to_string()),
            ..Default::default()
        };

        let http = settings.to_http_config();
        assert_eq!(http.connect_timeout, Duration::from_millis(1500));
        assert_eq!(http.request_timeout, Duration::from_secs(60));
        assert_eq!(http.user_agent, "fetchpool/0.1.0");
        assert_eq!(http.proxy.as_deref(), Some("http://proxy:8080"));
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
[pool]
workers = 8

[dispatcher]
parallelism = 3
isolation = "task"

[http]
request_timeout = "5s"

[output]
format = "json"

[[batches]]
name = "news"
urls = ["https://example.com", "https://example.org"]

[[batches]]
name = "empty"
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.workers, 8);
        assert_eq!(config.dispatcher.parallelism, 3);
        assert_eq!(config.dispatcher.isolation, Isolation::Task);
        assert_eq!(config.http.request_timeout, HumanDuration::from_secs(5));
        assert_eq!(config.http.connect_timeout, HumanDuration::from_secs(10));
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.batches.len(), 2);
        assert_eq!(config.batches[0].urls.len(), 2);
        assert!(config.batches[1].urls.is_empty());
    }
}
