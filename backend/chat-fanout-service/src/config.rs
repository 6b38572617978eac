use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which broker implementation backs the fan-out bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    Redis,
    /// In-process broker; single instance only.
    Memory,
}

impl FromStr for BrokerBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(BrokerBackend::Redis),
            "memory" | "in-memory" => Ok(BrokerBackend::Memory),
            other => Err(AppError::Config(format!(
                "BROKER_BACKEND must be `redis` or `memory`, got {other:?}"
            ))),
        }
    }
}

/// Broker channel names for the three logical streams.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub new_comments: String,
    pub client_to_broker: String,
    pub broker_to_client: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            new_comments: "learning-spring-boot-comments".to_string(),
            client_to_broker: "learning-spring-boot-chat-user-messages".to_string(),
            broker_to_client: "learning-spring-boot-chat-user-messages".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub client_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub broker_backend: BrokerBackend,
    pub redis_url: String,
    pub channels: ChannelConfig,
    /// Per-connection queue depth before new messages are dropped.
    pub fanout_buffer: usize,
    pub publish_timeout: Duration,
    pub heartbeat: HeartbeatConfig,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8084,
            workers: 4,
            broker_backend: BrokerBackend::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            channels: ChannelConfig::default(),
            fanout_buffer: 256,
            publish_timeout: Duration::from_millis(2000),
            heartbeat: HeartbeatConfig::default(),
            cors_allowed_origins: vec!["http://localhost:9072".to_string()],
        }
    }
}

impl Config {
    fn parse_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
        match env::var(key) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{key} has invalid value {raw:?}"))),
            Err(_) => Ok(default),
        }
    }

    fn parse_positive(key: &str, default: u64) -> Result<u64, AppError> {
        let value = Self::parse_var(key, default)?;
        if value == 0 {
            return Err(AppError::Config(format!("{key} must be greater than zero")));
        }
        Ok(value)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);
        let port = Self::parse_var("PORT", defaults.port)?;
        let workers = Self::parse_positive("WORKERS", defaults.workers as u64)? as usize;

        let broker_backend = match env::var("BROKER_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.broker_backend,
        };
        let redis_url = env::var("REDIS_URL").unwrap_or(defaults.redis_url);

        let channels = ChannelConfig {
            new_comments: env::var("NEW_COMMENTS_CHANNEL")
                .unwrap_or(defaults.channels.new_comments),
            client_to_broker: env::var("CLIENT_TO_BROKER_CHANNEL")
                .unwrap_or(defaults.channels.client_to_broker),
            broker_to_client: env::var("BROKER_TO_CLIENT_CHANNEL")
                .unwrap_or(defaults.channels.broker_to_client),
        };

        let fanout_buffer =
            Self::parse_positive("FANOUT_BUFFER", defaults.fanout_buffer as u64)? as usize;
        let publish_timeout = Duration::from_millis(Self::parse_positive(
            "PUBLISH_TIMEOUT_MS",
            defaults.publish_timeout.as_millis() as u64,
        )?);

        let heartbeat = HeartbeatConfig {
            interval: Duration::from_secs(Self::parse_positive(
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat.interval.as_secs(),
            )?),
            client_timeout: Duration::from_secs(Self::parse_positive(
                "CLIENT_TIMEOUT_SECS",
                defaults.heartbeat.client_timeout.as_secs(),
            )?),
        };
        if heartbeat.client_timeout <= heartbeat.interval {
            return Err(AppError::Config(
                "CLIENT_TIMEOUT_SECS must be larger than HEARTBEAT_INTERVAL_SECS".into(),
            ));
        }

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|value| Self::parse_list(&value))
            .unwrap_or(defaults.cors_allowed_origins);

        Ok(Self {
            host,
            port,
            workers,
            broker_backend,
            redis_url,
            channels,
            fanout_buffer,
            publish_timeout,
            heartbeat,
            cors_allowed_origins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "HOST",
        "PORT",
        "WORKERS",
        "BROKER_BACKEND",
        "REDIS_URL",
        "NEW_COMMENTS_CHANNEL",
        "CLIENT_TO_BROKER_CHANNEL",
        "BROKER_TO_CLIENT_CHANNEL",
        "FANOUT_BUFFER",
        "PUBLISH_TIMEOUT_MS",
        "HEARTBEAT_INTERVAL_SECS",
        "CLIENT_TIMEOUT_SECS",
        "CORS_ALLOWED_ORIGINS",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            Config::parse_list("http://a:1, ,http://b:2,"),
            vec!["http://a:1".to_string(), "http://b:2".to_string()]
        );
    }

    #[test]
    fn test_broker_backend_from_str() {
        assert_eq!("redis".parse::<BrokerBackend>().unwrap(), BrokerBackend::Redis);
        assert_eq!(" Memory ".parse::<BrokerBackend>().unwrap(), BrokerBackend::Memory);
        assert!("kafka".parse::<BrokerBackend>().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = Config::from_env().unwrap();

        assert_eq!(config.port, 8084);
        assert_eq!(config.broker_backend, BrokerBackend::Redis);
        assert_eq!(config.fanout_buffer, 256);
        assert_eq!(
            config.channels.client_to_broker,
            config.channels.broker_to_client
        );
        assert_eq!(config.cors_allowed_origins, vec!["http://localhost:9072"]);
        assert_eq!(config.bind_address(), "0.0.0.0:8084");
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("PORT", "9100");
        env::set_var("BROKER_BACKEND", "memory");
        env::set_var("FANOUT_BUFFER", "8");
        env::set_var("BROKER_TO_CLIENT_CHANNEL", "chat-out");
        env::set_var("CORS_ALLOWED_ORIGINS", "*");

        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.port, 9100);
        assert_eq!(config.broker_backend, BrokerBackend::Memory);
        assert_eq!(config.fanout_buffer, 8);
        assert_eq!(config.channels.broker_to_client, "chat-out");
        assert_eq!(config.cors_allowed_origins, vec!["*"]);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_invalid_values() {
        clear_env();
        env::set_var("FANOUT_BUFFER", "0");
        assert!(matches!(Config::from_env(), Err(AppError::Config(_))));

        clear_env();
        env::set_var("PORT", "not-a-port");
        assert!(matches!(Config::from_env(), Err(AppError::Config(_))));

        clear_env();
        env::set_var("HEARTBEAT_INTERVAL_SECS", "30");
        env::set_var("CLIENT_TIMEOUT_SECS", "10");
        assert!(matches!(Config::from_env(), Err(AppError::Config(_))));
        clear_env();
    }
}
