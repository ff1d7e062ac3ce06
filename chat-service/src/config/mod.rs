use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::net::IpAddr;
use std::str::FromStr;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 1.2;
pub const DEFAULT_MAX_TOKENS: u32 = 200;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 30;

/// Messages kept after the pinned system prompt.
pub const DEFAULT_HISTORY_WINDOW: usize = 6;
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 500;
pub const DEFAULT_SESSION_IDLE_TTL_SECONDS: u64 = 86_400;

pub const DEFAULT_API_REQUESTS: u32 = 100;
pub const DEFAULT_API_WINDOW_SECONDS: u64 = 900;
pub const DEFAULT_CHAT_REQUESTS: u32 = 10;
pub const DEFAULT_CHAT_WINDOW_SECONDS: u64 = 60;

pub const DEFAULT_DAILY_MESSAGE_LIMIT: u32 = 50;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 3_600;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Empty means any origin, like the browser client expects in dev.
    pub allowed_origins: Vec<String>,
    /// Reverse proxies allowed to report the caller via `x-forwarded-for`.
    pub trusted_proxies: Vec<IpAddr>,
    pub openai: OpenAiConfig,
    pub chat: ChatSettings,
    pub rate_limit: RateLimitConfig,
    pub usage: UsageConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Test,
    Prod,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!("Unknown environment: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Secret<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub history_window: usize,
    pub max_message_chars: usize,
    pub session_idle_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub api_requests: u32,
    pub api_window_seconds: u64,
    pub chat_requests: u32,
    pub chat_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct UsageConfig {
    pub daily_message_limit: u32,
    pub sweep_interval_seconds: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "chat-service".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            allowed_origins: Vec::new(),
            trusted_proxies: Vec::new(),
            openai: OpenAiConfig {
                api_key: Secret::new(String::new()),
                base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
                model: DEFAULT_OPENAI_MODEL.to_string(),
                temperature: DEFAULT_TEMPERATURE,
                max_tokens: DEFAULT_MAX_TOKENS,
                timeout_seconds: DEFAULT_UPSTREAM_TIMEOUT_SECONDS,
            },
            chat: ChatSettings {
                history_window: DEFAULT_HISTORY_WINDOW,
                max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
                session_idle_ttl_seconds: DEFAULT_SESSION_IDLE_TTL_SECONDS,
            },
            rate_limit: RateLimitConfig {
                api_requests: DEFAULT_API_REQUESTS,
                api_window_seconds: DEFAULT_API_WINDOW_SECONDS,
                chat_requests: DEFAULT_CHAT_REQUESTS,
                chat_window_seconds: DEFAULT_CHAT_WINDOW_SECONDS,
            },
            usage: UsageConfig {
                daily_message_limit: DEFAULT_DAILY_MESSAGE_LIMIT,
                sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            },
        }
    }
}

impl ChatConfig {
    pub fn load() -> Result<Self, AppError> {
        let mut common_config = core_config::Config::load()?;
        if let Ok(port) = env::var("PORT") {
            common_config.port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!("PORT is invalid: {}", e)))?;
        }

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let allowed_origins = get_env("ALLOWED_ORIGINS", Some(""), is_prod)?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let trusted_proxies = parse_ip_list(&get_env("TRUSTED_PROXIES", Some(""), is_prod)?)?;

        Ok(ChatConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("chat-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            allowed_origins,
            trusted_proxies,
            openai: OpenAiConfig {
                api_key: Secret::new(get_env("OPENAI_API_KEY", Some(""), is_prod)?),
                base_url: get_env("OPENAI_BASE_URL", Some(DEFAULT_OPENAI_BASE_URL), is_prod)?,
                model: get_env("OPENAI_MODEL", Some(DEFAULT_OPENAI_MODEL), is_prod)?,
                temperature: parse_env("OPENAI_TEMPERATURE", DEFAULT_TEMPERATURE, is_prod)?,
                max_tokens: parse_env("OPENAI_MAX_TOKENS", DEFAULT_MAX_TOKENS, is_prod)?,
                timeout_seconds: parse_env(
                    "OPENAI_TIMEOUT_SECONDS",
                    DEFAULT_UPSTREAM_TIMEOUT_SECONDS,
                    is_prod,
                )?,
            },
            chat: ChatSettings {
                history_window: parse_env("CHAT_HISTORY_WINDOW", DEFAULT_HISTORY_WINDOW, is_prod)?,
                max_message_chars: parse_env(
                    "CHAT_MAX_MESSAGE_CHARS",
                    DEFAULT_MAX_MESSAGE_CHARS,
                    is_prod,
                )?,
                session_idle_ttl_seconds: parse_env(
                    "SESSION_IDLE_TTL_SECONDS",
                    DEFAULT_SESSION_IDLE_TTL_SECONDS,
                    is_prod,
                )?,
            },
            rate_limit: RateLimitConfig {
                api_requests: parse_env("RATE_LIMIT_API_REQUESTS", DEFAULT_API_REQUESTS, is_prod)?,
                api_window_seconds: parse_env(
                    "RATE_LIMIT_API_WINDOW_SECONDS",
                    DEFAULT_API_WINDOW_SECONDS,
                    is_prod,
                )?,
                chat_requests: parse_env(
                    "RATE_LIMIT_CHAT_REQUESTS",
                    DEFAULT_CHAT_REQUESTS,
                    is_prod,
                )?,
                chat_window_seconds: parse_env(
                    "RATE_LIMIT_CHAT_WINDOW_SECONDS",
                    DEFAULT_CHAT_WINDOW_SECONDS,
                    is_prod,
                )?,
            },
            usage: UsageConfig {
                daily_message_limit: parse_env(
                    "USAGE_DAILY_MESSAGE_LIMIT",
                    DEFAULT_DAILY_MESSAGE_LIMIT,
                    is_prod,
                )?,
                sweep_interval_seconds: parse_env(
                    "USAGE_SWEEP_INTERVAL_SECONDS",
                    DEFAULT_SWEEP_INTERVAL_SECONDS,
                    is_prod,
                )?,
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr + ToString,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(&default.to_string()), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpAddr>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("TRUSTED_PROXIES entry {} is invalid: {}", s, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_aliases() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!("development".parse::<Environment>(), Ok(Environment::Dev));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn defaults_match_relay_constants() {
        let config = ChatConfig::default();
        assert_eq!(config.openai.model, "gpt-3.5-turbo");
        assert_eq!(config.openai.max_tokens, 200);
        assert!((config.openai.temperature - 1.2).abs() < f32::EPSILON);
        assert_eq!(config.chat.history_window, 6);
        assert_eq!(config.common.port, 3001);
    }

    #[test]
    fn parse_env_falls_back_to_default() {
        let value: u32 = parse_env("CHAT_SERVICE_TEST_UNSET_VARIABLE", 42, false).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn trusted_proxies_parse_as_addresses() {
        let proxies = parse_ip_list("10.0.0.1, ::1,").unwrap();
        assert_eq!(proxies.len(), 2);
        assert!(parse_ip_list("").unwrap().is_empty());
        assert!(matches!(parse_ip_list("proxy.local"), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn get_env_requires_value_in_prod() {
        let result = get_env("CHAT_SERVICE_TEST_UNSET_VARIABLE", Some("x"), true);
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
