use crate::models::{Capability, ModelEndpointConfig};
use service_core::config::{self as core_config, get_env, get_env_parsed};
use service_core::error::AppError;
use service_core::retry::BackoffPolicy;
use std::collections::BTreeSet;
use std::time::Duration;

const DEFAULT_MODEL_CHAIN: &str = "gemini-2.5-flash,gemini-2.0-flash,gemini-2.0-flash-lite";
const DEFAULT_AUDIO_MODELS: &str = "gemini-2.5-flash-preview-native-audio-dialog";

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub common: core_config::Config,
    pub database: DatabaseConfig,
    pub google: GoogleConfig,
    pub models: ModelChainConfig,
    pub usage: UsageConfig,
    pub auth: AuthConfig,
    pub observability: ObservabilityConfig,
    pub persist_timeout: Duration,
    pub guest_rate_limit_per_min: u32,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct ModelChainConfig {
    /// Models in fallback order.
    pub chain: Vec<String>,
    /// Models that can produce audio.
    pub audio_models: Vec<String>,
    /// Total attempts per endpoint.
    pub retry_budget: u32,
    pub attempt_timeout: Duration,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct UsageConfig {
    pub question_limit: i32,
    pub privileged_roles: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

impl ChatConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = core_config::is_prod();

        let backoff = BackoffPolicy {
            initial_backoff: Duration::from_millis(get_env_parsed(
                "GENAI_BACKOFF_BASE_MS",
                250u64,
                is_prod,
            )?),
            max_backoff: Duration::from_millis(get_env_parsed(
                "GENAI_BACKOFF_MAX_MS",
                4000u64,
                is_prod,
            )?),
            jitter_ratio: get_env_parsed("GENAI_BACKOFF_JITTER", 0.25f64, is_prod)?,
            ..BackoffPolicy::default()
        };

        Ok(ChatConfig {
            common: common_config,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: get_env_parsed("DATABASE_MAX_CONNECTIONS", 10u32, is_prod)?,
                min_connections: get_env_parsed("DATABASE_MIN_CONNECTIONS", 1u32, is_prod)?,
            },
            google: GoogleConfig {
                api_key: get_env("GOOGLE_API_KEY", None, is_prod)?,
            },
            models: ModelChainConfig {
                chain: split_list(&get_env("GENAI_MODEL_CHAIN", Some(DEFAULT_MODEL_CHAIN), is_prod)?),
                audio_models: split_list(&get_env(
                    "GENAI_AUDIO_MODELS",
                    Some(DEFAULT_AUDIO_MODELS),
                    is_prod,
                )?),
                retry_budget: get_env_parsed("GENAI_ENDPOINT_RETRY_BUDGET", 2u32, is_prod)?,
                attempt_timeout: Duration::from_secs(get_env_parsed(
                    "GENAI_ATTEMPT_TIMEOUT_SECS",
                    30u64,
                    is_prod,
                )?),
                backoff,
            },
            usage: UsageConfig {
                question_limit: get_env_parsed("USAGE_QUESTION_LIMIT", 5i32, is_prod)?,
                privileged_roles: split_list(&get_env("PRIVILEGED_ROLES", Some("admin"), is_prod)?)
                    .into_iter()
                    .map(|role| role.to_ascii_lowercase())
                    .collect(),
            },
            auth: AuthConfig {
                jwt_secret: get_env("AUTH_JWT_SECRET", None, is_prod)?,
            },
            observability: ObservabilityConfig {
                log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
                otlp_endpoint: std::env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            },
            persist_timeout: Duration::from_secs(get_env_parsed(
                "PERSIST_TIMEOUT_SECS",
                10u64,
                is_prod,
            )?),
            guest_rate_limit_per_min: get_env_parsed("GUEST_RATE_LIMIT_PER_MIN", 30u32, is_prod)?,
        })
    }
}

impl ModelChainConfig {
    /// Build the fallback chain. Priority follows list position; audio models
    /// missing from the chain are appended after it and serve audio only.
    pub fn endpoints(&self) -> Vec<ModelEndpointConfig> {
        let mut ids = self.chain.clone();
        for audio in &self.audio_models {
            if !ids.contains(audio) {
                ids.push(audio.clone());
            }
        }

        ids.into_iter()
            .enumerate()
            .map(|(position, id)| {
                let endpoint = ModelEndpointConfig::new(id, position as u32, self.retry_budget);
                let audio = self.audio_models.contains(&endpoint.id);
                match (audio, self.chain.contains(&endpoint.id)) {
                    (true, true) => endpoint.with_capability(Capability::Audio),
                    (true, false) => endpoint.with_capabilities([Capability::Audio]),
                    (false, _) => endpoint,
                }
            })
            .collect()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
