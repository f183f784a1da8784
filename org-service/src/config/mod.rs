use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct OrgServiceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Casbin model file; the embedded model is used when unset.
    pub model_path: Option<String>,
}

impl OrgServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let otlp_endpoint = env::var("OTLP_ENDPOINT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| common_config.otlp_endpoint.clone());

        let config = OrgServiceConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("org-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_u32(
                    "DATABASE_MAX_CONNECTIONS",
                    &get_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                )?,
                min_connections: parse_u32(
                    "DATABASE_MIN_CONNECTIONS",
                    &get_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
                )?,
            },
            policy: PolicyConfig {
                model_path: env::var("POLICY_MODEL_PATH")
                    .ok()
                    .filter(|v| !v.trim().is_empty()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.database.max_connections == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MAX_CONNECTIONS must be greater than 0"
            )));
        }

        if self.database.min_connections == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS must be greater than 0"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if self.environment == Environment::Prod && self.otlp_endpoint.is_none() {
            tracing::warn!("OTLP_ENDPOINT not set in production; spans will not be exported");
        }

        Ok(())
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, AppError> {
    value.trim().parse().map_err(|e: std::num::ParseIntError| {
        AppError::ConfigError(anyhow::anyhow!("{} is not a valid number: {}", key, e))
    })
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

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
