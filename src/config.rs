use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_BODY_LIMIT_MB: usize = 16;
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_UPLOAD_FOLDER: &str = "static/uploads";
const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const DEFAULT_MODEL_PATH: &str = "models/poultry_disease_model.h5";
const DEFAULT_MODEL_LABELS: &str = "models/labels.json";
const DEFAULT_DATABASE_URL: &str = "sqlite://poultry_classification.db";
const DEFAULT_PRODUCTION_LOG_FILE: &str = "logs/app.log";
const DEVELOPMENT_SECRET_KEY: &str = "dev-secret-key-change-in-production";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SECRET_KEY environment variable must be set in production")]
    MissingSecretKey,

    #[error("unknown APP_ENV {0:?} (expected development, production or testing)")]
    UnknownProfile(String),

    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Development,
    Production,
    Testing,
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" | "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "testing" | "test" => Ok(Self::Testing),
            other => Err(ConfigError::UnknownProfile(other.to_string())),
        }
    }
}

/// Startup configuration shared by every request handler.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub profile: Profile,
    pub secret_key: String,
    pub body_limit_bytes: usize,
    pub upload_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
    /// Model artifact location. Nothing loads it yet.
    pub model_path: PathBuf,
    pub model_labels_path: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    /// Reserved for a future record store; unused.
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let profile = match var("APP_ENV") {
            Some(value) => value.parse()?,
            None => Profile::Development,
        };

        let secret_key = match (var("SECRET_KEY"), profile) {
            (Some(key), _) => key,
            (None, Profile::Production) => return Err(ConfigError::MissingSecretKey),
            (None, _) => DEVELOPMENT_SECRET_KEY.to_string(),
        };

        let body_limit_mb = match var("BODY_LIMIT_MB") {
            Some(value) => parse_var::<usize>("BODY_LIMIT_MB", &value)?,
            None => DEFAULT_BODY_LIMIT_MB,
        };
        let body_limit_bytes = body_limit_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ConfigError::Invalid {
                var: "BODY_LIMIT_MB",
                value: body_limit_mb.to_string(),
                reason: "too large".into(),
            })?;

        let allowed_extensions = match var("ALLOWED_EXTENSIONS") {
            Some(value) => parse_extensions(&value)?,
            None => DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        };

        let log_file = var("LOG_FILE").map(PathBuf::from).or_else(|| {
            (profile == Profile::Production).then(|| PathBuf::from(DEFAULT_PRODUCTION_LOG_FILE))
        });

        let host = match var("HOST") {
            Some(value) => parse_var::<IpAddr>("HOST", &value)?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port = match var("PORT") {
            Some(value) => parse_var::<u16>("PORT", &value)?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            profile,
            secret_key,
            body_limit_bytes,
            upload_dir: PathBuf::from(
                var("UPLOAD_FOLDER").unwrap_or_else(|| DEFAULT_UPLOAD_FOLDER.into()),
            ),
            allowed_extensions,
            model_path: PathBuf::from(
                var("MODEL_PATH").unwrap_or_else(|| DEFAULT_MODEL_PATH.into()),
            ),
            model_labels_path: PathBuf::from(
                var("MODEL_LABELS").unwrap_or_else(|| DEFAULT_MODEL_LABELS.into()),
            ),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            log_file,
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            host,
            port,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Logs a warning for each model artifact that is not on disk.
    pub fn check_model_artifacts(&self) {
        for path in [&self.model_path, &self.model_labels_path] {
            if !path.exists() {
                tracing::warn!(
                    path = %path.display(),
                    "model artifact not found; serving placeholder predictions"
                );
            }
        }
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_extensions(value: &str) -> Result<Vec<String>, ConfigError> {
    let exts: Vec<String> = value
        .split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();

    if exts.is_empty() {
        return Err(ConfigError::Invalid {
            var: "ALLOWED_EXTENSIONS",
            value: value.to_string(),
            reason: "no extensions listed".into(),
        });
    }
    if let Some(bad) = exts.iter().find(|ext| !ext.chars().all(|c| c.is_ascii_alphanumeric())) {
        return Err(ConfigError::Invalid {
            var: "ALLOWED_EXTENSIONS",
            value: value.to_string(),
            reason: format!("{bad:?} is not a plain extension"),
        });
    }
    Ok(exts)
}
