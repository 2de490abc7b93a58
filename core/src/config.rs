use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Which channel variant carries a turn's frames.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Server-push event stream plus a turn-issuing request.
    Stream,
    /// Single request/response whose body is replayed as one frame.
    Batch,
    /// In-process frame script, no backend.
    Scripted,
}

impl TransportKind {
    pub fn from_environment() -> Self {
        match std::env::var("SABLE_TRANSPORT") {
            Ok(value) if value.eq_ignore_ascii_case("batch") => Self::Batch,
            Ok(value) if value.eq_ignore_ascii_case("scripted") => Self::Scripted,
            _ => Self::Stream,
        }
    }
}

/// Resolved backend connection settings.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub base_url: Url,
    pub transport: TransportKind,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("backend not configured—create sable.yaml with a backend section.")]
    Missing,
    #[error("backend configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => {
                "Backend not configured—create sable.yaml with a backend section.".to_string()
            }
            Self::Invalid(detail) => {
                format!("Backend not configured—{detail}. Update sable.yaml.")
            }
        }
    }
}

impl BackendSettings {
    pub fn load() -> Result<Self, ConfigError> {
        let path = locate_config_file().ok_or(ConfigError::Missing)?;
        let contents = fs::read_to_string(&path).map_err(|err| {
            ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
        })?;
        let config: SableConfig = serde_yaml::from_str(&contents)
            .map_err(|err| ConfigError::Invalid(format!("invalid sable.yaml: {err}")))?;
        let backend = config
            .backend
            .ok_or_else(|| ConfigError::Invalid("missing `backend` section".to_string()))?;
        resolve_backend_settings(backend)
    }
}

fn resolve_backend_settings(backend: BackendSection) -> Result<BackendSettings, ConfigError> {
    let raw_url = backend.base_url.trim();
    if raw_url.is_empty() {
        return Err(ConfigError::Invalid(
            "missing backend base_url in sable.yaml".to_string(),
        ));
    }
    // Url::join treats a path without a trailing slash as a file; normalize so
    // route joining below the base always works.
    let normalized = if raw_url.ends_with('/') {
        raw_url.to_string()
    } else {
        format!("{raw_url}/")
    };
    let base_url = Url::parse(&normalized)
        .map_err(|err| ConfigError::Invalid(format!("invalid backend base_url: {err}")))?;

    let token = backend
        .token
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());
    let transport = backend
        .transport
        .unwrap_or_else(TransportKind::from_environment);
    let request_timeout = match backend.timeout_seconds {
        Some(0) => {
            return Err(ConfigError::Invalid(
                "timeout_seconds must be positive".to_string(),
            ))
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => DEFAULT_REQUEST_TIMEOUT,
    };

    Ok(BackendSettings {
        base_url,
        transport,
        token,
        request_timeout,
    })
}

fn locate_config_file() -> Option<PathBuf> {
    sable_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn sable_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("sable");
        paths.push(config_dir.join("sable.yaml"));
        paths.push(config_dir.join("sable.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".sable").join("sable.yaml"));
        paths.push(home_dir.join(".sable").join("sable.yml"));
    } else {
        paths.push(PathBuf::from("sable.yaml"));
        paths.push(PathBuf::from("sable.yml"));
    }
    paths
}

#[derive(Debug, Deserialize)]
struct SableConfig {
    backend: Option<BackendSection>,
}

#[derive(Debug, Default, Deserialize)]
struct BackendSection {
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    transport: Option<TransportKind>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}
