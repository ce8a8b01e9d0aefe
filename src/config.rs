use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOCATION: &str = "Unknown";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_HISTORY_TTL_SECS: u64 = 5 * 60;
const DEFAULT_HISTORY_MAX_TURNS: usize = 10;
const DEFAULT_ARTIFACT_TTL_SECS: u64 = 180 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10 * 60;
const DEFAULT_GROK_API_BASE: &str = "https://api.x.ai/v1";
const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_LINE_API_BASE: &str = "https://api.line.me/v2/bot";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the dotenv file.
    ReadEnvFile { path: PathBuf, source: dotenvy::Error },
    /// A required variable is unset or empty.
    Missing(&'static str),
    /// A variable is set but unusable.
    Invalid { var: &'static str, value: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadEnvFile { path, source } => {
                write!(f, "failed to read env file '{}': {}", path.display(), source)
            }
            Self::Missing(var) => write!(f, "{} not set", var),
            Self::Invalid { var, value, reason } => {
                write!(f, "invalid value '{}' for {}: {}", value, var, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadEnvFile { source, .. } => Some(source),
            Self::Missing(_) | Self::Invalid { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub grok_api_key: String,
    pub gemini_api_key: String,
    /// LINE channel secret, used to verify webhook signatures.
    pub channel_secret: String,
    /// LINE channel access token, used for replies.
    pub channel_token: String,
    pub port: u16,
    /// Externally reachable `scheme://host`. Resolved from the LINE webhook
    /// endpoint at startup when unset.
    pub public_base_url: Option<String>,
    /// Location passed to web-grounded completions when the caller gives none.
    pub default_location: String,
    pub upstream_timeout: Duration,
    pub history_ttl: Duration,
    pub history_max_turns: usize,
    pub artifact_ttl: Duration,
    pub sweep_interval: Duration,
    pub log_dir: PathBuf,
    pub grok_api_base: String,
    pub gemini_api_base: String,
    pub line_api_base: String,
}

impl Config {
    /// Load from the process environment, layered over an optional dotenv file.
    ///
    /// With no explicit path, `.env` in the working directory is used if present.
    /// Process variables win over file values.
    pub fn load(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = Path::new(".env");
        let path = match env_file {
            Some(p) => Some(p),
            None if default_path.exists() => Some(default_path),
            None => None,
        };

        let mut vars = HashMap::new();
        if let Some(path) = path {
            vars.extend(read_env_file(path)?);
        }
        vars.extend(std::env::vars_os().filter_map(|(k, v)| {
            Some((k.into_string().ok()?, v.into_string().ok()?))
        }));

        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(Self {
            grok_api_key: required(vars, "GROK_API_KEY")?,
            gemini_api_key: required(vars, "GEMINI_API_KEY")?,
            channel_secret: required(vars, "CHANNEL_SECRET")?,
            channel_token: required(vars, "CHANNEL_TOKEN")?,
            port: positive(vars, "PORT", DEFAULT_PORT)?,
            public_base_url: optional(vars, "PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            default_location: optional(vars, "DEFAULT_LOCATION")
                .unwrap_or(DEFAULT_LOCATION)
                .to_string(),
            upstream_timeout: seconds(vars, "UPSTREAM_TIMEOUT_SECS", DEFAULT_UPSTREAM_TIMEOUT_SECS)?,
            history_ttl: seconds(vars, "HISTORY_TTL_SECS", DEFAULT_HISTORY_TTL_SECS)?,
            history_max_turns: positive(vars, "HISTORY_MAX_TURNS", DEFAULT_HISTORY_MAX_TURNS)?,
            artifact_ttl: seconds(vars, "ARTIFACT_TTL_SECS", DEFAULT_ARTIFACT_TTL_SECS)?,
            sweep_interval: seconds(vars, "SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?,
            log_dir: optional(vars, "LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
            grok_api_base: base_url(vars, "GROK_API_BASE", DEFAULT_GROK_API_BASE),
            gemini_api_base: base_url(vars, "GEMINI_API_BASE", DEFAULT_GEMINI_API_BASE),
            line_api_base: base_url(vars, "LINE_API_BASE", DEFAULT_LINE_API_BASE),
        })
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let err = |source: dotenvy::Error| ConfigError::ReadEnvFile {
        path: path.to_path_buf(),
        source,
    };
    dotenvy::from_path_iter(path)
        .map_err(err)?
        .map(|item| item.map_err(err))
        .collect()
}

fn optional<'a>(vars: &'a HashMap<String, String>, var: &str) -> Option<&'a str> {
    vars.get(var).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn required(vars: &HashMap<String, String>, var: &'static str) -> Result<String, ConfigError> {
    optional(vars, var)
        .map(str::to_string)
        .ok_or(ConfigError::Missing(var))
}

fn positive<T>(vars: &HashMap<String, String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let Some(raw) = optional(vars, var) else {
        return Ok(default);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason,
    };
    let value = raw.parse::<T>().map_err(|e| invalid(e.to_string()))?;
    if value <= T::default() {
        return Err(invalid("must be greater than zero".into()));
    }
    Ok(value)
}

fn seconds(vars: &HashMap<String, String>, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
    positive(vars, var, default).map(Duration::from_secs)
}

fn base_url(vars: &HashMap<String, String>, var: &str, default: &str) -> String {
    optional(vars, var)
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}
