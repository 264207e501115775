//! Application-level configuration loading: scheduler cadence, artifact delivery
//! and storage selection.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SONG_BATTLE_CONFIG_PATH";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
const DEFAULT_ARTIFACT_ATTEMPTS: u32 = 5;
const DEFAULT_ARTIFACT_BACKOFF_MS: u64 = 500;
const DEFAULT_ARTIFACT_TIMEOUT_SECS: u64 = 10;

/// Where battles are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local store, lost on restart.
    Memory,
    /// MongoDB replica set.
    Mongo {
        /// Connection string.
        uri: String,
        /// Database name; the store picks a default when absent.
        database: Option<String>,
    },
}

impl StorageBackend {
    /// Short name reported by the health check.
    pub fn label(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Mongo { .. } => "mongo",
        }
    }
}

/// Scheduler cadence and external trigger guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Interval of the internal tick; `None` disables the timer.
    pub tick_interval: Option<Duration>,
    /// Shared secret expected in `X-Scheduler-Token`; `None` disables the endpoint.
    pub trigger_token: Option<String>,
}

/// Artifact generation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSettings {
    /// Endpoint receiving generation requests; the local generator is used when unset.
    pub webhook_url: Option<String>,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    port: u16,
    storage: StorageBackend,
    scheduler: SchedulerSettings,
    artifacts: ArtifactSettings,
}

impl AppConfig {
    /// Load the configuration from disk and the environment, falling back to
    /// built-in defaults for anything missing.
    pub fn load() -> Self {
        let raw = read_raw_config();
        Self::from_sources(raw, |key| env::var(key).ok())
    }

    fn from_sources(raw: RawConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match lookup("PORT") {
            Some(value) => value.parse().unwrap_or_else(|err| {
                warn!(value = %value, error = %err, "invalid PORT; using configured port");
                raw.port.unwrap_or(DEFAULT_PORT)
            }),
            None => raw.port.unwrap_or(DEFAULT_PORT),
        };

        let storage = match lookup("MONGO_URI").or(raw.storage.mongo_uri) {
            Some(uri) => StorageBackend::Mongo {
                uri,
                database: lookup("MONGO_DB").or(raw.storage.mongo_db),
            },
            None => StorageBackend::Memory,
        };

        let tick_secs = raw
            .scheduler
            .tick_interval_secs
            .unwrap_or(DEFAULT_TICK_INTERVAL_SECS);
        let scheduler = SchedulerSettings {
            tick_interval: (tick_secs > 0).then(|| Duration::from_secs(tick_secs)),
            trigger_token: lookup("SCHEDULER_TRIGGER_TOKEN").or(raw.scheduler.trigger_token),
        };

        let artifacts = ArtifactSettings {
            webhook_url: lookup("ARTIFACT_WEBHOOK_URL").or(raw.artifacts.webhook_url),
            max_attempts: raw
                .artifacts
                .max_attempts
                .unwrap_or(DEFAULT_ARTIFACT_ATTEMPTS)
                .max(1),
            initial_backoff: Duration::from_millis(
                raw.artifacts
                    .initial_backoff_ms
                    .unwrap_or(DEFAULT_ARTIFACT_BACKOFF_MS),
            ),
            request_timeout: Duration::from_secs(
                raw.artifacts
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_ARTIFACT_TIMEOUT_SECS),
            ),
        };

        Self {
            port,
            storage,
            scheduler,
            artifacts,
        }
    }

    /// TCP port the HTTP server binds to.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    pub fn scheduler(&self) -> &SchedulerSettings {
        &self.scheduler
    }

    pub fn artifacts(&self) -> &ArtifactSettings {
        &self.artifacts
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_sources(RawConfig::default(), |_| None)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    port: Option<u16>,
    storage: RawStorage,
    scheduler: RawScheduler,
    artifacts: RawArtifacts,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStorage {
    mongo_uri: Option<String>,
    mongo_db: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawScheduler {
    tick_interval_secs: Option<u64>,
    trigger_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawArtifacts {
    webhook_url: Option<String>,
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
}

fn read_raw_config() -> RawConfig {
    let path = resolve_config_path();
    match fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
            Ok(raw) => {
                info!(path = %path.display(), "loaded configuration file");
                raw
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to parse config; falling back to defaults"
                );
                RawConfig::default()
            }
        },
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(
                path = %path.display(),
                "config file not found; using built-in defaults"
            );
            RawConfig::default()
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "failed to read config; falling back to defaults"
            );
            RawConfig::default()
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn with_env(raw: RawConfig, vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_sources(raw, |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_use_memory_store_and_minute_ticks() {
        let config = AppConfig::default();
        assert_eq!(config.port(), DEFAULT_PORT);
        assert_eq!(config.storage(), &StorageBackend::Memory);
        assert_eq!(
            config.scheduler().tick_interval,
            Some(Duration::from_secs(60))
        );
        assert!(config.scheduler().trigger_token.is_none());
        assert!(config.artifacts().webhook_url.is_none());
    }

    #[test]
    fn zero_interval_disables_internal_timer() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"scheduler": {"tick_interval_secs": 0}}"#).unwrap();
        assert_eq!(with_env(raw, &[]).scheduler().tick_interval, None);
    }

    #[test]
    fn environment_overrides_file_values() {
        let raw: RawConfig = serde_json::from_str(
            r#"{"port": 9000, "scheduler": {"trigger_token": "file"}, "storage": {"mongo_db": "file_db"}}"#,
        )
        .unwrap();
        let config = with_env(
            raw,
            &[
                ("PORT", "7000"),
                ("SCHEDULER_TRIGGER_TOKEN", "env"),
                ("MONGO_URI", "mongodb://localhost:27017"),
            ],
        );

        assert_eq!(config.port(), 7000);
        assert_eq!(config.scheduler().trigger_token.as_deref(), Some("env"));
        assert_eq!(
            config.storage(),
            &StorageBackend::Mongo {
                uri: "mongodb://localhost:27017".into(),
                database: Some("file_db".into()),
            }
        );
    }

    #[test]
    fn invalid_port_falls_back_to_file_value() {
        let raw: RawConfig = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(with_env(raw, &[("PORT", "not-a-port")]).port(), 9000);
    }
}
