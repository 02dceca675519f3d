use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub kube: KubeConfig,
    pub backend: BackendConfig,
    pub requeue: RequeueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address serving /health and /metrics
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KubeConfig {
    /// Namespace to watch; None watches all namespaces
    pub namespace: Option<String>,
    pub field_manager: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequeueConfig {
    /// Delay before retrying after the alerting backend failed
    pub backend_error: Duration,
    /// Fixed backoff after a failed status patch
    pub status_patch: Duration,
    /// Delay used by the controllers' error policy
    pub error_policy: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| Error::Config(format!("{key} must be a number of seconds: {e}"))),
            }
        };

        let config = Config {
            server: ServerConfig {
                addr: lookup("METRICS_ADDR").unwrap_or(defaults.server.addr),
            },
            kube: KubeConfig {
                namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
                field_manager: lookup("FIELD_MANAGER").unwrap_or(defaults.kube.field_manager),
            },
            backend: BackendConfig {
                url: lookup("ALERT_BACKEND_URL").unwrap_or(defaults.backend.url),
            },
            requeue: RequeueConfig {
                backend_error: secs("BACKEND_ERROR_REQUEUE_SECS", defaults.requeue.backend_error)?,
                status_patch: secs("STATUS_PATCH_REQUEUE_SECS", defaults.requeue.status_patch)?,
                error_policy: secs("ERROR_POLICY_REQUEUE_SECS", defaults.requeue.error_policy)?,
            },
        };

        if config.backend.url.is_empty() {
            return Err(Error::Config("ALERT_BACKEND_URL must not be empty".to_string()));
        }
        if config.kube.field_manager.is_empty() {
            return Err(Error::Config("FIELD_MANAGER must not be empty".to_string()));
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8080".to_string(),
            },
            kube: KubeConfig {
                namespace: None,
                field_manager: "alertsync-operator".to_string(),
            },
            backend: BackendConfig {
                url: "http://localhost:9090/api/v2".to_string(),
            },
            requeue: RequeueConfig {
                backend_error: Duration::from_secs(60),
                status_patch: Duration::from_secs(30),
                error_policy: Duration::from_secs(60),
            },
        }
    }
}
