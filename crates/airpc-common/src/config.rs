//! Process-level configuration.
//!
//! Every knob has a default so a bare `RpcConfig::default()` is a working
//! configuration; values can be loaded from a TOML file and overridden per
//! key with `AIRPC_*` environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::protocol::error::{Result, RpcError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Registry endpoint, `host:port`.
    pub registry_address: String,

    /// Named load-balancing strategy (`"random"`, `"aipredictive"`, ...).
    pub load_balancer: String,

    /// Prediction service endpoint consulted by the predictive balancer.
    pub predictor_url: String,

    /// Fallback call deadline used until an adaptive timeout has produced
    /// a value, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            registry_address: "127.0.0.1:8848".to_string(),
            load_balancer: "aipredictive".to_string(),
            predictor_url: "http://localhost:8000/predict".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl RpcConfig {
    pub async fn from_file(path: &str) -> Result<Self> {
        let mut file = File::open(path).await?;
        let mut content = String::new();
        file.read_to_string(&mut content).await?;
        Self::from_content(&content)
    }

    pub fn from_content(content: &str) -> Result<Self> {
        let config: RpcConfig =
            toml::from_str(content).map_err(|e| RpcError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Apply `AIRPC_*` environment overrides on top of the loaded values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("AIRPC_REGISTRY_ADDRESS") {
            self.registry_address = v;
        }
        if let Ok(v) = std::env::var("AIRPC_LOAD_BALANCER") {
            self.load_balancer = v;
        }
        if let Ok(v) = std::env::var("AIRPC_PREDICTOR_URL") {
            self.predictor_url = v;
        }
        if let Ok(v) = std::env::var("AIRPC_REQUEST_TIMEOUT_SECS") {
            match v.parse() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(_) => tracing::warn!(value = %v, "invalid AIRPC_REQUEST_TIMEOUT_SECS, keeping {}", self.request_timeout_secs),
            }
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
