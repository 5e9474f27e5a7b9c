//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between section and key)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special variables: `HOST`, `PORT`, `OPENAI_API_KEY`
//! 2. Environment variables (APP_SERVER__PORT, APP_SESSION__IDLE_TIMEOUT_SECS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::realtime::protocol::TurnDetection;
use crate::realtime::transport::{Credentials, Endpoint};
use crate::session::RelaySettings;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub realtime: RealtimeConfig,
    pub session: SessionConfig,
    pub turn_detection: TurnDetectionConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where and how to reach the remote speech service.
///
/// `api_key` is normally supplied through `OPENAI_API_KEY` rather than the
/// config file.
#[derive(Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub url: String,
    pub model: String,
    pub api_key: String,
    pub beta_header: String,
    /// Upper bound on dialing and configuring one connection
    pub connect_timeout_secs: u64,
}

// Keeps the key out of startup logs.
impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("beta_header", &self.beta_header)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Per-session timing and queue sizing.
///
/// ## Fields:
/// - `idle_timeout_secs`: no audio in either direction for this long ends the session
/// - `idle_check_interval_secs`: how often the idle monitor looks (detection latency)
/// - `remote_queue_capacity`: audio increments buffered between remote reader and bridge
/// - `client_queue_capacity`: client frames buffered between the socket actor and bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub idle_check_interval_secs: u64,
    pub remote_queue_capacity: usize,
    pub client_queue_capacity: usize,
}

/// Turn-detection policy pushed to the remote service once per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetectionConfig {
    pub kind: String,
    pub eagerness: String,
    pub create_response: bool,
    pub interrupt_response: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            realtime: RealtimeConfig {
                url: "wss://api.openai.com/v1/realtime".to_string(),
                model: "gpt-4o-mini-realtime-preview".to_string(),
                api_key: String::new(),
                beta_header: "realtime=v1".to_string(),
                connect_timeout_secs: 10,
            },
            session: SessionConfig {
                idle_timeout_secs: 60,
                idle_check_interval_secs: 5,
                remote_queue_capacity: 256,
                client_queue_capacity: 64,
            },
            turn_detection: TurnDetectionConfig {
                kind: "semantic_vad".to_string(),
                eagerness: "low".to_string(),
                create_response: true,
                interrupt_response: true,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_SESSION__IDLE_TIMEOUT_SECS=120`: Longer idle timeout
    /// - `APP_TURN_DETECTION__EAGERNESS=high`: More eager end-pointing
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    /// - `OPENAI_API_KEY=...`: Remote service credentials
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").prefix_separator("_").separator("__"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("realtime.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.realtime.url.trim().is_empty() {
            return Err(anyhow::anyhow!("Realtime service URL cannot be empty"));
        }

        if self.realtime.connect_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Realtime connect timeout must be greater than 0"));
        }

        if self.session.idle_check_interval_secs == 0 {
            return Err(anyhow::anyhow!("Idle check interval must be greater than 0"));
        }

        if self.session.idle_timeout_secs <= self.session.idle_check_interval_secs {
            return Err(anyhow::anyhow!(
                "Idle timeout ({}s) must be longer than the idle check interval ({}s)",
                self.session.idle_timeout_secs,
                self.session.idle_check_interval_secs
            ));
        }

        if self.session.remote_queue_capacity == 0 || self.session.client_queue_capacity == 0 {
            return Err(anyhow::anyhow!("Session queue capacities must be greater than 0"));
        }

        Ok(())
    }

    /// Turn-detection section in the shape the remote protocol expects.
    pub fn to_turn_detection(&self) -> TurnDetection {
        TurnDetection {
            kind: self.turn_detection.kind.clone(),
            eagerness: self.turn_detection.eagerness.clone(),
            create_response: self.turn_detection.create_response,
            interrupt_response: self.turn_detection.interrupt_response,
        }
    }

    /// Everything a session needs, detached from the config structure.
    pub fn to_relay_settings(&self) -> RelaySettings {
        RelaySettings {
            credentials: Credentials::new(self.realtime.api_key.clone()),
            endpoint: Endpoint {
                url: self.realtime.url.clone(),
                model: self.realtime.model.clone(),
                beta_header: self.realtime.beta_header.clone(),
            },
            turn_detection: self.to_turn_detection(),
            connect_timeout: Duration::from_secs(self.realtime.connect_timeout_secs),
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
            idle_check_interval: Duration::from_secs(self.session.idle_check_interval_secs),
            remote_queue_capacity: self.session.remote_queue_capacity,
        }
    }
}
