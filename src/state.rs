//! # Application State
//!
//! Shared by every HTTP handler through `web::Data<AppState>`.
//!
//! ## Contents:
//! - **config**: the validated configuration, read-only after startup
//! - **lifecycle**: the session lifecycle, which owns the session registry
//! - **start_time**: for uptime reporting
//!
//! `AppState` is cheap to clone: every field is either `Copy` or shared
//! behind an `Arc`, so each actix worker holds its own clone of the same state.

use crate::config::AppConfig;
use crate::session::SessionLifecycle;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub lifecycle: SessionLifecycle,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, lifecycle: SessionLifecycle) -> Self {
        Self {
            config: Arc::new(config),
            lifecycle,
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Number of sessions currently registered.
    pub fn active_sessions(&self) -> usize {
        self.lifecycle.registry().len()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
