//! Application assembly shared by `main` and the router tests

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::cache::Cache;
use crate::config::Config;
use crate::db::repositories::Repositories;
use crate::db::DynDatabasePool;
use crate::services::mail::DynMailer;
use crate::services::Services;
use crate::theme::ThemeEngine;
use crate::web::middleware::{cookie_key, AppState};

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
const RATE_LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const EXPIRATION_INTERVAL: Duration = Duration::from_secs(60);

/// Wire repositories, services and templates over a migrated pool
pub async fn build_state(config: Config, pool: DynDatabasePool, mailer: DynMailer) -> Result<AppState> {
    for dir in [&config.storage.blueprints_dir, &config.storage.medias_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create storage directory: {:?}", dir))?;
    }

    let repos = Repositories::new(pool);
    let cache = Cache::from_config(&config.cache);
    let services = Services::new(&repos, &config, cache, mailer);

    let anonymous = services.users.ensure_anonymous().await?;
    tracing::info!("Anonymous pastes belong to '{}'", anonymous.username);

    let theme = ThemeEngine::new()?;
    let cookie_key = cookie_key(&config.site.cookie_key);

    Ok(AppState {
        config: Arc::new(config),
        services,
        theme: Arc::new(theme),
        cookie_key,
    })
}

/// Periodic housekeeping: expired sessions, rate-limiter entries and blueprints
pub fn spawn_background_tasks(state: &AppState) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let users = state.services.users.clone();
    handles.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match users.cleanup_expired_sessions().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("Removed {} expired sessions", removed),
                Err(e) => tracing::error!("Session cleanup failed: {}", e),
            }
        }
    }));

    let limiter = state.services.rate_limiter.clone();
    handles.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMITER_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            limiter.cleanup().await;
        }
    }));

    let blueprints = state.services.blueprints.clone();
    handles.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(EXPIRATION_INTERVAL);
        loop {
            interval.tick().await;
            match blueprints.expire_due(Utc::now()).await {
                Ok(0) => {}
                Ok(users) => tracing::info!("Expired blueprints, refreshed counters of {} users", users),
                Err(e) => tracing::error!("Blueprint expiration failed: {}", e),
            }
        }
    }));

    handles
}
