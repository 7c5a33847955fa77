// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential lifecycle for the NIU account.
//!
//! One `CredentialManager` is shared by every report loop. It hands out
//! a bearer token that stays valid for at least the early-refresh
//! margin, renewing it when needed:
//! 1. Reuse the stored token if the server still accepts it
//! 2. Exchange the refresh token
//! 3. Log in again with the account password
//!
//! Renewed credentials are written back to the [`CredentialStore`].

use crate::db::CredentialStore;
use crate::error::{AppError, Result};
use crate::models::Credential;
use crate::time_utils::Clock;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Refresh this long before the access token actually expires.
pub const EARLY_REFRESH_MARGIN_SECS: i64 = 60;

/// Minimum spacing between resyncs from the credential store.
pub const STORE_SYNC_INTERVAL_SECS: i64 = 3;

/// Token endpoint operations needed to keep a credential alive.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Full password login.
    async fn login(&self, account: &str, password_md5: &str) -> Result<Credential>;

    /// Exchange a refresh token for a new credential.
    async fn refresh(&self, refresh_token: &str) -> Result<Credential>;

    /// Ask the server whether an access token is still accepted.
    async fn validate(&self, access_token: &str) -> Result<bool>;
}

/// Observable state of the managed credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Cached token valid beyond the early-refresh margin.
    Fresh,
    /// Expired, inside the margin, invalidated, or never obtained.
    Stale,
    /// A renewal exchange is in flight.
    Refreshing,
}

/// The manager's working copy of the credential.
#[derive(Debug, Clone, Default)]
pub struct CachedCredential {
    token: String,
    expires_at: i64,
    last_synced_at: Option<i64>,
    invalidated: bool,
    /// Why the most recent renewal failed, cleared on success.
    last_failure: Option<String>,
}

impl CachedCredential {
    fn is_fresh(&self, now: i64, margin: i64) -> bool {
        !self.invalidated && !self.token.is_empty() && now < self.expires_at - margin
    }

    /// Take the store's view if it holds a different, not-older token.
    fn adopt(&mut self, stored: &Credential) {
        if stored.access_token.is_empty() || stored.access_token == self.token {
            return;
        }
        if stored.access_expires_at >= self.expires_at || self.token.is_empty() {
            self.token = stored.access_token.clone();
            self.expires_at = stored.access_expires_at;
            self.invalidated = false;
        }
    }

    fn install(&mut self, credential: &Credential, now: i64) {
        self.token = credential.access_token.clone();
        self.expires_at = credential.access_expires_at;
        self.invalidated = false;
        self.last_failure = None;
        self.mark_synced(now);
    }

    fn mark_synced(&mut self, now: i64) {
        self.last_synced_at = Some(self.last_synced_at.map_or(now, |prev| prev.max(now)));
    }
}

/// Shared, serialized access to the account's bearer token.
pub struct CredentialManager {
    auth: Arc<dyn AuthApi>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    account: String,
    password_md5: String,
    margin_secs: i64,
    sync_interval_secs: i64,
    /// Cache check and renewal both happen under this lock, which stays
    /// held across the network exchange.
    cache: Mutex<CachedCredential>,
    /// Bumped after every renewal attempt, successful or not.
    renewal_generation: AtomicU64,
    refreshing: AtomicBool,
}

impl CredentialManager {
    pub fn new(
        auth: Arc<dyn AuthApi>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        account: String,
        password_md5: String,
    ) -> Self {
        Self {
            auth,
            store,
            clock,
            account,
            password_md5,
            margin_secs: EARLY_REFRESH_MARGIN_SECS,
            sync_interval_secs: STORE_SYNC_INTERVAL_SECS,
            cache: Mutex::new(CachedCredential::default()),
            renewal_generation: AtomicU64::new(0),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Override the early-refresh margin.
    pub fn with_margin_secs(mut self, margin_secs: i64) -> Self {
        self.margin_secs = margin_secs;
        self
    }

    /// Get a token valid for at least the early-refresh margin.
    ///
    /// Callers that queued behind a renewal reuse its outcome: they get
    /// the new token, or the same `AppError::Auth` if it failed, without
    /// starting another exchange.
    pub async fn get(&self) -> Result<String> {
        let observed_generation = self.renewal_generation.load(Ordering::Acquire);
        let mut cache = self.cache.lock().await;
        let now = self.clock.epoch_secs();

        self.sync_from_store(&mut cache, now).await;

        if cache.is_fresh(now, self.margin_secs) {
            return Ok(cache.token.clone());
        }

        if self.renewal_generation.load(Ordering::Acquire) != observed_generation {
            if let Some(reason) = &cache.last_failure {
                return Err(AppError::Auth(reason.clone()));
            }
        }

        self.refreshing.store(true, Ordering::Release);
        let result = self.renew(&mut cache, now).await;
        self.refreshing.store(false, Ordering::Release);
        self.renewal_generation.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(token) => Ok(token),
            Err(e) => {
                let reason = match e {
                    AppError::Auth(msg) => msg,
                    other => other.to_string(),
                };
                tracing::error!(error = %reason, "No usable NIU credential");
                cache.last_failure = Some(reason.clone());
                Err(AppError::Auth(reason))
            }
        }
    }

    /// Force the next `get()` past the cached token.
    ///
    /// Used when a caller learns the upstream rejected the token.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.lock().await;
        if !cache.invalidated {
            tracing::info!("Cached NIU token invalidated");
        }
        cache.invalidated = true;
    }

    /// Current state, for diagnostics.
    pub async fn state(&self) -> CredentialState {
        if self.refreshing.load(Ordering::Acquire) {
            return CredentialState::Refreshing;
        }
        let cache = self.cache.lock().await;
        if cache.is_fresh(self.clock.epoch_secs(), self.margin_secs) {
            CredentialState::Fresh
        } else {
            CredentialState::Stale
        }
    }

    /// Pick up tokens written by another process, at most once per sync
    /// interval unless the cache was invalidated.
    async fn sync_from_store(&self, cache: &mut CachedCredential, now: i64) {
        let due = cache.invalidated
            || cache
                .last_synced_at
                .map_or(true, |last| now - last >= self.sync_interval_secs);
        if !due {
            return;
        }
        cache.mark_synced(now);

        match self.store.load().await {
            Ok(Some(stored)) => cache.adopt(&stored),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read credential store"),
        }
    }

    /// Obtain a new token: reuse, refresh, then full login.
    async fn renew(&self, cache: &mut CachedCredential, now: i64) -> Result<String> {
        let stored = match self.store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read credential store, trying login");
                None
            }
        };

        if let Some(credential) = stored.as_ref() {
            if self.outlasts_margin(credential, now) {
                match self.auth.validate(&credential.access_token).await {
                    Ok(true) => {
                        tracing::info!("Stored NIU token still accepted, reusing it");
                        cache.install(credential, now);
                        return Ok(credential.access_token.clone());
                    }
                    Ok(false) => tracing::info!("Stored NIU token no longer accepted"),
                    Err(e) => tracing::warn!(error = %e, "NIU token validation failed"),
                }
            }

            if credential.is_refresh_usable(now) {
                match self.auth.refresh(&credential.refresh_token).await {
                    Ok(renewed) if self.outlasts_margin(&renewed, now) => {
                        tracing::info!(
                            expires_at = renewed.access_expires_at,
                            "NIU token refreshed"
                        );
                        return Ok(self.commit(cache, renewed, now).await);
                    }
                    Ok(renewed) => tracing::warn!(
                        expires_at = renewed.access_expires_at,
                        "Refreshed NIU token expires within the refresh margin"
                    ),
                    Err(e) => tracing::warn!(error = %e, "NIU token refresh failed"),
                }
            }
        }

        let renewed = self
            .auth
            .login(&self.account, &self.password_md5)
            .await
            .map_err(|e| AppError::Auth(format!("Login failed: {}", e)))?;

        if !self.outlasts_margin(&renewed, now) {
            return Err(AppError::Auth(
                "Login returned a token that expires within the refresh margin".to_string(),
            ));
        }

        tracing::info!(expires_at = renewed.access_expires_at, "Logged in to NIU");
        Ok(self.commit(cache, renewed, now).await)
    }

    /// Persist a renewed credential and install it in the cache.
    async fn commit(
        &self,
        cache: &mut CachedCredential,
        credential: Credential,
        now: i64,
    ) -> String {
        if let Err(e) = self.store.save(&credential).await {
            tracing::error!(error = %e, "Failed to persist NIU credential, keeping it in memory");
        }
        cache.install(&credential, now);
        credential.access_token
    }

    fn outlasts_margin(&self, credential: &Credential, now: i64) -> bool {
        !credential.access_token.is_empty() && now < credential.access_expires_at - self.margin_secs
    }
}
