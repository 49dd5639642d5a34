//! # Token Maintenance
//!
//! Refreshes stored provider tokens that are about to expire and removes
//! expired OAuth state rows and dead tokens. Runs as a background loop in
//! `serve` and on demand from the `oauth:refresh` and `oauth:cleanup`
//! commands.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use metrics::{counter, gauge, histogram};
use sea_orm::DatabaseConnection;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::TokenRefreshConfig;
use crate::crypto::TokenCipher;
use crate::models::oauth_token;
use crate::oauth::{OAuthError, ProviderRegistry};
use crate::repositories::{OAuthAccountRepository, OAuthStateRepository, OAuthTokenRepository};
use crate::server::AppState;

/// Outcome counts of one refresh pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshStats {
    pub due: u64,
    pub refreshed: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Rows removed by one cleanup pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupStats {
    pub states_removed: u64,
    pub tokens_removed: u64,
}

/// How a failed refresh should be treated
#[derive(Debug, PartialEq, Eq)]
pub enum RefreshErrorClassification {
    /// The grant is gone; the user has to sign in with the provider again
    Permanent,
    /// Network trouble or a provider hiccup; retried on the next tick
    Transient,
    /// The provider throttled us
    RateLimited,
}

/// Sorts a provider error into a [`RefreshErrorClassification`].
pub fn classify_refresh_error(error: &OAuthError) -> RefreshErrorClassification {
    match error {
        OAuthError::Rejected { error, .. }
            if error == "invalid_grant" || error == "unauthorized_client" =>
        {
            RefreshErrorClassification::Permanent
        }
        OAuthError::Http { status: 429, .. } => RefreshErrorClassification::RateLimited,
        OAuthError::Http { status: 400 | 401, .. } | OAuthError::Unsupported { .. } => {
            RefreshErrorClassification::Permanent
        }
        _ => RefreshErrorClassification::Transient,
    }
}

/// Background refresh and cleanup of OAuth data
#[derive(Clone)]
pub struct TokenMaintenance {
    db: Arc<DatabaseConnection>,
    providers: Arc<ProviderRegistry>,
    tokens: OAuthTokenRepository,
    config: TokenRefreshConfig,
}

impl TokenMaintenance {
    pub fn new(
        db: Arc<DatabaseConnection>,
        providers: Arc<ProviderRegistry>,
        cipher: TokenCipher,
        config: TokenRefreshConfig,
    ) -> Self {
        let tokens = OAuthTokenRepository::new(db.clone(), cipher);
        Self {
            db,
            providers,
            tokens,
            config,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.db.clone(),
            state.providers.clone(),
            state.token_cipher.clone(),
            state.config.token_refresh.clone(),
        )
    }

    /// Runs refresh and cleanup every tick until `shutdown` fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.config.tick_seconds,
            lead_time_seconds = self.config.lead_time_seconds,
            "Starting token maintenance"
        );
        let tick_interval = TokioDuration::from_secs(self.config.tick_seconds);
        let lead = Duration::seconds(self.config.lead_time_seconds as i64);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Token maintenance shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = std::time::Instant::now();
                    if let Err(err) = self.refresh_expiring(lead).await {
                        error!(error = ?err, "Token refresh pass failed");
                    }
                    if let Err(err) = self.cleanup().await {
                        error!(error = ?err, "OAuth cleanup pass failed");
                    }
                    histogram!("token_refresh_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Token maintenance stopped");
    }

    /// Refreshes every refreshable token that expires within `lead`.
    ///
    /// A failure on one token is logged and counted; the pass carries on.
    #[instrument(skip(self))]
    pub async fn refresh_expiring(&self, lead: Duration) -> Result<RefreshStats> {
        let cutoff = Utc::now() + lead;
        let due = self.tokens.list_expiring(cutoff).await?;
        let mut stats = RefreshStats {
            due: due.len() as u64,
            ..Default::default()
        };
        gauge!("token_refresh_due_gauge").set(stats.due as f64);

        for token in due {
            match self.refresh_one(&token).await {
                Ok(true) => stats.refreshed += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(token_id = token.id, error = %e, "Token refresh failed");
                }
            }
        }

        counter!("token_refresh_attempts_total").increment(stats.refreshed + stats.failed);
        counter!("token_refresh_success_total").increment(stats.refreshed);
        counter!("token_refresh_failure_total").increment(stats.failed);
        info!(
            due = stats.due,
            refreshed = stats.refreshed,
            failed = stats.failed,
            skipped = stats.skipped,
            "Token refresh pass completed"
        );
        Ok(stats)
    }

    /// Refreshes one token. `Ok(false)` means there was nothing to do with
    /// it: the account is gone, the provider is not configured or no
    /// refresh token is stored.
    async fn refresh_one(&self, token: &oauth_token::Model) -> Result<bool> {
        let accounts = OAuthAccountRepository::new(self.db.clone());
        let Some(account) = accounts.find_by_id(token.oauth_account_id).await? else {
            debug!(token_id = token.id, "Token belongs to no account");
            return Ok(false);
        };
        let Ok(provider) = self.providers.get(&account.provider) else {
            debug!(provider = %account.provider, "Provider not configured; skipping refresh");
            return Ok(false);
        };

        let stored = self.tokens.decrypt(token)?;
        let Some(refresh_token) = stored.refresh_token else {
            return Ok(false);
        };

        let started = std::time::Instant::now();
        match provider.refresh_access_token(&refresh_token).await {
            Ok(fresh) => {
                self.tokens.store(account.id, &fresh).await?;
                histogram!("token_refresh_latency_ms")
                    .record(started.elapsed().as_secs_f64() * 1_000.0);
                counter!("token_refresh_provider_success_total", "provider" => account.provider.clone())
                    .increment(1);
                debug!(account_id = account.id, provider = %account.provider, "Token refreshed");
                Ok(true)
            }
            Err(e) => {
                let class = classify_refresh_error(&e);
                counter!(
                    "token_refresh_provider_failure_total",
                    "provider" => account.provider.clone(),
                    "class" => format!("{class:?}").to_lowercase()
                )
                .increment(1);
                if class == RefreshErrorClassification::Permanent {
                    warn!(
                        account_id = account.id,
                        provider = %account.provider,
                        "Refresh grant rejected; the user must sign in with the provider again"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Deletes expired OAuth states and expired tokens that cannot be
    /// refreshed.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<CleanupStats> {
        let now = Utc::now();
        let states_removed = OAuthStateRepository::new(self.db.clone())
            .cleanup_expired(now)
            .await?;
        let tokens_removed = self.tokens.delete_expired_unrefreshable(now).await?;

        counter!("oauth_states_cleaned_total").increment(states_removed);
        counter!("oauth_tokens_cleaned_total").increment(tokens_removed);
        info!(states_removed, tokens_removed, "OAuth cleanup completed");

        Ok(CleanupStats {
            states_removed,
            tokens_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_grant_is_permanent() {
        let error = OAuthError::Rejected {
            provider: "google",
            error: "invalid_grant".to_string(),
            description: None,
        };
        assert_eq!(
            classify_refresh_error(&error),
            RefreshErrorClassification::Permanent
        );
    }

    #[test]
    fn test_throttling_is_rate_limited() {
        let error = OAuthError::Http {
            provider: "github",
            status: 429,
            body: String::new(),
        };
        assert_eq!(
            classify_refresh_error(&error),
            RefreshErrorClassification::RateLimited
        );
    }

    #[test]
    fn test_server_errors_are_transient() {
        let error = OAuthError::Http {
            provider: "microsoft",
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(
            classify_refresh_error(&error),
            RefreshErrorClassification::Transient
        );
    }

    #[test]
    fn test_facebook_has_no_refresh_grant() {
        let error = OAuthError::Unsupported {
            provider: "facebook",
            operation: "token refresh",
        };
        assert_eq!(
            classify_refresh_error(&error),
            RefreshErrorClassification::Permanent
        );
    }
}
