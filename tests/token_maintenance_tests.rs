//! Integration tests for refreshing and cleaning up stored provider tokens.

use std::time::Duration as StdDuration;

use bloggy::{
    oauth::{OAuthClient, ProviderEndpoints, ProviderRegistry, TokenSet, build_provider},
    repositories::{AccountProfile, OAuthAccountRepository, OAuthStateRepository, OAuthTokenRepository},
    server::AppState,
    token_refresh::{CleanupStats, TokenMaintenance},
};
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{create_user, setup_state, test_config};

async fn state_with_mock_google(server: &MockServer) -> AppState {
    let provider = build_provider(
        "google",
        OAuthClient {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "http://localhost:8080/auth/oauth/google/callback".to_string(),
        },
        ProviderEndpoints {
            authorize_url: format!("{}/authorize", server.uri()),
            token_url: format!("{}/token", server.uri()),
            api_base_url: server.uri(),
            revoke_url: None,
        },
        reqwest::Client::new(),
        StdDuration::from_secs(5),
    )
    .expect("google provider");

    let mut registry = ProviderRegistry::new();
    registry.register(provider);
    setup_state(test_config())
        .await
        .expect("state")
        .with_providers(registry)
}

fn token_set(access: &str, refresh: Option<&str>, expires_in: i64) -> TokenSet {
    serde_json::from_value(json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": expires_in,
        "token_type": "Bearer"
    }))
    .expect("token set")
}

/// Links a Google account for a fresh user and stores `tokens` for it.
async fn linked_account(state: &AppState, email: &str, tokens: &TokenSet) -> i32 {
    let user = create_user(state, email, "Author", None).await.unwrap();
    let account = OAuthAccountRepository::new(state.db.clone())
        .create(
            user.id,
            "google",
            &format!("sub-{email}"),
            AccountProfile {
                email: Some(email.to_string()),
                name: None,
                picture: None,
                raw: None,
            },
        )
        .await
        .unwrap();
    OAuthTokenRepository::new(state.db.clone(), state.token_cipher.clone())
        .store(account.id, tokens)
        .await
        .unwrap();
    account.id
}

#[tokio::test]
async fn test_refreshes_only_tokens_inside_the_lead_window() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-soon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-fresh",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let state = state_with_mock_google(&server).await;

    let soon = linked_account(
        &state,
        "soon@example.com",
        &token_set("access-soon", Some("refresh-soon"), 60),
    )
    .await;
    linked_account(
        &state,
        "later@example.com",
        &token_set("access-later", Some("refresh-later"), 7_200),
    )
    .await;

    let maintenance = TokenMaintenance::from_state(&state);
    let stats = maintenance
        .refresh_expiring(Duration::minutes(10))
        .await
        .expect("refresh pass");
    assert_eq!(stats.due, 1);
    assert_eq!(stats.refreshed, 1);
    assert_eq!(stats.failed, 0);

    let tokens = OAuthTokenRepository::new(state.db.clone(), state.token_cipher.clone());
    let row = tokens.find_for_account(soon).await.unwrap().expect("row");
    let stored = tokens.decrypt(&row).unwrap();
    assert_eq!(stored.access_token, "access-fresh");
    // No new refresh token in the response keeps the old one.
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-soon"));
    assert!(stored.access_token_expires_at.expect("expiry") > Utc::now() + Duration::minutes(50));
}

#[tokio::test]
async fn test_failed_refresh_is_counted_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .mount(&server)
        .await;
    let state = state_with_mock_google(&server).await;

    linked_account(
        &state,
        "a@example.com",
        &token_set("access-a", Some("refresh-a"), 30),
    )
    .await;
    linked_account(
        &state,
        "b@example.com",
        &token_set("access-b", Some("refresh-b"), 30),
    )
    .await;

    let stats = TokenMaintenance::from_state(&state)
        .refresh_expiring(Duration::minutes(10))
        .await
        .expect("pass completes");
    assert_eq!(stats.due, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.refreshed, 0);
}

#[tokio::test]
async fn test_tokens_of_unconfigured_providers_are_skipped() {
    let state = setup_state(test_config()).await.expect("state");
    linked_account(
        &state,
        "a@example.com",
        &token_set("access-a", Some("refresh-a"), 30),
    )
    .await;

    let stats = TokenMaintenance::from_state(&state)
        .refresh_expiring(Duration::minutes(10))
        .await
        .expect("pass completes");
    assert_eq!(stats.due, 1);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn test_cleanup_removes_expired_states_and_dead_tokens() {
    let state = setup_state(test_config()).await.expect("state");

    let states = OAuthStateRepository::new(state.db.clone());
    let stale = states
        .create("google", "stale-state", "verifier", None, None)
        .await
        .unwrap();
    let mut stale: bloggy::models::oauth_state::ActiveModel = stale.into();
    stale.expires_at = Set((Utc::now() - Duration::minutes(1)).into());
    stale.update(&*state.db).await.unwrap();
    states
        .create("google", "live-state", "verifier", None, None)
        .await
        .unwrap();

    // Expired without a refresh token: dead. Expired with one: kept for refresh.
    linked_account(&state, "dead@example.com", &token_set("access", None, -60)).await;
    let refreshable = linked_account(
        &state,
        "alive@example.com",
        &token_set("access", Some("refresh"), -60),
    )
    .await;

    let stats = TokenMaintenance::from_state(&state)
        .cleanup()
        .await
        .expect("cleanup");
    assert_eq!(
        stats,
        CleanupStats {
            states_removed: 1,
            tokens_removed: 1,
        }
    );

    assert!(
        states
            .find_by_provider_state("google", "live-state")
            .await
            .unwrap()
            .is_some()
    );
    let tokens = OAuthTokenRepository::new(state.db.clone(), state.token_cipher.clone());
    assert!(tokens.find_for_account(refreshable).await.unwrap().is_some());
}
