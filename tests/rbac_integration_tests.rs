//! Integration tests for seeding, permission resolution and the route guards.

use std::sync::Arc;

use axum::http::StatusCode;
use bloggy::{
    rbac::{PermissionCache, PermissionResolver, requires_permission, requires_role},
    repositories::{PermissionRepository, PostRepository, RoleRepository},
    seeds::{SeedReport, seed_admin_user, seed_rbac},
};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{TEST_PASSWORD, create_user, setup_state, setup_test_db, test_config};

#[tokio::test]
async fn test_seeding_twice_creates_nothing_new() {
    let db = setup_test_db().await.expect("db");

    let report = seed_rbac(&db).await.expect("second seed");
    assert_eq!(report, SeedReport::default());

    let db = Arc::new(db);
    let roles = RoleRepository::new(db.clone()).list().await.expect("roles");
    let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
    for expected in ["Admin", "Moderator", "Author", "Viewer"] {
        assert!(names.contains(&expected), "missing role {expected}");
    }

    let permissions = PermissionRepository::new(db).list().await.expect("permissions");
    assert!(permissions.iter().any(|p| p.name == "post.edit.own"));
    assert!(permissions.iter().any(|p| p.name == "post.create"));
}

#[tokio::test]
async fn test_admin_seed_is_idempotent() {
    let db = setup_test_db().await.expect("db");

    let first = seed_admin_user(&db, "root@example.com", TEST_PASSWORD)
        .await
        .expect("admin");
    let second = seed_admin_user(&db, "root@example.com", "another password")
        .await
        .expect("admin again");
    assert_eq!(first.id, second.id);
    assert_eq!(first.password_hash, second.password_hash);

    let roles = RoleRepository::new(Arc::new(db))
        .roles_for_user(first.id)
        .await
        .expect("roles");
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].name, "Admin");
}

#[tokio::test]
async fn test_own_scope_covers_only_own_posts() {
    let state = setup_state(test_config()).await.expect("state");
    let alice = create_user(&state, "alice@example.com", "Author", None)
        .await
        .expect("alice");
    let bob = create_user(&state, "bob@example.com", "Author", None)
        .await
        .expect("bob");

    let posts = PostRepository::new(state.db.clone());
    let alices = posts.create(alice.id, "Mine", "text").await.expect("post");

    let resolver = &state.resolver;
    assert!(
        resolver
            .can_access_resource(&alice, "post", "edit", Some(&alices))
            .await
    );
    assert!(
        !resolver
            .can_access_resource(&bob, "post", "edit", Some(&alices))
            .await
    );
    // Without an instance the own grant is enough.
    assert!(resolver.can_access_resource(&bob, "post", "edit", None).await);

    let denied = requires_permission(resolver, Some(&bob), "post.delete", Some(&alices))
        .await
        .expect_err("bob cannot delete alice's post");
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
    requires_permission(resolver, Some(&alice), "post.delete", Some(&alices))
        .await
        .expect("alice deletes her own post");
}

#[tokio::test]
async fn test_any_scope_and_admin_bypass() {
    let state = setup_state(test_config()).await.expect("state");
    let author = create_user(&state, "author@example.com", "Author", None)
        .await
        .expect("author");
    let moderator = create_user(&state, "mod@example.com", "Moderator", None)
        .await
        .expect("moderator");
    let admin = create_user(&state, "admin@example.com", "Admin", None)
        .await
        .expect("admin");

    let post = PostRepository::new(state.db.clone())
        .create(author.id, "Title", "text")
        .await
        .expect("post");

    let resolver = &state.resolver;
    assert!(
        resolver
            .can_access_resource(&moderator, "post", "edit", Some(&post))
            .await
    );
    requires_permission(resolver, Some(&moderator), "post.edit.any", None)
        .await
        .expect("moderator holds post.edit.any");
    let denied = requires_permission(resolver, Some(&author), "post.edit.any", None)
        .await
        .expect_err("author lacks post.edit.any");
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    // Admin passes even for permissions nobody was granted.
    assert!(resolver.is_admin(&admin).await);
    assert!(resolver.has_permission(&admin, "widget.frobnicate").await);
    requires_permission(resolver, Some(&admin), "role.manage", None)
        .await
        .expect("admin manages roles");
    requires_role(resolver, Some(&admin), &["Moderator"])
        .await
        .expect("admin passes role checks");
}

#[tokio::test]
async fn test_has_any_permission_needs_one_match() {
    let state = setup_state(test_config()).await.expect("state");
    let viewer = create_user(&state, "viewer@example.com", "Viewer", None)
        .await
        .expect("viewer");
    let admin = create_user(&state, "admin@example.com", "Admin", None)
        .await
        .expect("admin");

    let resolver = &state.resolver;
    assert!(
        resolver
            .has_any_permission(&viewer, &["post.create", "comment.create"])
            .await
    );
    assert!(
        !resolver
            .has_any_permission(&viewer, &["post.create", "post.edit.any"])
            .await
    );
    assert!(!resolver.has_any_permission(&viewer, &[]).await);
    assert!(resolver.has_any_permission(&admin, &["widget.frobnicate"]).await);
}

#[tokio::test]
async fn test_guards_reject_anonymous_with_401() {
    let state = setup_state(test_config()).await.expect("state");

    let error = requires_permission(&state.resolver, None, "post.create", None)
        .await
        .expect_err("anonymous");
    assert_eq!(error.status, StatusCode::UNAUTHORIZED);

    let error = requires_role(&state.resolver, None, &["Author"])
        .await
        .expect_err("anonymous");
    assert_eq!(error.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_role_checks_ignore_case() {
    let state = setup_state(test_config()).await.expect("state");
    let viewer = create_user(&state, "viewer@example.com", "Viewer", None)
        .await
        .expect("viewer");

    requires_role(&state.resolver, Some(&viewer), &["viewer"])
        .await
        .expect("case-insensitive match");
    let error = requires_role(&state.resolver, Some(&viewer), &["Author", "Moderator"])
        .await
        .expect_err("viewer is neither");
    assert_eq!(error.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_role_changes_reach_the_resolver() {
    let state = setup_state(test_config()).await.expect("state");
    let viewer = create_user(&state, "viewer@example.com", "Viewer", None)
        .await
        .expect("viewer");

    assert!(!state.resolver.has_permission(&viewer, "post.create").await);

    let roles = RoleRepository::new(state.db.clone()).with_cache(state.resolver.cache().clone());
    let author = roles
        .find_by_name("Author")
        .await
        .expect("query")
        .expect("seeded");
    assert!(roles.assign_to_user(viewer.id, author.id, None).await.expect("assign"));

    assert!(state.resolver.has_permission(&viewer, "post.create").await);
}

#[tokio::test]
async fn test_unknown_user_has_no_grants() {
    let db = Arc::new(setup_test_db().await.expect("db"));
    let resolver = PermissionResolver::new(db, Arc::new(PermissionCache::default()));

    let grants = resolver.grants_or_empty(9_999).await;
    assert!(grants.roles.is_empty());
    assert!(!grants.is_admin());
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn test_ownership_guard_future_is_send() {
    let state = setup_state(test_config()).await.expect("state");
    let author = create_user(&state, "author@example.com", "Author", None)
        .await
        .expect("author");
    let post = PostRepository::new(state.db.clone())
        .create(author.id, "Title", "text")
        .await
        .expect("post");

    // Handlers await this inside axum's Send-bound futures.
    let guard = requires_permission(&state.resolver, Some(&author), "post.edit", Some(&post));
    assert_send(&guard);
    guard.await.expect("author edits own post");
}

#[tokio::test]
async fn test_permission_scope_is_normalized_and_restricted() {
    let db = Arc::new(setup_test_db().await.expect("db"));
    let permissions = PermissionRepository::new(db);

    let created = permissions
        .create("Widget", "Edit", " OWN ", None)
        .await
        .expect("uppercase scope is accepted");
    assert_eq!(created.scope, "own");
    assert_eq!(created.resource, "widget");
    assert_eq!(created.name, "widget.edit.own");

    let error = permissions
        .create("widget", "edit", "mine", None)
        .await
        .expect_err("unknown scope");
    let db_error = error
        .downcast_ref::<sea_orm::DbErr>()
        .expect("database error");
    assert!(matches!(db_error, sea_orm::DbErr::Custom(m) if m.contains("scope 'mine'")));
    assert!(
        permissions
            .find_by_name("widget.edit.mine")
            .await
            .expect("query")
            .is_none()
    );
}
