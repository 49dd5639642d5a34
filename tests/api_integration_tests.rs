//! End-to-end tests of the HTTP API through the full router.

use axum::http::{StatusCode, header};
use bloggy::{
    config::RateLimitConfig,
    repositories::{PostRepository, RoleRepository},
    server::create_app,
};
use serde_json::json;
use tower::ServiceExt;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{
    TEST_PASSWORD, create_user, read_json, request, session_cookie, setup_state, test_config,
};

#[tokio::test]
async fn test_health_reports_database() {
    let state = setup_state(test_config()).await.expect("state");
    let app = create_app(state);

    let response = app
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_register_login_me_logout() {
    let state = setup_state(test_config()).await.expect("state");
    let app = create_app(state);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/auth/register",
            None,
            Some(json!({
                "email": "Ada@Example.com",
                "password": TEST_PASSWORD,
                "first_name": "Ada",
                "last_name": "Lovelace"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().contains_key(header::SET_COOKIE));
    let body = read_json(response).await;
    assert_eq!(body["user"]["email"], "ada@example.com");

    let duplicate = app
        .clone()
        .oneshot(request(
            "POST",
            "/auth/register",
            None,
            Some(json!({
                "email": "ada@example.com",
                "password": TEST_PASSWORD,
                "first_name": "Ada",
                "last_name": "Again"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let wrong = app
        .clone()
        .oneshot(request(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "wrong password" })),
        ))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let login = app
        .clone()
        .oneshot(request(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": TEST_PASSWORD })),
        ))
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    let token = read_json(login).await["token"]
        .as_str()
        .expect("token")
        .to_string();

    let mut me = request("GET", "/auth/me", None, None);
    me.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    let response = app.clone().oneshot(me).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["roles"], json!(["Author"]));
    assert!(
        body["permissions"]
            .as_array()
            .expect("permissions")
            .contains(&json!("post.create"))
    );

    let response = app
        .clone()
        .oneshot(request("POST", "/auth/logout", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cleared = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("cookie cleared");
    assert!(cleared.contains("Max-Age=0"));

    let response = app
        .oneshot(request("GET", "/auth/me", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_rejects_short_password() {
    let state = setup_state(test_config()).await.expect("state");
    let app = create_app(state);

    let response = app
        .oneshot(request(
            "POST",
            "/auth/register",
            None,
            Some(json!({
                "email": "ada@example.com",
                "password": "short",
                "first_name": "Ada",
                "last_name": "Lovelace"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_lifecycle_with_ownership() {
    let state = setup_state(test_config()).await.expect("state");
    let alice = create_user(&state, "alice@example.com", "Author", None)
        .await
        .unwrap();
    let bob = create_user(&state, "bob@example.com", "Author", None)
        .await
        .unwrap();
    let moderator = create_user(&state, "mod@example.com", "Moderator", None)
        .await
        .unwrap();
    let alice_cookie = session_cookie(&state, &alice);
    let bob_cookie = session_cookie(&state, &bob);
    let moderator_cookie = session_cookie(&state, &moderator);
    let app = create_app(state);

    let anonymous = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/posts",
            None,
            Some(json!({ "title": "Hello", "text": "World" })),
        ))
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let created = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/posts",
            Some(&alice_cookie),
            Some(json!({ "title": "Hello", "text": "World" })),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let location = created
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location")
        .to_string();
    let post = read_json(created).await;
    let id = post["id"].as_i64().expect("id");
    assert_eq!(location, format!("/api/posts/{id}"));

    let forbidden = app
        .clone()
        .oneshot(request(
            "PUT",
            &location,
            Some(&bob_cookie),
            Some(json!({ "title": "Hijacked" })),
        ))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let edited = app
        .clone()
        .oneshot(request(
            "PUT",
            &location,
            Some(&alice_cookie),
            Some(json!({ "title": "Hello again" })),
        ))
        .await
        .unwrap();
    assert_eq!(edited.status(), StatusCode::OK);
    let body = read_json(edited).await;
    assert_eq!(body["title"], "Hello again");
    assert_eq!(body["text"], "World");

    let listed = app
        .clone()
        .oneshot(request("GET", "/api/posts?page=1&per_page=5", None, None))
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    let page = read_json(listed).await;
    assert_eq!(page["meta"]["total"], 1);
    assert_eq!(page["data"][0]["title"], "Hello again");

    let bob_delete = app
        .clone()
        .oneshot(request("DELETE", &location, Some(&bob_cookie), None))
        .await
        .unwrap();
    assert_eq!(bob_delete.status(), StatusCode::FORBIDDEN);

    let moderated = app
        .clone()
        .oneshot(request("DELETE", &location, Some(&moderator_cookie), None))
        .await
        .unwrap();
    assert_eq!(moderated.status(), StatusCode::NO_CONTENT);

    let gone = app
        .oneshot(request("GET", &location, None, None))
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_out_of_range_pages_list_nothing() {
    let state = setup_state(test_config()).await.expect("state");
    let alice = create_user(&state, "alice@example.com", "Author", None)
        .await
        .unwrap();
    let admin = create_user(&state, "admin@example.com", "Admin", None)
        .await
        .unwrap();
    PostRepository::new(state.db.clone())
        .create(alice.id, "Only post", "text")
        .await
        .unwrap();
    let admin_cookie = session_cookie(&state, &admin);
    let app = create_app(state);

    for (uri, cookie) in [
        ("/api/posts?page=18446744073709551615", None),
        ("/api/posts?page=18446744073709551615&per_page=100", None),
        ("/api/admin/users?page=18446744073709551615&per_page=1", Some(admin_cookie.as_str())),
    ] {
        let response = app
            .clone()
            .oneshot(request("GET", uri, cookie, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        let page = read_json(response).await;
        assert_eq!(page["data"], json!([]), "{uri}");
        assert!(page["meta"]["total"].as_u64().unwrap() >= 1, "{uri}");
    }
}

#[tokio::test]
async fn test_post_title_validation() {
    let state = setup_state(test_config()).await.expect("state");
    let alice = create_user(&state, "alice@example.com", "Author", None)
        .await
        .unwrap();
    let cookie = session_cookie(&state, &alice);
    let app = create_app(state);

    for title in ["   ".to_string(), "x".repeat(201)] {
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/posts",
                Some(&cookie),
                Some(json!({ "title": title, "text": "body" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_viewer_cannot_post_but_can_comment() {
    let state = setup_state(test_config()).await.expect("state");
    let author = create_user(&state, "author@example.com", "Author", None)
        .await
        .unwrap();
    let viewer = create_user(&state, "viewer@example.com", "Viewer", None)
        .await
        .unwrap();
    let post = PostRepository::new(state.db.clone())
        .create(author.id, "Title", "text")
        .await
        .unwrap();
    let viewer_cookie = session_cookie(&state, &viewer);
    let author_cookie = session_cookie(&state, &author);
    let app = create_app(state);

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/posts",
            Some(&viewer_cookie),
            Some(json!({ "title": "Nope", "text": "text" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let comments_uri = format!("/api/posts/{}/comments", post.id);
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &comments_uri,
            Some(&viewer_cookie),
            Some(json!({ "text": "Nice post!" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let comment = read_json(response).await;
    let comment_uri = format!("/api/comments/{}", comment["id"]);

    // The post author holds comment.edit.own only, so not on the viewer's comment.
    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            &comment_uri,
            Some(&author_cookie),
            Some(json!({ "text": "edited" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(request("GET", &comments_uri, None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let comments = read_json(response).await;
    assert_eq!(comments.as_array().map(Vec::len), Some(1));

    let response = app
        .oneshot(request("GET", "/api/posts/9999/comments", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_routes_require_role_manage() {
    let state = setup_state(test_config()).await.expect("state");
    let author = create_user(&state, "author@example.com", "Author", None)
        .await
        .unwrap();
    let admin = create_user(&state, "admin@example.com", "Admin", None)
        .await
        .unwrap();
    let author_cookie = session_cookie(&state, &author);
    let admin_cookie = session_cookie(&state, &admin);
    let roles = RoleRepository::new(state.db.clone());
    let admin_role = roles.find_by_name("Admin").await.unwrap().unwrap();
    let moderator_role = roles.find_by_name("Moderator").await.unwrap().unwrap();
    let app = create_app(state);

    let response = app
        .clone()
        .oneshot(request("GET", "/api/admin/roles", Some(&author_cookie), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(request("GET", "/api/admin/roles", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(request("GET", "/api/admin/roles", Some(&admin_cookie), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await.as_array().map(Vec::len), Some(4));

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/admin/roles",
            Some(&admin_cookie),
            Some(json!({ "name": "Author" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(request(
            "DELETE",
            &format!("/api/admin/roles/{}", admin_role.id),
            Some(&admin_cookie),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Promote the author; the change is visible on the next request.
    let assign_uri = format!("/api/admin/users/{}/roles/{}", author.id, moderator_role.id);
    let response = app
        .clone()
        .oneshot(request("POST", &assign_uri, Some(&admin_cookie), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert!(
        body["roles"]
            .as_array()
            .expect("roles")
            .contains(&json!("Moderator"))
    );

    let response = app
        .clone()
        .oneshot(request("GET", "/api/admin/users", Some(&admin_cookie), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["meta"]["total"], 2);

    let response = app
        .clone()
        .oneshot(request("DELETE", &assign_uri, Some(&admin_cookie), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(request("DELETE", &assign_uri, Some(&admin_cookie), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_role_grants_take_effect_immediately() {
    let state = setup_state(test_config()).await.expect("state");
    let admin = create_user(&state, "admin@example.com", "Admin", None)
        .await
        .unwrap();
    let viewer = create_user(&state, "viewer@example.com", "Viewer", None)
        .await
        .unwrap();
    let admin_cookie = session_cookie(&state, &admin);
    let viewer_cookie = session_cookie(&state, &viewer);
    let viewer_role = RoleRepository::new(state.db.clone())
        .find_by_name("Viewer")
        .await
        .unwrap()
        .unwrap();
    let app = create_app(state);

    let new_post = || {
        request(
            "POST",
            "/api/posts",
            Some(&viewer_cookie),
            Some(json!({ "title": "Promoted", "text": "text" })),
        )
    };
    let response = app.clone().oneshot(new_post()).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(request("GET", "/api/admin/permissions", Some(&admin_cookie), None))
        .await
        .unwrap();
    let permissions = read_json(response).await;
    let post_create = permissions
        .as_array()
        .expect("permissions")
        .iter()
        .find(|p| p["name"] == "post.create")
        .and_then(|p| p["id"].as_i64())
        .expect("post.create");

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/api/admin/roles/{}/permissions/{post_create}", viewer_role.id),
            Some(&admin_cookie),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(new_post()).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_login_is_rate_limited_per_endpoint() {
    let mut config = test_config();
    config.rate_limit = RateLimitConfig {
        max_requests: 2,
        window_seconds: 60,
    };
    let state = setup_state(config).await.expect("state");
    let app = create_app(state);

    let attempt = || {
        request(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "nobody@example.com", "password": "whatever1" })),
        )
    };
    for _ in 0..2 {
        let response = app.clone().oneshot(attempt()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app.clone().oneshot(attempt()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let body = read_json(response).await;
    assert_eq!(body["code"], "RATE_LIMITED");

    // Other endpoints keep their own budget.
    let response = app
        .oneshot(request(
            "POST",
            "/auth/register",
            None,
            Some(json!({
                "email": "ada@example.com",
                "password": TEST_PASSWORD,
                "first_name": "Ada",
                "last_name": "Lovelace"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let state = setup_state(test_config()).await.expect("state");
    let app = create_app(state);

    let response = app
        .oneshot(request("GET", "/api/openapi.json", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc = read_json(response).await;
    assert!(doc["paths"]["/api/posts/{id}"].is_object());
    assert!(doc["components"]["securitySchemes"]["session_cookie"].is_object());
}
