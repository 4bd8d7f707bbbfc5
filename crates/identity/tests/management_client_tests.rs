//! Management API client tests against a mock provider.

use std::time::Duration;

use httpmock::prelude::*;
use httpmock::Method::PATCH;
use idsync_config::IdentityProviderConfig;
use idsync_identity::{
    CreateIdentityRequest, IdentityError, IdentityFlags, IdentityProvider, ManagementClient,
    UpdateIdentityRequest,
};
use serde_json::json;

fn config_for(server: &MockServer) -> IdentityProviderConfig {
    IdentityProviderConfig {
        domain: Some(server.base_url()),
        client_id: Some("m2m-client".to_string()),
        client_secret: Some("m2m-secret".to_string()),
        audience: Some("https://tenant.example.com/api/v2/".to_string()),
        request_timeout_seconds: 1,
        ..IdentityProviderConfig::default()
    }
}

async fn mock_token(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_contains("grant_type=client_credentials")
                .body_contains("client_id=m2m-client")
                .body_contains("audience=");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({
                    "access_token": "mgmt-token",
                    "token_type": "Bearer",
                    "expires_in": 86400
                }));
        })
        .await
}

fn identity_json(user_id: &str, email: &str, blocked: bool) -> serde_json::Value {
    json!({
        "user_id": user_id,
        "email": email,
        "email_verified": true,
        "blocked": blocked,
        "picture": format!("https://pics.example.com/{user_id}.png"),
        "name": "Test User",
        "logins_count": 0
    })
}

#[tokio::test]
async fn create_identity_posts_payload_with_bearer_token() {
    let server = MockServer::start_async().await;
    let token = mock_token(&server).await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v2/users")
                .header("authorization", "Bearer mgmt-token")
                .json_body(json!({
                    "email": "a@x.com",
                    "password": "Secret123!",
                    "name": "A",
                    "connection": "Username-Password-Authentication",
                    "email_verified": true,
                    "verify_email": true,
                    "blocked": false
                }));
            then.status(201)
                .header("Content-Type", "application/json")
                .json_body(identity_json("auth0-abc", "a@x.com", false));
        })
        .await;

    let client = ManagementClient::from_config(&config_for(&server)).unwrap();
    let identity = client
        .create_identity(&CreateIdentityRequest {
            email: "a@x.com".to_string(),
            password: "Secret123!".to_string(),
            name: Some("A".to_string()),
            connection: "Username-Password-Authentication".to_string(),
            flags: IdentityFlags::verified(),
        })
        .await
        .expect("create should succeed");

    assert_eq!(identity.user_id, "auth0-abc");
    assert_eq!(
        identity.picture.as_deref(),
        Some("https://pics.example.com/auth0-abc.png")
    );
    token.assert_async().await;
    create.assert_async().await;
}

#[tokio::test]
async fn service_token_is_cached_between_calls() {
    let server = MockServer::start_async().await;
    let token = mock_token(&server).await;
    let lookup = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v2/users/auth0-abc");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(identity_json("auth0-abc", "a@x.com", false));
        })
        .await;

    let client = ManagementClient::from_config(&config_for(&server)).unwrap();
    for _ in 0..3 {
        let found = client.get_identity_by_reference("auth0-abc").await.unwrap();
        assert!(found.is_some());
    }

    token.assert_hits_async(1).await;
    lookup.assert_hits_async(3).await;
}

#[tokio::test]
async fn lookup_by_reference_maps_404_to_none() {
    let server = MockServer::start_async().await;
    let _token = mock_token(&server).await;
    let _missing = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v2/users/auth0-gone");
            then.status(404).json_body(json!({
                "statusCode": 404,
                "error": "Not Found",
                "message": "The user does not exist."
            }));
        })
        .await;

    let client = ManagementClient::from_config(&config_for(&server)).unwrap();
    let found = client.get_identity_by_reference("auth0-gone").await.unwrap();

    assert!(found.is_none());
}

#[tokio::test]
async fn lookup_by_email_uses_search_query() {
    let server = MockServer::start_async().await;
    let _token = mock_token(&server).await;
    let search = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v2/users")
                .query_param("q", "email:\"a@x.com\"")
                .query_param("search_engine", "v3");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!([identity_json("auth0-abc", "a@x.com", true)]));
        })
        .await;
    let _empty = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v2/users")
                .query_param("q", "email:\"nobody@x.com\"");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!([]));
        })
        .await;

    let client = ManagementClient::from_config(&config_for(&server)).unwrap();

    let found = client.get_identity_by_email("a@x.com").await.unwrap().unwrap();
    assert!(found.blocked);
    assert!(client
        .get_identity_by_email("nobody@x.com")
        .await
        .unwrap()
        .is_none());
    search.assert_async().await;
}

#[tokio::test]
async fn set_blocked_and_update_patch_only_given_fields() {
    let server = MockServer::start_async().await;
    let _token = mock_token(&server).await;
    let block = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/api/v2/users/auth0-abc")
                .json_body(json!({ "blocked": true }));
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(identity_json("auth0-abc", "a@x.com", true));
        })
        .await;
    let rename = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/api/v2/users/auth0-abc")
                .json_body(json!({ "name": "Renamed" }));
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(identity_json("auth0-abc", "a@x.com", true));
        })
        .await;

    let client = ManagementClient::from_config(&config_for(&server)).unwrap();
    client.set_blocked("auth0-abc", true).await.unwrap();
    client
        .update_identity(
            "auth0-abc",
            &UpdateIdentityRequest {
                name: Some("Renamed".to_string()),
                ..UpdateIdentityRequest::default()
            },
        )
        .await
        .unwrap();

    block.assert_async().await;
    rename.assert_async().await;
}

#[tokio::test]
async fn error_statuses_surface_with_body() {
    let server = MockServer::start_async().await;
    let _token = mock_token(&server).await;
    let _conflict = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/users");
            then.status(409).body("The user already exists.");
        })
        .await;

    let client = ManagementClient::from_config(&config_for(&server)).unwrap();
    let error = client
        .create_identity(&CreateIdentityRequest {
            email: "a@x.com".to_string(),
            password: "Secret123!".to_string(),
            name: None,
            connection: "Username-Password-Authentication".to_string(),
            flags: IdentityFlags::unverified(),
        })
        .await
        .unwrap_err();

    match error {
        IdentityError::Status { status, body } => {
            assert_eq!(status, 409);
            assert!(body.contains("already exists"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn slow_provider_calls_time_out() {
    let server = MockServer::start_async().await;
    let _token = mock_token(&server).await;
    let _slow = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/api/v2/users/auth0-abc");
            then.status(204).delay(Duration::from_secs(3));
        })
        .await;

    let client = ManagementClient::from_config(&config_for(&server)).unwrap();
    let error = client.delete_identity("auth0-abc").await.unwrap_err();

    assert!(error.is_timeout(), "expected timeout, got {error:?}");
}

#[tokio::test]
async fn token_endpoint_failure_is_reported_as_token_error() {
    let server = MockServer::start_async().await;
    let _token = server
        .mock_async(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(401)
                .header("Content-Type", "application/json")
                .json_body(json!({
                    "error": "access_denied",
                    "error_description": "Unauthorized"
                }));
        })
        .await;

    let client = ManagementClient::from_config(&config_for(&server)).unwrap();
    let error = client.acquire_service_token().await.unwrap_err();

    assert!(matches!(error, IdentityError::Token(_)));
}
