//! Repository-level tests for the identity store

use std::time::Duration;

use idsync_config::DatabaseConfig;
use idsync_database::{
    initialize_database, ClaimRepository, NewUser, RoleFilter, RoleRepository, SortOrder, UserError, UserFilter,
    UserRepository, UserSortField,
};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

const ADMIN_ID: &str = "550e8400-e29b-41d4-a716-446655440100";

async fn create_test_database() -> (SqlitePool, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", temp_dir.path().join("repo.db").display()),
        max_connections: 4,
        busy_timeout_ms: 5_000,
    };
    let pool = initialize_database(&config).await.unwrap();
    (pool, temp_dir)
}

async fn user_role_id(roles: &RoleRepository) -> Uuid {
    roles.find_by_code("user").await.unwrap().unwrap().id
}

fn new_user(email: &str, role_ids: Vec<Uuid>) -> NewUser {
    NewUser {
        username: email.to_string(),
        email: Some(email.to_string()),
        display_name: Some(format!("Test {email}")),
        remote_ref: None,
        avatar_url: None,
        activated: true,
        role_ids,
    }
}

#[tokio::test]
async fn seeded_admin_is_loaded_with_roles() {
    let (pool, _temp_dir) = create_test_database().await;
    let users = UserRepository::new(pool);

    let admin = users
        .find_by_id(Uuid::parse_str(ADMIN_ID).unwrap())
        .await
        .unwrap()
        .expect("seeded admin should exist");

    assert_eq!(admin.username, "admin");
    assert!(admin.activated);
    assert!(!admin.is_synced());
    assert!(admin.has_role("ADMIN"));
    assert!(admin.has_role("user"));
}

#[tokio::test]
async fn insert_and_lookup_by_email_and_remote_ref() {
    let (pool, _temp_dir) = create_test_database().await;
    let users = UserRepository::new(pool.clone());
    let roles = RoleRepository::new(pool);
    let role_id = user_role_id(&roles).await;

    let mut tx = users.begin().await.unwrap();
    let created = users
        .insert(&mut tx, &new_user("ann@example.com", vec![role_id]), "tester")
        .await
        .unwrap();
    let linked = users
        .attach_remote(&mut tx, created.id, "auth0|ann", Some("https://pics/ann.png"), "tester")
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(linked.remote_ref.as_deref(), Some("auth0|ann"));
    assert_eq!(linked.last_modified_by.as_deref(), Some("tester"));
    assert_eq!(linked.roles.len(), 1);

    let by_email = users.find_by_email("ann@example.com").await.unwrap().unwrap();
    assert_eq!(by_email.id, created.id);

    let by_ref = users.find_by_remote_ref("auth0|ann").await.unwrap().unwrap();
    assert_eq!(by_ref.id, created.id);
    assert_eq!(by_ref.avatar_url.as_deref(), Some("https://pics/ann.png"));
}

#[tokio::test]
async fn duplicate_email_maps_to_typed_error() {
    let (pool, _temp_dir) = create_test_database().await;
    let users = UserRepository::new(pool);

    let mut tx = users.begin().await.unwrap();
    users
        .insert(&mut tx, &new_user("dup@example.com", vec![]), "tester")
        .await
        .unwrap();
    let mut second = new_user("dup@example.com", vec![]);
    second.username = "other".to_string();
    let error = users.insert(&mut tx, &second, "tester").await.unwrap_err();

    assert!(matches!(error, UserError::EmailAlreadyExists));
}

#[tokio::test]
async fn remote_ref_is_unique_across_users() {
    let (pool, _temp_dir) = create_test_database().await;
    let users = UserRepository::new(pool);

    let mut tx = users.begin().await.unwrap();
    let a = users
        .insert(&mut tx, &new_user("a@example.com", vec![]), "tester")
        .await
        .unwrap();
    let b = users
        .insert(&mut tx, &new_user("b@example.com", vec![]), "tester")
        .await
        .unwrap();
    users
        .attach_remote(&mut tx, a.id, "auth0|same", None, "tester")
        .await
        .unwrap();
    let error = users
        .attach_remote(&mut tx, b.id, "auth0|same", None, "tester")
        .await
        .unwrap_err();

    assert!(matches!(error, UserError::RemoteRefAlreadyLinked));
}

#[tokio::test]
async fn saving_a_deleted_and_activated_user_violates_the_state_constraint() {
    let (pool, _temp_dir) = create_test_database().await;
    let users = UserRepository::new(pool);

    let mut tx = users.begin().await.unwrap();
    let mut user = users
        .insert(&mut tx, &new_user("bad@example.com", vec![]), "tester")
        .await
        .unwrap();
    user.deleted = true;
    user.activated = true;

    let error = users.save(&mut tx, &user, "tester").await.unwrap_err();
    assert!(matches!(error, UserError::ConstraintViolation(_)));
}

#[tokio::test]
async fn rolled_back_insert_leaves_no_row() {
    let (pool, _temp_dir) = create_test_database().await;
    let users = UserRepository::new(pool);

    let mut tx = users.begin().await.unwrap();
    users
        .insert(&mut tx, &new_user("gone@example.com", vec![]), "tester")
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert!(users.find_by_email("gone@example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn claims_are_exclusive_until_released() {
    let (pool, _temp_dir) = create_test_database().await;
    let claims = ClaimRepository::new(pool);
    let lease = Duration::from_secs(60);

    assert!(claims.try_claim("user:1", "first", lease).await.unwrap());
    assert!(!claims.try_claim("user:1", "second", lease).await.unwrap());
    assert!(claims.try_claim("user:2", "second", lease).await.unwrap());

    claims.release("user:1", "second").await.unwrap();
    assert!(!claims.try_claim("user:1", "second", lease).await.unwrap());

    claims.release("user:1", "first").await.unwrap();
    assert!(claims.try_claim("user:1", "second", lease).await.unwrap());
}

#[tokio::test]
async fn expired_claims_are_taken_over() {
    let (pool, _temp_dir) = create_test_database().await;
    let claims = ClaimRepository::new(pool.clone());

    assert!(claims
        .try_claim("email:a@example.com", "crashed", Duration::from_millis(20))
        .await
        .unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(claims
        .try_claim("email:a@example.com", "next", Duration::from_secs(60))
        .await
        .unwrap());

    let mut conn = pool.acquire().await.unwrap();
    assert!(claims
        .holds_in(&mut conn, "email:a@example.com", "next")
        .await
        .unwrap());
    assert!(!claims
        .holds_in(&mut conn, "email:a@example.com", "crashed")
        .await
        .unwrap());
}

#[tokio::test]
async fn held_claim_does_not_block_other_writers() {
    let (pool, _temp_dir) = create_test_database().await;
    let claims = ClaimRepository::new(pool.clone());
    let users = UserRepository::new(pool);

    assert!(claims
        .try_claim(&format!("user:{ADMIN_ID}"), "holder", Duration::from_secs(60))
        .await
        .unwrap());

    let mut tx = users.begin().await.unwrap();
    users
        .insert(&mut tx, &new_user("free@example.com", vec![]), "tester")
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert!(users.find_by_email("free@example.com").await.unwrap().is_some());
}

#[tokio::test]
async fn search_filters_by_text_state_and_role() {
    let (pool, _temp_dir) = create_test_database().await;
    let users = UserRepository::new(pool.clone());
    let roles = RoleRepository::new(pool);
    let role_id = user_role_id(&roles).await;

    let mut tx = users.begin().await.unwrap();
    for email in ["carol@example.com", "dave@example.com", "erin@sample.org"] {
        users
            .insert(&mut tx, &new_user(email, vec![role_id]), "tester")
            .await
            .unwrap();
    }
    let mut deleted = users
        .insert(&mut tx, &new_user("frank@example.com", vec![]), "tester")
        .await
        .unwrap();
    deleted.mark_deleted();
    users.save(&mut tx, &deleted, "tester").await.unwrap();
    tx.commit().await.unwrap();

    let page = users
        .search(&UserFilter {
            search: Some("EXAMPLE.COM".to_string()),
            deleted: Some(false),
            ..UserFilter::default()
        })
        .await
        .unwrap();
    let emails: Vec<_> = page.items.iter().filter_map(|u| u.email.clone()).collect();
    assert_eq!(emails, vec!["carol@example.com", "dave@example.com"]);
    assert_eq!(page.total, 2);

    let only_deleted = users
        .search(&UserFilter {
            deleted: Some(true),
            ..UserFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(only_deleted.total, 1);
    assert!(!only_deleted.items[0].activated);

    let admins = roles.find_by_code("ADMIN").await.unwrap().unwrap();
    let with_admin = users
        .search(&UserFilter {
            role_ids: vec![admins.id],
            ..UserFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(with_admin.total, 1);
    assert_eq!(with_admin.items[0].username, "admin");
}

#[tokio::test]
async fn search_paginates_and_sorts() {
    let (pool, _temp_dir) = create_test_database().await;
    let users = UserRepository::new(pool);

    let mut tx = users.begin().await.unwrap();
    for i in 0..5 {
        users
            .insert(&mut tx, &new_user(&format!("p{i}@example.com"), vec![]), "tester")
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();

    let page = users
        .search(&UserFilter {
            search: Some("p".to_string()),
            sort_by: UserSortField::Username,
            order: SortOrder::Desc,
            page: Some(1),
            size: Some(2),
            ..UserFilter::default()
        })
        .await
        .unwrap();

    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages(), 3);
    let names: Vec<_> = page.items.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["p2@example.com", "p1@example.com"]);
}

#[tokio::test]
async fn role_codes_are_case_insensitive_and_unique() {
    let (pool, _temp_dir) = create_test_database().await;
    let roles = RoleRepository::new(pool);

    let created = roles.insert("AUDITOR", Some("Reads logs"), "tester").await.unwrap();
    assert!(roles.exists_by_code("auditor").await.unwrap());
    assert_eq!(roles.find_by_code("Auditor").await.unwrap().unwrap().id, created.id);

    let error = roles.insert("auditor", None, "tester").await.unwrap_err();
    assert!(matches!(error, idsync_database::RoleError::CodeAlreadyExists));
}

#[tokio::test]
async fn role_soft_delete_hides_from_active_listing() {
    let (pool, _temp_dir) = create_test_database().await;
    let roles = RoleRepository::new(pool);

    let mut role = roles.insert("TEMP", None, "tester").await.unwrap();
    role.deleted = true;
    roles.save_all(std::slice::from_ref(&role), "tester").await.unwrap();

    let active: Vec<_> = roles
        .list_active()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.code)
        .collect();
    assert_eq!(active, vec!["ADMIN", "USER"]);

    let deleted = roles
        .search(&RoleFilter {
            deleted: Some(true),
            ..RoleFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(deleted.total, 1);
    assert_eq!(deleted.items[0].last_modified_by.as_deref(), Some("tester"));
}
