//! Administrative and role service tests.

use idsync_config::{DatabaseConfig, DEFAULT_ADMIN_USER_ID};
use idsync_database::{initialize_database, RoleFilter, RoleRepository, UserFilter};
use idsync_users::{
    Actor, AdminService, IdentityClaims, RecordLocks, RoleService, ServiceError,
};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

async fn create_test_database() -> (SqlitePool, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", temp_dir.path().join("admin.db").display()),
        max_connections: 4,
        busy_timeout_ms: 5_000,
    };
    let pool = initialize_database(&config).await.unwrap();
    (pool, temp_dir)
}

fn admin_id() -> Uuid {
    Uuid::parse_str(DEFAULT_ADMIN_USER_ID).unwrap()
}

fn ops() -> Actor {
    Actor::new("ops@example.com")
}

fn claims(sub: &str, email: &str) -> IdentityClaims {
    IdentityClaims {
        sub: sub.to_string(),
        email: email.to_string(),
        name: Some("Claimed".to_string()),
        picture: Some("https://pics.example.com/c.png".to_string()),
    }
}

#[tokio::test]
async fn provisioning_creates_once_then_returns_existing() {
    let (pool, _temp_dir) = create_test_database().await;
    let admin = AdminService::new(pool, RecordLocks::new());

    let first = admin
        .provision_from_identity(&claims("idp-1", "first@example.com"))
        .await
        .unwrap();
    assert!(first.created);
    assert_eq!(first.user.username, "first@example.com");
    assert_eq!(first.user.remote_ref.as_deref(), Some("idp-1"));
    assert_eq!(
        first.user.avatar_url.as_deref(),
        Some("https://pics.example.com/c.png")
    );
    assert!(first.user.has_role("USER"));
    assert!(first.user.activated);

    let second = admin
        .provision_from_identity(&claims("idp-1", "first@example.com"))
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.user.id, first.user.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_first_logins_provision_one_user() {
    let (pool, _temp_dir) = create_test_database().await;
    let admin = AdminService::new(pool, RecordLocks::new());

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let admin = admin.clone();
        tasks.push(tokio::spawn(async move {
            admin
                .provision_from_identity(&claims("idp-race", "race@example.com"))
                .await
        }));
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap().unwrap());
    }

    assert_eq!(results.iter().filter(|p| p.created).count(), 1);
    let id = results[0].user.id;
    assert!(results.iter().all(|p| p.user.id == id));

    let page = admin
        .search_users(&UserFilter {
            search: Some("race@example.com".to_string()),
            ..UserFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn profile_of_deleted_user_is_an_invariant_violation() {
    let (pool, _temp_dir) = create_test_database().await;
    let admin = AdminService::new(pool.clone(), RecordLocks::new());
    let provisioned = admin
        .provision_from_identity(&claims("idp-2", "p@example.com"))
        .await
        .unwrap();

    assert_eq!(
        admin.get_profile("idp-2").await.unwrap().id,
        provisioned.user.id
    );

    sqlx::query("UPDATE users SET is_deleted = 1, activated = 0 WHERE id = ?")
        .bind(provisioned.user.id.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let error = admin.get_profile("idp-2").await.unwrap_err();
    assert!(matches!(error, ServiceError::InvariantViolation(_)));
    assert!(admin.get_user_detail(provisioned.user.id).await.unwrap().deleted);
}

#[tokio::test]
async fn role_assignment_validates_the_requested_set() {
    let (pool, _temp_dir) = create_test_database().await;
    let admin = AdminService::new(pool.clone(), RecordLocks::new());
    let roles = RoleService::new(pool.clone());

    let auditor = roles
        .create_role(&ops(), " auditor ", Some("Read-only access"))
        .await
        .unwrap();

    let empty = admin
        .update_user_roles(&ops(), admin_id(), &[])
        .await
        .unwrap_err();
    assert!(matches!(empty, ServiceError::InvalidInput(_)));

    let unknown = Uuid::new_v4();
    let missing = admin
        .update_user_roles(&ops(), admin_id(), &[auditor.id, unknown])
        .await
        .unwrap_err();
    match missing {
        ServiceError::NotFound { entity, key } => {
            assert_eq!(entity, "role");
            assert!(key.contains(&unknown.to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }

    let updated = admin
        .update_user_roles(&ops(), admin_id(), &[auditor.id, auditor.id])
        .await
        .unwrap();
    assert_eq!(updated.roles.len(), 1);
    assert!(updated.has_role("AUDITOR"));
    assert!(!updated.has_role("ADMIN"));
    assert_eq!(updated.last_modified_by.as_deref(), Some("ops@example.com"));

    roles.delete_role(&ops(), auditor.id).await.unwrap();
    let deleted = admin
        .update_user_roles(&ops(), admin_id(), &[auditor.id])
        .await
        .unwrap_err();
    assert!(matches!(deleted, ServiceError::InvariantViolation(_)));
}

#[tokio::test]
async fn search_filters_by_role() {
    let (pool, _temp_dir) = create_test_database().await;
    let admin = AdminService::new(pool.clone(), RecordLocks::new());
    admin
        .provision_from_identity(&claims("idp-3", "plain@example.com"))
        .await
        .unwrap();
    let admin_role = RoleRepository::new(pool)
        .find_by_code("ADMIN")
        .await
        .unwrap()
        .unwrap();

    let everyone = admin.search_users(&UserFilter::default()).await.unwrap();
    assert_eq!(everyone.total, 2);

    let admins = admin
        .search_users(&UserFilter {
            role_ids: vec![admin_role.id],
            ..UserFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(admins.total, 1);
    assert_eq!(admins.items[0].id, admin_id());
}

#[tokio::test]
async fn role_codes_are_normalized_and_unique_ignoring_case() {
    let (pool, _temp_dir) = create_test_database().await;
    let roles = RoleService::new(pool);

    let created = roles.create_role(&ops(), "  support ", None).await.unwrap();
    assert_eq!(created.code, "SUPPORT");

    let duplicate = roles.create_role(&ops(), "Support", None).await.unwrap_err();
    assert!(matches!(duplicate, ServiceError::Conflict(_)));

    let invalid = roles.create_role(&ops(), "bad code!", None).await.unwrap_err();
    assert!(matches!(invalid, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn deleted_roles_are_hidden_and_frozen() {
    let (pool, _temp_dir) = create_test_database().await;
    let roles = RoleService::new(pool);
    let role = roles.create_role(&ops(), "temp", None).await.unwrap();

    let described = roles
        .update_description(&ops(), role.id, Some("Temporary"))
        .await
        .unwrap();
    assert_eq!(described.description.as_deref(), Some("Temporary"));

    roles.delete_role(&ops(), role.id).await.unwrap();

    assert!(matches!(
        roles.get_role(role.id).await.unwrap_err(),
        ServiceError::NotFound { entity: "role", .. }
    ));
    assert!(matches!(
        roles.delete_role(&ops(), role.id).await.unwrap_err(),
        ServiceError::InvariantViolation(_)
    ));
    assert!(matches!(
        roles.update_description(&ops(), role.id, None).await.unwrap_err(),
        ServiceError::InvariantViolation(_)
    ));
}

#[tokio::test]
async fn bulk_delete_skips_system_and_deleted_roles() {
    let (pool, _temp_dir) = create_test_database().await;
    let roles = RoleService::new(pool);

    let a = roles.create_role(&ops(), "alpha", None).await.unwrap();
    let b = roles.create_role(&ops(), "beta", None).await.unwrap();
    roles.delete_role(&ops(), b.id).await.unwrap();
    let user_role = roles
        .list_active_roles()
        .await
        .unwrap()
        .into_iter()
        .find(|role| role.code == "USER")
        .unwrap();

    let count = roles
        .bulk_delete_roles(&ops(), &[a.id, b.id, user_role.id, Uuid::new_v4()])
        .await
        .unwrap();
    assert_eq!(count, 1);

    let active: Vec<String> = roles
        .list_active_roles()
        .await
        .unwrap()
        .into_iter()
        .map(|role| role.code)
        .collect();
    assert_eq!(active, vec!["ADMIN".to_string(), "USER".to_string()]);

    let deleted = roles
        .search_roles(&RoleFilter {
            deleted: Some(true),
            ..RoleFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(deleted.total, 2);
}
