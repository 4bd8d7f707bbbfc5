//! User repository for database operations.
//!
//! Methods that participate in a caller-owned transaction take a
//! `&mut SqliteConnection`; pass `&mut tx` from [`UserRepository::begin`].

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use super::role_repository::{role_from_row, ROLE_COLUMNS};
use super::{format_timestamp, now_timestamp, parse_id, parse_optional_timestamp, parse_timestamp};
use crate::entities::{page_window, NewUser, Page, Role, User, UserFilter};
use crate::types::{UserError, UserResult};

const USER_COLUMNS: &str = "u.id, u.username, u.email, u.display_name, u.remote_ref, \
     u.avatar_url, u.activated, u.is_deleted, u.created_by, u.created_at, \
     u.last_modified_by, u.last_modified_at";

/// Repository for user database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a short write transaction.
    ///
    /// The writer lock is taken before anything is read, so reads inside the
    /// transaction never observe a snapshot that a concurrent commit made stale.
    /// Keep these transactions free of remote calls; cross-call exclusivity on a
    /// record comes from [`ClaimRepository`](super::ClaimRepository).
    pub async fn begin(&self) -> UserResult<Transaction<'static, Sqlite>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE write_claims SET generation = generation + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// Find a user by id regardless of deletion state.
    pub async fn find_by_id(&self, id: Uuid) -> UserResult<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        self.find_by_id_in(&mut conn, id).await
    }

    pub async fn find_by_id_in(
        &self,
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> UserResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?"))
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        self.hydrate(conn, row).await
    }

    /// Find a user by email regardless of deletion state.
    pub async fn find_by_email(&self, email: &str) -> UserResult<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        self.find_by_email_in(&mut conn, email).await
    }

    pub async fn find_by_email_in(
        &self,
        conn: &mut SqliteConnection,
        email: &str,
    ) -> UserResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.email = ?"))
            .bind(email)
            .fetch_optional(&mut *conn)
            .await?;

        self.hydrate(conn, row).await
    }

    /// Find the user linked to a provider identity.
    pub async fn find_by_remote_ref(&self, remote_ref: &str) -> UserResult<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        self.find_by_remote_ref_in(&mut conn, remote_ref).await
    }

    pub async fn find_by_remote_ref_in(
        &self,
        conn: &mut SqliteConnection,
        remote_ref: &str,
    ) -> UserResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.remote_ref = ?"
        ))
        .bind(remote_ref)
        .fetch_optional(&mut *conn)
        .await?;

        self.hydrate(conn, row).await
    }

    pub async fn exists_by_username(&self, username: &str) -> UserResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Insert a new user row together with its role links.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        new_user: &NewUser,
        actor: &str,
    ) -> UserResult<User> {
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO users (id, username, email, display_name, remote_ref, avatar_url, \
             activated, is_deleted, created_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.display_name)
        .bind(&new_user.remote_ref)
        .bind(&new_user.avatar_url)
        .bind(new_user.activated)
        .bind(actor)
        .bind(now_timestamp())
        .execute(&mut *conn)
        .await?;

        self.replace_roles(conn, id, &new_user.role_ids).await?;

        self.find_by_id_in(conn, id)
            .await?
            .ok_or(UserError::UserNotFound)
    }

    /// Persist the mutable columns of `user` and stamp the modification audit.
    ///
    /// Roles are not touched; use [`UserRepository::replace_roles`].
    pub async fn save(
        &self,
        conn: &mut SqliteConnection,
        user: &User,
        actor: &str,
    ) -> UserResult<User> {
        let result = sqlx::query(
            "UPDATE users SET username = ?, email = ?, display_name = ?, remote_ref = ?, \
             avatar_url = ?, activated = ?, is_deleted = ?, last_modified_by = ?, \
             last_modified_at = ? WHERE id = ?",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.remote_ref)
        .bind(&user.avatar_url)
        .bind(user.activated)
        .bind(user.deleted)
        .bind(actor)
        .bind(now_timestamp())
        .bind(user.id.to_string())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UserError::UserNotFound);
        }

        self.find_by_id_in(conn, user.id)
            .await?
            .ok_or(UserError::UserNotFound)
    }

    /// Link a user row to a provider identity.
    pub async fn attach_remote(
        &self,
        conn: &mut SqliteConnection,
        id: Uuid,
        remote_ref: &str,
        avatar_url: Option<&str>,
        actor: &str,
    ) -> UserResult<User> {
        let result = sqlx::query(
            "UPDATE users SET remote_ref = ?, avatar_url = COALESCE(?, avatar_url), \
             last_modified_by = ?, last_modified_at = ? WHERE id = ?",
        )
        .bind(remote_ref)
        .bind(avatar_url)
        .bind(actor)
        .bind(now_timestamp())
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UserError::UserNotFound);
        }

        self.find_by_id_in(conn, id)
            .await?
            .ok_or(UserError::UserNotFound)
    }

    /// Replace the full role set of a user.
    pub async fn replace_roles(
        &self,
        conn: &mut SqliteConnection,
        user_id: Uuid,
        role_ids: &[Uuid],
    ) -> UserResult<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&mut *conn)
            .await?;

        for role_id in role_ids {
            sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
                .bind(user_id.to_string())
                .bind(role_id.to_string())
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    pub async fn roles_for(&self, conn: &mut SqliteConnection, user_id: Uuid) -> UserResult<Vec<Role>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles r \
             JOIN user_roles ur ON ur.role_id = r.id \
             WHERE ur.user_id = ? ORDER BY r.code"
        ))
        .bind(user_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| role_from_row(row).map_err(UserError::from))
            .collect()
    }

    pub async fn count(&self) -> UserResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub async fn search(&self, filter: &UserFilter) -> UserResult<Page<User>> {
        let (page, size, offset) = page_window(filter.page, filter.size);

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users u WHERE 1 = 1");
        push_user_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {USER_COLUMNS} FROM users u WHERE 1 = 1"));
        push_user_filters(&mut select, filter);
        select
            .push(format!(
                " ORDER BY {} {}, u.id ASC LIMIT ",
                filter.sort_by.column(),
                filter.order.as_sql()
            ))
            .push_bind(i64::from(size))
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = select.build().fetch_all(&self.pool).await?;

        let mut conn = self.pool.acquire().await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut user = user_from_row(row)?;
            user.roles = self.roles_for(&mut conn, user.id).await?;
            items.push(user);
        }

        Ok(Page {
            items,
            page,
            size,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn hydrate(
        &self,
        conn: &mut SqliteConnection,
        row: Option<SqliteRow>,
    ) -> UserResult<Option<User>> {
        let Some(row) = row else {
            return Ok(None);
        };

        let mut user = user_from_row(&row)?;
        user.roles = self.roles_for(conn, user.id).await?;
        Ok(Some(user))
    }
}

fn push_user_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter) {
    if let Some(search) = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let pattern = format!("%{}%", search.to_lowercase());
        qb.push(" AND (LOWER(COALESCE(u.email, '')) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(u.username) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(deleted) = filter.deleted {
        qb.push(" AND u.is_deleted = ").push_bind(deleted);
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND u.created_at >= ").push_bind(format_timestamp(from));
    }
    if let Some(to) = filter.created_to {
        qb.push(" AND u.created_at <= ").push_bind(format_timestamp(to));
    }
    if !filter.role_ids.is_empty() {
        qb.push(" AND EXISTS (SELECT 1 FROM user_roles ur WHERE ur.user_id = u.id AND ur.role_id IN (");
        let mut separated = qb.separated(", ");
        for role_id in &filter.role_ids {
            separated.push_bind(role_id.to_string());
        }
        separated.push_unseparated("))");
    }
}

fn user_from_row(row: &SqliteRow) -> UserResult<User> {
    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(User {
        id: parse_id(&id).map_err(UserError::CorruptRow)?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        remote_ref: row.try_get("remote_ref")?,
        avatar_url: row.try_get("avatar_url")?,
        activated: row.try_get("activated")?,
        deleted: row.try_get("is_deleted")?,
        roles: Vec::new(),
        created_by: row.try_get("created_by")?,
        created_at: parse_timestamp(&created_at).map_err(UserError::CorruptRow)?,
        last_modified_by: row.try_get("last_modified_by")?,
        last_modified_at: parse_optional_timestamp(row.try_get("last_modified_at")?)
            .map_err(UserError::CorruptRow)?,
    })
}
