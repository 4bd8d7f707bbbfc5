//! Role repository for database operations.

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{format_timestamp, now_timestamp, parse_id, parse_optional_timestamp, parse_timestamp};
use crate::entities::{page_window, Page, Role, RoleFilter};
use crate::types::{RoleError, RoleResult};

pub(crate) const ROLE_COLUMNS: &str = "r.id, r.code, r.description, r.is_deleted, r.created_by, \
     r.created_at, r.last_modified_by, r.last_modified_at";

/// Repository for role database operations
#[derive(Clone)]
pub struct RoleRepository {
    pool: SqlitePool,
}

impl RoleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> RoleResult<Option<Role>> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(role_from_row).transpose()
    }

    /// Fetch every role whose id is in `ids`. Unknown ids are silently skipped.
    pub async fn find_by_ids(&self, ids: &[Uuid]) -> RoleResult<Vec<Role>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ROLE_COLUMNS} FROM roles r WHERE r.id IN ("
        ));
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(") ORDER BY r.code");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(role_from_row).collect()
    }

    /// Case-insensitive lookup by code, including soft-deleted roles.
    pub async fn find_by_code(&self, code: &str) -> RoleResult<Option<Role>> {
        let mut conn = self.pool.acquire().await?;
        self.find_by_code_in(&mut conn, code).await
    }

    pub async fn find_by_code_in(
        &self,
        conn: &mut SqliteConnection,
        code: &str,
    ) -> RoleResult<Option<Role>> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.code = ?"))
            .bind(code)
            .fetch_optional(&mut *conn)
            .await?;

        row.as_ref().map(role_from_row).transpose()
    }

    pub async fn exists_by_code(&self, code: &str) -> RoleResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles WHERE code = ?")
            .bind(code)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn insert(
        &self,
        code: &str,
        description: Option<&str>,
        actor: &str,
    ) -> RoleResult<Role> {
        let id = Uuid::new_v4();
        let now = now_timestamp();

        sqlx::query(
            "INSERT INTO roles (id, code, description, is_deleted, created_by, created_at) \
             VALUES (?, ?, ?, 0, ?, ?)",
        )
        .bind(id.to_string())
        .bind(code)
        .bind(description)
        .bind(actor)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id).await?.ok_or(RoleError::RoleNotFound)
    }

    /// Persist the mutable fields of `role` and stamp the modification audit.
    pub async fn save(&self, role: &Role, actor: &str) -> RoleResult<Role> {
        let mut conn = self.pool.acquire().await?;
        save_in(&mut conn, role, actor).await?;
        drop(conn);
        self.find_by_id(role.id).await?.ok_or(RoleError::RoleNotFound)
    }

    /// Persist several roles atomically.
    pub async fn save_all(&self, roles: &[Role], actor: &str) -> RoleResult<()> {
        let mut tx = self.pool.begin().await?;
        for role in roles {
            save_in(&mut tx, role, actor).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Roles that are not soft-deleted, ordered by code.
    pub async fn list_active(&self) -> RoleResult<Vec<Role>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles r WHERE r.is_deleted = 0 ORDER BY r.code"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(role_from_row).collect()
    }

    pub async fn search(&self, filter: &RoleFilter) -> RoleResult<Page<Role>> {
        let (page, size, offset) = page_window(filter.page, filter.size);

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM roles r WHERE 1 = 1");
        push_role_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE 1 = 1"));
        push_role_filters(&mut select, filter);
        select
            .push(format!(
                " ORDER BY r.{} {}, r.id ASC LIMIT ",
                filter.sort_by.column(),
                filter.order.as_sql()
            ))
            .push_bind(i64::from(size))
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows.iter().map(role_from_row).collect::<RoleResult<Vec<_>>>()?;

        Ok(Page {
            items,
            page,
            size,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }
}

async fn save_in(conn: &mut SqliteConnection, role: &Role, actor: &str) -> RoleResult<()> {
    let result = sqlx::query(
        "UPDATE roles SET code = ?, description = ?, is_deleted = ?, \
         last_modified_by = ?, last_modified_at = ? WHERE id = ?",
    )
    .bind(&role.code)
    .bind(&role.description)
    .bind(role.deleted)
    .bind(actor)
    .bind(now_timestamp())
    .bind(role.id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RoleError::RoleNotFound);
    }
    Ok(())
}

fn push_role_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &RoleFilter) {
    if let Some(search) = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let pattern = format!("%{}%", search.to_lowercase());
        qb.push(" AND (LOWER(r.code) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(COALESCE(r.description, '')) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(deleted) = filter.deleted {
        qb.push(" AND r.is_deleted = ").push_bind(deleted);
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND r.created_at >= ").push_bind(format_timestamp(from));
    }
    if let Some(to) = filter.created_to {
        qb.push(" AND r.created_at <= ").push_bind(format_timestamp(to));
    }
}

pub(crate) fn role_from_row(row: &SqliteRow) -> RoleResult<Role> {
    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Role {
        id: parse_id(&id).map_err(RoleError::CorruptRow)?,
        code: row.try_get("code")?,
        description: row.try_get("description")?,
        deleted: row.try_get("is_deleted")?,
        created_by: row.try_get("created_by")?,
        created_at: parse_timestamp(&created_at).map_err(RoleError::CorruptRow)?,
        last_modified_by: row.try_get("last_modified_by")?,
        last_modified_at: parse_optional_timestamp(row.try_get("last_modified_at")?)
            .map_err(RoleError::CorruptRow)?,
    })
}
