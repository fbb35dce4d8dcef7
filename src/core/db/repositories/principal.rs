//! Postgres-backed principal store
//!
//! Principals live in `principals`, role grants in `principal_roles`.
//! Refresh tokens are stored on the principal row, one per principal.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::db::models::{CreatePrincipal, Principal, PrincipalRow};
use crate::core::db::store::{PrincipalStore, StoreError};

/// Principal columns plus the aggregated role list
const SELECT_PRINCIPAL: &str = "SELECT p.id, p.email, p.username, p.display_name, p.avatar_url, \
     ARRAY(SELECT r.role FROM principal_roles r WHERE r.principal_id = p.id ORDER BY r.role)::TEXT[] AS roles, \
     p.refresh_token, p.refresh_token_expires_at \
     FROM principals p";

/// Principal repository for database operations
#[derive(Clone)]
pub struct PgPrincipalStore {
    pool: PgPool,
}

impl PgPrincipalStore {
    /// Create a new principal store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a principal without roles or session
    pub async fn create(&self, input: &CreatePrincipal) -> Result<Principal, StoreError> {
        if self.find_by_email(&input.email).await?.is_some() {
            return Err(StoreError::EmailAlreadyExists);
        }

        let username_taken: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM principals WHERE username = $1")
                .bind(&input.username)
                .fetch_optional(&self.pool)
                .await?;
        if username_taken.is_some() {
            return Err(StoreError::UsernameAlreadyExists);
        }

        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO principals (email, username, display_name, avatar_url)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&input.email)
        .bind(&input.username)
        .bind(&input.display_name)
        .bind(&input.avatar_url)
        .fetch_one(&self.pool)
        .await?;

        self.find_by_id(id.0).await?.ok_or(StoreError::NotFound)
    }

    /// Grant a role. Returns `false` if it was already granted.
    pub async fn add_role(&self, id: Uuid, role: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO principal_roles (principal_id, role)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(role)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Revoke a role. Returns `false` if it was not granted.
    pub async fn remove_role(&self, id: Uuid, role: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM principal_roles WHERE principal_id = $1 AND role = $2")
                .bind(id)
                .bind(role)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl PrincipalStore for PgPrincipalStore {
    async fn find_by_refresh_token(&self, token: &str) -> Result<Option<Principal>, StoreError> {
        let query = format!("{SELECT_PRINCIPAL} WHERE p.refresh_token = $1");
        let row = sqlx::query_as::<_, PrincipalRow>(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Principal::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, StoreError> {
        let query = format!("{SELECT_PRINCIPAL} WHERE p.id = $1");
        let row = sqlx::query_as::<_, PrincipalRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Principal::from))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        let query = format!("{SELECT_PRINCIPAL} WHERE LOWER(p.email) = LOWER($1)");
        let row = sqlx::query_as::<_, PrincipalRow>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Principal::from))
    }

    async fn roles(&self, id: Uuid) -> Result<BTreeSet<String>, StoreError> {
        let roles: Vec<(String,)> =
            sqlx::query_as("SELECT role FROM principal_roles WHERE principal_id = $1")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        Ok(roles.into_iter().map(|(role,)| role).collect())
    }

    async fn persist(&self, principal: &Principal) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE principals
            SET email = $2,
                username = $3,
                display_name = $4,
                avatar_url = $5,
                refresh_token = $6,
                refresh_token_expires_at = $7,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(principal.id)
        .bind(&principal.email)
        .bind(&principal.username)
        .bind(&principal.display_name)
        .bind(&principal.avatar_url)
        .bind(&principal.refresh_token)
        .bind(principal.refresh_token_expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn replace_refresh_token(
        &self,
        id: Uuid,
        expected: &str,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE principals
            SET refresh_token = $3,
                refresh_token_expires_at = $4,
                updated_at = NOW()
            WHERE id = $1
              AND refresh_token = $2
              AND refresh_token_expires_at > $5
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(token)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
