use crate::database::error::DatabaseError;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

/// Authenticated account as seen by the order endpoints
#[derive(Debug, Clone, FromRow)]
pub struct UserAccount {
    pub id: i64,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub is_admin: bool,
}

/// Resolves bearer tokens issued by the auth subsystem
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_token(&self, token: &str) -> Result<Option<UserAccount>, DatabaseError>;
}

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for UserRepository {
    async fn find_by_token(&self, token: &str) -> Result<Option<UserAccount>, DatabaseError> {
        sqlx::query_as::<_, UserAccount>(
            "SELECT u.id, u.email, u.full_name, u.phone, u.is_admin
             FROM api_tokens t
             JOIN users u ON u.id = t.user_id
             WHERE t.token = $1 AND (t.expires_at IS NULL OR t.expires_at > NOW())",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
