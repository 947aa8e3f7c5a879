use crate::database::error::DatabaseError;
use crate::database::models::{CartLine, Product};
use async_trait::async_trait;
use sqlx::PgPool;

/// Read access to the catalog and write access to carts
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Product by id regardless of its active flag
    async fn get_product(&self, product_id: i64) -> Result<Option<Product>, DatabaseError>;

    async fn cart_for_user(&self, user_id: i64) -> Result<Vec<CartLine>, DatabaseError>;

    /// Insert the line or add `quantity` to the existing one
    async fn add_to_cart(
        &self,
        user_id: i64,
        product_id: i64,
        quantity: i32,
    ) -> Result<CartLine, DatabaseError>;
}

#[derive(Clone)]
pub struct CatalogRepository {
    pool: PgPool,
}

impl CatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for CatalogRepository {
    async fn get_product(&self, product_id: i64) -> Result<Option<Product>, DatabaseError> {
        sqlx::query_as::<_, Product>(
            "SELECT id, name, price, is_active, stock_quantity FROM products WHERE id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn cart_for_user(&self, user_id: i64) -> Result<Vec<CartLine>, DatabaseError> {
        sqlx::query_as::<_, CartLine>(
            "SELECT id, user_id, product_id, quantity FROM cart_items WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn add_to_cart(
        &self,
        user_id: i64,
        product_id: i64,
        quantity: i32,
    ) -> Result<CartLine, DatabaseError> {
        sqlx::query_as::<_, CartLine>(
            "INSERT INTO cart_items (user_id, product_id, quantity)
             VALUES ($1, $2, $3)
             ON CONFLICT ON CONSTRAINT cart_items_user_product_key
             DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
             RETURNING id, user_id, product_id, quantity",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(quantity)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
