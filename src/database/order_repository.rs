use crate::database::error::DatabaseError;
use crate::database::models::{
    CartLine, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, OrderWithItems, Product,
};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, public_id, user_id, total_amount, invoice_number, status, \
     customer_info, phone_number, mpesa_checkout_id, mpesa_receipt, payment_result_desc, \
     payment_requested_at, is_active, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, product_name, quantity, price_at_purchase";

/// One checkout, executed inside a single database transaction.
///
/// Dropping the unit without calling `commit` discards every write.
#[async_trait]
pub trait CheckoutUnit: Send {
    /// Serialize concurrent checkouts of the same customer until commit
    async fn lock_customer(&mut self, user_id: i64) -> Result<(), DatabaseError>;

    /// Cart rows of the user, locked for the rest of the transaction
    async fn cart_lines(&mut self, user_id: i64) -> Result<Vec<CartLine>, DatabaseError>;

    /// Current catalog rows for the given ids; unknown ids are simply absent
    async fn products(&mut self, ids: &[i64]) -> Result<Vec<Product>, DatabaseError>;

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, DatabaseError>;

    async fn insert_items(
        &mut self,
        order_id: i64,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItem>, DatabaseError>;

    /// Remove the given cart rows of the user, returning the number removed.
    ///
    /// Rows added after `cart_lines` was read are not in `line_ids` and stay in the cart.
    async fn remove_cart_lines(
        &mut self,
        user_id: i64,
        line_ids: &[i64],
    ) -> Result<u64, DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Durable order storage
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CheckoutUnit>, DatabaseError>;

    /// Active orders only
    async fn find_by_public_id(
        &self,
        public_id: Uuid,
    ) -> Result<Option<OrderWithItems>, DatabaseError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<OrderWithItems>, DatabaseError>;

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Order>, DatabaseError>;

    /// Store the gateway correlation id; false when the order already has one
    async fn attach_checkout_request(
        &self,
        order_id: i64,
        checkout_request_id: &str,
        phone_number: &str,
    ) -> Result<bool, DatabaseError>;

    /// Reserve a pending order without a correlation id for one payment request.
    ///
    /// False when the order cannot be paid or another request holds a claim younger
    /// than `stale_after`.
    async fn claim_payment_request(
        &self,
        order_id: i64,
        stale_after: Duration,
    ) -> Result<bool, DatabaseError>;

    /// Give the claim back after the gateway refused the request
    async fn release_payment_request(&self, order_id: i64) -> Result<(), DatabaseError>;

    /// `pending -> paid`; false when the order was not pending
    async fn record_payment_success(
        &self,
        order_id: i64,
        receipt: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    /// `pending -> failed`; false when the order was not pending
    async fn record_payment_failure(
        &self,
        order_id: i64,
        description: &str,
    ) -> Result<bool, DatabaseError>;

    /// Compare-and-set status change; `None` when the current status is not `from`
    async fn update_status(
        &self,
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, DatabaseError>;

    /// Soft delete; false when no active order had this id
    async fn deactivate(&self, order_id: i64) -> Result<bool, DatabaseError>;
}

/// Postgres-backed order store
#[derive(Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn items_for(&self, order_id: i64) -> Result<Vec<OrderItem>, DatabaseError> {
        sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {} FROM order_items WHERE order_id = $1 ORDER BY id",
            ITEM_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn with_items(&self, order: Option<Order>) -> Result<Option<OrderWithItems>, DatabaseError> {
        match order {
            Some(order) => {
                let items = self.items_for(order.id).await?;
                Ok(Some(OrderWithItems { order, items }))
            }
            None => Ok(None),
        }
    }
}

/// Checkout transaction on a pooled Postgres connection
pub struct PgCheckoutUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CheckoutUnit for PgCheckoutUnit {
    async fn lock_customer(&mut self, user_id: i64) -> Result<(), DatabaseError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn cart_lines(&mut self, user_id: i64) -> Result<Vec<CartLine>, DatabaseError> {
        sqlx::query_as::<_, CartLine>(
            "SELECT id, user_id, product_id, quantity FROM cart_items
             WHERE user_id = $1 ORDER BY id FOR UPDATE",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn products(&mut self, ids: &[i64]) -> Result<Vec<Product>, DatabaseError> {
        sqlx::query_as::<_, Product>(
            "SELECT id, name, price, is_active, stock_quantity FROM products
             WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders
             (public_id, user_id, total_amount, invoice_number, status, customer_info, phone_number)
             VALUES ($1, $2, $3, $4, 'pending', $5, $6)
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order.public_id)
        .bind(order.user_id)
        .bind(&order.total_amount)
        .bind(&order.invoice_number)
        .bind(&order.customer_info)
        .bind(&order.phone_number)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert_items(
        &mut self,
        order_id: i64,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItem>, DatabaseError> {
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query_as::<_, OrderItem>(&format!(
                "INSERT INTO order_items (order_id, product_id, product_name, quantity, price_at_purchase)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING {}",
                ITEM_COLUMNS
            ))
            .bind(order_id)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(&item.price_at_purchase)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn remove_cart_lines(
        &mut self,
        user_id: i64,
        line_ids: &[i64],
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND id = ANY($2)")
            .bind(user_id)
            .bind(line_ids)
            .execute(&mut *self.tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx.commit().await.map_err(DatabaseError::from_sqlx)
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx.rollback().await.map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn begin(&self) -> Result<Box<dyn CheckoutUnit>, DatabaseError> {
        let tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        Ok(Box::new(PgCheckoutUnit { tx }))
    }

    async fn find_by_public_id(
        &self,
        public_id: Uuid,
    ) -> Result<Option<OrderWithItems>, DatabaseError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE public_id = $1 AND is_active = TRUE",
            ORDER_COLUMNS
        ))
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        self.with_items(order).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<OrderWithItems>, DatabaseError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        self.with_items(order).await
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE mpesa_checkout_id = $1",
            ORDER_COLUMNS
        ))
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn attach_checkout_request(
        &self,
        order_id: i64,
        checkout_request_id: &str,
        phone_number: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders
             SET mpesa_checkout_id = $2, phone_number = $3, updated_at = NOW()
             WHERE id = $1 AND mpesa_checkout_id IS NULL",
        )
        .bind(order_id)
        .bind(checkout_request_id)
        .bind(phone_number)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_payment_request(
        &self,
        order_id: i64,
        stale_after: Duration,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders SET payment_requested_at = NOW()
             WHERE id = $1 AND status = 'pending' AND is_active = TRUE
               AND mpesa_checkout_id IS NULL
               AND (payment_requested_at IS NULL
                    OR payment_requested_at < NOW() - make_interval(secs => $2))",
        )
        .bind(order_id)
        .bind(stale_after.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_payment_request(&self, order_id: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE orders SET payment_requested_at = NULL
             WHERE id = $1 AND mpesa_checkout_id IS NULL",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn record_payment_success(
        &self,
        order_id: i64,
        receipt: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders
             SET status = 'paid', mpesa_receipt = $2,
                 phone_number = COALESCE($3, phone_number), updated_at = NOW()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .bind(receipt)
        .bind(phone_number)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_payment_failure(
        &self,
        order_id: i64,
        description: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders
             SET status = 'failed', payment_result_desc = $2, updated_at = NOW()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_status(
        &self,
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, DatabaseError> {
        sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET status = $3, updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn deactivate(&self, order_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders SET is_active = FALSE, updated_at = NOW()
             WHERE id = $1 AND is_active = TRUE",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }
}
