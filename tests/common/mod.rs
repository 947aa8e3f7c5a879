#![allow(dead_code)]

use async_trait::async_trait;
use beauty_shop_backend::api::{self, AppState};
use beauty_shop_backend::config::InvoiceConfig;
use beauty_shop_backend::database::catalog_repository::CatalogStore;
use beauty_shop_backend::database::error::{DatabaseError, DatabaseErrorKind};
use beauty_shop_backend::database::models::{
    CartLine, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, OrderWithItems, Product,
};
use beauty_shop_backend::database::order_repository::{CheckoutUnit, OrderStore};
use beauty_shop_backend::database::user_repository::{UserAccount, UserDirectory};
use beauty_shop_backend::health::{HealthChecker, HealthProbe};
use beauty_shop_backend::invoice::InvoiceRenderer;
use beauty_shop_backend::payments::error::{PaymentError, PaymentResult};
use beauty_shop_backend::payments::types::{PaymentState, StkPushAccepted, StkQueryResult};
use beauty_shop_backend::payments::PaymentGateway;
use beauty_shop_backend::services::{
    CartService, OrderAssemblyService, PaymentCallbackReconciler,
};
use beauty_shop_backend::workers::invoice_delivery::{InvoiceJob, InvoiceQueue};
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedMutexGuard};
use uuid::Uuid;

pub fn money(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

// ── In-memory storage ───────────────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    products: HashMap<i64, Product>,
    cart: Vec<CartLine>,
    orders: Vec<Order>,
    items: Vec<OrderItem>,
}

/// Shared state behind the in-memory catalog and order stores
#[derive(Clone, Default)]
pub struct MemoryDb {
    tables: Arc<Mutex<Tables>>,
    user_locks: Arc<Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>>,
    next_id: Arc<AtomicI64>,
    /// Number of upcoming order inserts that fail with an invoice-number collision
    pub invoice_collisions: Arc<AtomicU32>,
    /// Number of upcoming item inserts that fail
    pub item_failures: Arc<AtomicU32>,
}

impl MemoryDb {
    pub fn new() -> Self {
        let db = Self::default();
        db.next_id.store(1, Ordering::SeqCst);
        db
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn add_product(&self, id: i64, name: &str, price: &str) {
        self.put_product(Product {
            id,
            name: name.to_string(),
            price: money(price),
            is_active: true,
            stock_quantity: None,
        });
    }

    pub fn put_product(&self, product: Product) {
        self.tables.lock().unwrap().products.insert(product.id, product);
    }

    pub fn set_price(&self, id: i64, price: &str) {
        if let Some(product) = self.tables.lock().unwrap().products.get_mut(&id) {
            product.price = money(price);
        }
    }

    pub fn put_cart_line(&self, user_id: i64, product_id: i64, quantity: i32) {
        let id = self.next_id();
        self.tables.lock().unwrap().cart.push(CartLine {
            id,
            user_id,
            product_id,
            quantity,
        });
    }

    pub fn cart_of(&self, user_id: i64) -> Vec<CartLine> {
        self.tables
            .lock()
            .unwrap()
            .cart
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.tables.lock().unwrap().orders.clone()
    }

    pub fn items_of(&self, order_id: i64) -> Vec<OrderItem> {
        self.tables
            .lock()
            .unwrap()
            .items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect()
    }

    pub fn order_by_public_id(&self, public_id: &str) -> Order {
        self.orders()
            .into_iter()
            .find(|o| o.public_id.to_string() == public_id)
            .expect("order exists")
    }

    fn user_lock(&self, user_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.user_locks
            .lock()
            .unwrap()
            .entry(user_id)
            .or_default()
            .clone()
    }

    fn with_items(&self, order: Option<Order>) -> Option<OrderWithItems> {
        order.map(|order| {
            let items = self.items_of(order.id);
            OrderWithItems { order, items }
        })
    }

    fn update_order<F>(&self, order_id: i64, apply: F) -> Option<Order>
    where
        F: FnOnce(&mut Order) -> bool,
    {
        let mut tables = self.tables.lock().unwrap();
        let order = tables.orders.iter_mut().find(|o| o.id == order_id)?;
        if apply(order) {
            order.updated_at = Utc::now();
            Some(order.clone())
        } else {
            None
        }
    }
}

pub struct MemoryCheckoutUnit {
    db: MemoryDb,
    _guard: Option<OwnedMutexGuard<()>>,
    orders: Vec<Order>,
    items: Vec<OrderItem>,
    removed_lines: Vec<i64>,
}

#[async_trait]
impl CheckoutUnit for MemoryCheckoutUnit {
    async fn lock_customer(&mut self, user_id: i64) -> Result<(), DatabaseError> {
        let guard = self.db.user_lock(user_id).lock_owned().await;
        self._guard = Some(guard);
        Ok(())
    }

    async fn cart_lines(&mut self, user_id: i64) -> Result<Vec<CartLine>, DatabaseError> {
        Ok(self.db.cart_of(user_id))
    }

    async fn products(&mut self, ids: &[i64]) -> Result<Vec<Product>, DatabaseError> {
        let tables = self.db.tables.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| tables.products.get(id).cloned())
            .collect())
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, DatabaseError> {
        let collide = self
            .db
            .invoice_collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let duplicate = self
            .db
            .orders()
            .iter()
            .chain(self.orders.iter())
            .any(|o| o.invoice_number == order.invoice_number);
        if collide || duplicate {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: Some("orders_invoice_number_key".to_string()),
            }));
        }

        let now = Utc::now();
        let row = Order {
            id: self.db.next_id(),
            public_id: order.public_id,
            user_id: order.user_id,
            total_amount: order.total_amount.clone(),
            invoice_number: order.invoice_number.clone(),
            status: "pending".to_string(),
            customer_info: order.customer_info.clone(),
            phone_number: order.phone_number.clone(),
            mpesa_checkout_id: None,
            mpesa_receipt: None,
            payment_result_desc: None,
            payment_requested_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.orders.push(row.clone());
        Ok(row)
    }

    async fn insert_items(
        &mut self,
        order_id: i64,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItem>, DatabaseError> {
        let fail = self
            .db
            .item_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "connection reset".to_string(),
            }));
        }

        let rows: Vec<OrderItem> = items
            .iter()
            .map(|item| OrderItem {
                id: self.db.next_id(),
                order_id,
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                price_at_purchase: item.price_at_purchase.clone(),
            })
            .collect();
        self.items.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn remove_cart_lines(
        &mut self,
        user_id: i64,
        line_ids: &[i64],
    ) -> Result<u64, DatabaseError> {
        let matching: Vec<i64> = self
            .db
            .cart_of(user_id)
            .iter()
            .map(|line| line.id)
            .filter(|id| line_ids.contains(id))
            .collect();
        self.removed_lines.extend(matching.iter().copied());
        Ok(matching.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let mut tables = self.db.tables.lock().unwrap();
        tables.orders.extend(self.orders.iter().cloned());
        tables.items.extend(self.items.iter().cloned());
        let removed = &self.removed_lines;
        tables.cart.retain(|line| !removed.contains(&line.id));
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryDb {
    async fn begin(&self) -> Result<Box<dyn CheckoutUnit>, DatabaseError> {
        Ok(Box::new(MemoryCheckoutUnit {
            db: self.clone(),
            _guard: None,
            orders: Vec::new(),
            items: Vec::new(),
            removed_lines: Vec::new(),
        }))
    }

    async fn find_by_public_id(
        &self,
        public_id: Uuid,
    ) -> Result<Option<OrderWithItems>, DatabaseError> {
        let order = self
            .orders()
            .into_iter()
            .find(|o| o.public_id == public_id && o.is_active);
        Ok(self.with_items(order))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<OrderWithItems>, DatabaseError> {
        let order = self.orders().into_iter().find(|o| o.id == id);
        Ok(self.with_items(order))
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        Ok(self
            .orders()
            .into_iter()
            .find(|o| o.mpesa_checkout_id.as_deref() == Some(checkout_request_id)))
    }

    async fn attach_checkout_request(
        &self,
        order_id: i64,
        checkout_request_id: &str,
        phone_number: &str,
    ) -> Result<bool, DatabaseError> {
        Ok(self
            .update_order(order_id, |o| {
                if o.mpesa_checkout_id.is_some() {
                    return false;
                }
                o.mpesa_checkout_id = Some(checkout_request_id.to_string());
                o.phone_number = Some(phone_number.to_string());
                true
            })
            .is_some())
    }

    async fn claim_payment_request(
        &self,
        order_id: i64,
        stale_after: Duration,
    ) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.lock().unwrap();
        let Some(order) = tables.orders.iter_mut().find(|o| o.id == order_id) else {
            return Ok(false);
        };

        let now = Utc::now();
        let stale = chrono::Duration::from_std(stale_after).unwrap();
        let free = order
            .payment_requested_at
            .map_or(true, |claimed| claimed < now - stale);
        if order.status != "pending" || !order.is_active || order.mpesa_checkout_id.is_some() || !free
        {
            return Ok(false);
        }
        order.payment_requested_at = Some(now);
        Ok(true)
    }

    async fn release_payment_request(&self, order_id: i64) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(order) = tables
            .orders
            .iter_mut()
            .find(|o| o.id == order_id && o.mpesa_checkout_id.is_none())
        {
            order.payment_requested_at = None;
        }
        Ok(())
    }

    async fn record_payment_success(
        &self,
        order_id: i64,
        receipt: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        Ok(self
            .update_order(order_id, |o| {
                if o.status != "pending" {
                    return false;
                }
                o.status = "paid".to_string();
                o.mpesa_receipt = receipt.map(str::to_string);
                if let Some(phone) = phone_number {
                    o.phone_number = Some(phone.to_string());
                }
                true
            })
            .is_some())
    }

    async fn record_payment_failure(
        &self,
        order_id: i64,
        description: &str,
    ) -> Result<bool, DatabaseError> {
        Ok(self
            .update_order(order_id, |o| {
                if o.status != "pending" {
                    return false;
                }
                o.status = "failed".to_string();
                o.payment_result_desc = Some(description.to_string());
                true
            })
            .is_some())
    }

    async fn update_status(
        &self,
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, DatabaseError> {
        Ok(self.update_order(order_id, |o| {
            if o.status != from.as_str() {
                return false;
            }
            o.status = to.as_str().to_string();
            true
        }))
    }

    async fn deactivate(&self, order_id: i64) -> Result<bool, DatabaseError> {
        Ok(self
            .update_order(order_id, |o| {
                if !o.is_active {
                    return false;
                }
                o.is_active = false;
                true
            })
            .is_some())
    }
}

#[async_trait]
impl CatalogStore for MemoryDb {
    async fn get_product(&self, product_id: i64) -> Result<Option<Product>, DatabaseError> {
        Ok(self.tables.lock().unwrap().products.get(&product_id).cloned())
    }

    async fn cart_for_user(&self, user_id: i64) -> Result<Vec<CartLine>, DatabaseError> {
        Ok(self.cart_of(user_id))
    }

    async fn add_to_cart(
        &self,
        user_id: i64,
        product_id: i64,
        quantity: i32,
    ) -> Result<CartLine, DatabaseError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(line) = tables
            .cart
            .iter_mut()
            .find(|l| l.user_id == user_id && l.product_id == product_id)
        {
            line.quantity += quantity;
            return Ok(line.clone());
        }
        let line = CartLine {
            id: self.next_id(),
            user_id,
            product_id,
            quantity,
        };
        tables.cart.push(line.clone());
        Ok(line)
    }
}

/// Order store whose public-id lookups start failing after a number of successes
pub struct FlakyLookupStore {
    inner: MemoryDb,
    lookups_left: AtomicU32,
}

impl FlakyLookupStore {
    pub fn new(inner: MemoryDb, successful_lookups: u32) -> Self {
        Self {
            inner,
            lookups_left: AtomicU32::new(successful_lookups),
        }
    }
}

#[async_trait]
impl OrderStore for FlakyLookupStore {
    async fn begin(&self) -> Result<Box<dyn CheckoutUnit>, DatabaseError> {
        self.inner.begin().await
    }

    async fn find_by_public_id(
        &self,
        public_id: Uuid,
    ) -> Result<Option<OrderWithItems>, DatabaseError> {
        let allowed = self
            .lookups_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "connection reset".to_string(),
            }));
        }
        self.inner.find_by_public_id(public_id).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<OrderWithItems>, DatabaseError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        self.inner.find_by_checkout_request_id(checkout_request_id).await
    }

    async fn attach_checkout_request(
        &self,
        order_id: i64,
        checkout_request_id: &str,
        phone_number: &str,
    ) -> Result<bool, DatabaseError> {
        self.inner
            .attach_checkout_request(order_id, checkout_request_id, phone_number)
            .await
    }

    async fn claim_payment_request(
        &self,
        order_id: i64,
        stale_after: Duration,
    ) -> Result<bool, DatabaseError> {
        self.inner.claim_payment_request(order_id, stale_after).await
    }

    async fn release_payment_request(&self, order_id: i64) -> Result<(), DatabaseError> {
        self.inner.release_payment_request(order_id).await
    }

    async fn record_payment_success(
        &self,
        order_id: i64,
        receipt: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        self.inner
            .record_payment_success(order_id, receipt, phone_number)
            .await
    }

    async fn record_payment_failure(
        &self,
        order_id: i64,
        description: &str,
    ) -> Result<bool, DatabaseError> {
        self.inner.record_payment_failure(order_id, description).await
    }

    async fn update_status(
        &self,
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, DatabaseError> {
        self.inner.update_status(order_id, from, to).await
    }

    async fn deactivate(&self, order_id: i64) -> Result<bool, DatabaseError> {
        self.inner.deactivate(order_id).await
    }
}

// ── Users ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryUsers {
    by_token: Mutex<HashMap<String, UserAccount>>,
}

impl MemoryUsers {
    pub fn add(&self, token: &str, user: UserAccount) {
        self.by_token
            .lock()
            .unwrap()
            .insert(token.to_string(), user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUsers {
    async fn find_by_token(&self, token: &str) -> Result<Option<UserAccount>, DatabaseError> {
        Ok(self.by_token.lock().unwrap().get(token).cloned())
    }
}

pub fn customer(id: i64, email: &str) -> UserAccount {
    UserAccount {
        id,
        email: email.to_string(),
        full_name: Some(format!("Customer {}", id)),
        phone: None,
        is_admin: false,
    }
}

pub fn admin(id: i64) -> UserAccount {
    UserAccount {
        is_admin: true,
        ..customer(id, "admin@example.com")
    }
}

// ── Gateway ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Accept,
    Unconfigured,
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCall {
    pub phone: String,
    pub amount: BigDecimal,
    pub reference: String,
}

pub struct MockGateway {
    mode: Mutex<GatewayMode>,
    counter: AtomicU32,
    delay: Mutex<Option<Duration>>,
    pub calls: Mutex<Vec<GatewayCall>>,
}

impl MockGateway {
    pub fn new(mode: GatewayMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            counter: AtomicU32::new(0),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: GatewayMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Hold every STK push for `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initiate_payment(
        &self,
        raw_phone: &str,
        amount: &BigDecimal,
        reference: &str,
    ) -> PaymentResult<StkPushAccepted> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mode = *self.mode.lock().unwrap();
        match mode {
            GatewayMode::Unconfigured => {
                return Err(PaymentError::ConfigurationError {
                    missing: vec!["MPESA_CONSUMER_KEY".to_string()],
                })
            }
            GatewayMode::Timeout => {
                self.calls.lock().unwrap().push(GatewayCall {
                    phone: raw_phone.to_string(),
                    amount: amount.clone(),
                    reference: reference.to_string(),
                });
                return Err(PaymentError::TimeoutError {
                    operation: "stk_push".to_string(),
                    timeout_secs: 30,
                    message: "request timed out".to_string(),
                });
            }
            GatewayMode::Accept => {}
        }

        self.calls.lock().unwrap().push(GatewayCall {
            phone: raw_phone.to_string(),
            amount: amount.clone(),
            reference: reference.to_string(),
        });
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StkPushAccepted {
            checkout_request_id: format!("ws_CO_TEST_{}", n),
            merchant_request_id: Some(format!("MR-{}", n)),
            customer_message: Some("Success. Request accepted for processing".to_string()),
            phone_number: raw_phone.to_string(),
            amount: 1,
        })
    }

    async fn query_status(&self, checkout_request_id: &str) -> PaymentResult<StkQueryResult> {
        Ok(StkQueryResult {
            checkout_request_id: checkout_request_id.to_string(),
            state: PaymentState::Pending,
            result_code: None,
            result_desc: Some("The transaction is being processed".to_string()),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ── Application ─────────────────────────────────────────────────────────────

struct AlwaysUp;

#[async_trait]
impl HealthProbe for AlwaysUp {
    async fn ping(&self) -> Result<u128, String> {
        Ok(1)
    }
}

pub struct TestApp {
    pub db: MemoryDb,
    pub gateway: Arc<MockGateway>,
    pub users: Arc<MemoryUsers>,
    pub orders: Arc<OrderAssemblyService>,
    pub callbacks: Arc<PaymentCallbackReconciler>,
    pub invoices: mpsc::UnboundedReceiver<InvoiceJob>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_gateway(GatewayMode::Accept)
    }

    pub fn with_gateway(mode: GatewayMode) -> Self {
        let db = MemoryDb::new();
        let gateway = Arc::new(MockGateway::new(mode));
        let users = Arc::new(MemoryUsers::default());
        let (queue, invoices) = InvoiceQueue::new();

        let orders = Arc::new(OrderAssemblyService::new(
            Arc::new(db.clone()),
            gateway.clone(),
            InvoiceRenderer::new(&InvoiceConfig::default()),
            queue,
        ));
        let callbacks = Arc::new(PaymentCallbackReconciler::new(Arc::new(db.clone())));

        let state = AppState {
            orders: orders.clone(),
            callbacks: callbacks.clone(),
            carts: Arc::new(CartService::new(Arc::new(db.clone()))),
            users: users.clone(),
            health: HealthChecker::new(Arc::new(AlwaysUp)),
        };

        Self {
            db,
            gateway,
            users,
            orders,
            callbacks,
            invoices,
            state,
        }
    }

    pub fn router(&self) -> axum::Router {
        api::router(self.state.clone())
    }

    /// Jobs queued so far
    pub fn queued_invoices(&mut self) -> Vec<InvoiceJob> {
        let mut jobs = Vec::new();
        while let Ok(job) = self.invoices.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}

/// STK callback body in the gateway's nested format
pub fn success_callback(checkout_request_id: &str, amount: &str, receipt: &str) -> serde_json::Value {
    serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": serde_json::Value::from_str(amount).unwrap()},
                        {"Name": "MpesaReceiptNumber", "Value": receipt},
                        {"Name": "TransactionDate", "Value": 20191219102115u64},
                        {"Name": "PhoneNumber", "Value": 254708374149u64}
                    ]
                }
            }
        }
    })
}

pub fn failure_callback(checkout_request_id: &str, code: i64, desc: &str) -> serde_json::Value {
    serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": code,
                "ResultDesc": desc
            }
        }
    })
}
