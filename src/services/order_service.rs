//! Order assembly: turns a cart or a guest payload into a persisted order
//!
//! Totals are always recomputed from current catalog prices inside the checkout
//! transaction. Invoice delivery and payment initiation happen only after commit,
//! and neither can undo a committed order.

use crate::database::error::DatabaseError;
use crate::database::models::{
    format_money, round_money, CustomerContact, NewOrder, NewOrderItem, Order, OrderStatus,
    OrderWithItems, Product,
};
use crate::database::order_repository::{CheckoutUnit, OrderStore};
use crate::database::user_repository::UserAccount;
use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::invoice::{invoice_file_name, InvoiceDocument, InvoiceRenderer};
use crate::logging::mask_phone;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{PaymentEnvelope, StkQueryResult};
use crate::workers::invoice_delivery::{InvoiceJob, InvoiceQueue};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Attempts before a run of invoice-number collisions is reported as a failure
const MAX_INVOICE_ATTEMPTS: u32 = 3;

/// A payment claim older than this is treated as abandoned by a crashed request
const PAYMENT_CLAIM_TTL: Duration = Duration::from_secs(120);

// ── Requests and views ──────────────────────────────────────────────────────

/// Guest line: only the product and quantity are used
#[derive(Debug, Clone, Deserialize)]
pub struct GuestOrderItem {
    #[serde(alias = "productId", alias = "id")]
    pub product_id: i64,
    pub quantity: i32,
}

/// Guest checkout payload. `total` and any per-item price are accepted but ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestOrderRequest {
    pub customer: CustomerContact,
    pub items: Vec<GuestOrderItem>,
    #[serde(default)]
    pub total: Option<serde_json::Value>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub mpesa_phone: Option<String>,
}

impl GuestOrderRequest {
    pub fn wants_mpesa(&self) -> bool {
        self.payment_method
            .as_deref()
            .map(|m| m.trim().eq_ignore_ascii_case("mpesa"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItemView {
    pub product_id: i64,
    pub name: String,
    pub quantity: i32,
    pub price_at_purchase: String,
    pub subtotal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderView {
    pub public_id: Uuid,
    pub invoice_number: String,
    pub status: OrderStatus,
    pub total_amount: String,
    pub customer: CustomerContact,
    pub items: Vec<OrderItemView>,
    pub checkout_request_id: Option<String>,
    pub mpesa_receipt: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&OrderWithItems> for OrderView {
    fn from(source: &OrderWithItems) -> Self {
        let order = &source.order;
        Self {
            public_id: order.public_id,
            invoice_number: order.invoice_number.clone(),
            status: order.order_status(),
            total_amount: format_money(&order.total_amount),
            customer: order.customer(),
            items: source
                .items
                .iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    name: item.product_name.clone(),
                    quantity: item.quantity,
                    price_at_purchase: format_money(&item.price_at_purchase),
                    subtotal: format_money(&item.line_total()),
                })
                .collect(),
            checkout_request_id: order.mpesa_checkout_id.clone(),
            mpesa_receipt: order.mpesa_receipt.clone(),
            created_at: order.created_at,
        }
    }
}

/// Payment leg of a checkout response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Initiated {
        checkout_request_id: String,
        customer_message: Option<String>,
    },
    NotRequested,
    Failed {
        error: PaymentEnvelope,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutResult {
    pub order: OrderView,
    pub payment: PaymentOutcome,
}

impl CheckoutResult {
    fn new(order: &OrderWithItems, payment: PaymentOutcome) -> Self {
        let mut view = OrderView::from(order);
        if let PaymentOutcome::Initiated {
            checkout_request_id,
            ..
        } = &payment
        {
            view.checkout_request_id = Some(checkout_request_id.clone());
        }
        Self {
            order: view,
            payment,
        }
    }
}

fn already_initiated() -> PaymentEnvelope {
    PaymentEnvelope {
        code: "PAYMENT_ALREADY_INITIATED".to_string(),
        message: "a payment request is already pending for this order".to_string(),
        retryable: false,
    }
}

// ── Pricing ─────────────────────────────────────────────────────────────────

/// Validated lines with authoritative prices
#[derive(Debug, Clone)]
pub struct PricedOrder {
    pub items: Vec<NewOrderItem>,
    pub total: BigDecimal,
}

/// Validate requested `(product_id, quantity)` lines against current catalog rows and
/// price them. Any invalid line fails the whole order.
pub fn price_lines(requested: &[(i64, i32)], products: &[Product]) -> AppResult<PricedOrder> {
    if requested.is_empty() {
        return Err(AppError::validation(ValidationError::EmptyCart));
    }

    let catalog: HashMap<i64, &Product> = products.iter().map(|p| (p.id, p)).collect();
    let mut items = Vec::with_capacity(requested.len());
    let mut total = BigDecimal::from(0);

    for &(product_id, quantity) in requested {
        if quantity <= 0 {
            return Err(AppError::validation(ValidationError::InvalidQuantity {
                product_id,
                quantity,
            }));
        }

        let product = catalog
            .get(&product_id)
            .ok_or_else(|| AppError::validation(ValidationError::UnknownProduct { product_id }))?;

        if !product.is_active {
            return Err(AppError::validation(ValidationError::InactiveProduct {
                product_id,
                name: product.name.clone(),
            }));
        }

        if let Some(available) = product.stock_quantity {
            if quantity > available {
                return Err(AppError::validation(ValidationError::InsufficientStock {
                    product_id,
                    name: product.name.clone(),
                    requested: quantity,
                    available,
                }));
            }
        }

        total += &product.price * BigDecimal::from(quantity);
        items.push(NewOrderItem {
            product_id,
            product_name: product.name.clone(),
            quantity,
            price_at_purchase: product.price.clone(),
        });
    }

    Ok(PricedOrder {
        items,
        total: round_money(&total),
    })
}

/// Merge repeated product ids, keeping first-seen order
fn merge_guest_items(items: &[GuestOrderItem]) -> AppResult<Vec<(i64, i32)>> {
    let mut merged: Vec<(i64, i32)> = Vec::with_capacity(items.len());
    let mut positions: BTreeMap<i64, usize> = BTreeMap::new();

    for item in items {
        if item.quantity <= 0 {
            return Err(AppError::validation(ValidationError::InvalidQuantity {
                product_id: item.product_id,
                quantity: item.quantity,
            }));
        }
        match positions.get(&item.product_id) {
            Some(&index) => {
                let line = &mut merged[index];
                line.1 = line.1.checked_add(item.quantity).ok_or_else(|| {
                    AppError::validation(ValidationError::InvalidQuantity {
                        product_id: item.product_id,
                        quantity: item.quantity,
                    })
                })?;
            }
            None => {
                positions.insert(item.product_id, merged.len());
                merged.push((item.product_id, item.quantity));
            }
        }
    }

    Ok(merged)
}

/// `INV-YYYYMMDD-XXXXXXXX` with eight random upper-case hex characters
pub fn generate_invoice_number(now: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect::<String>()
        .to_uppercase();
    format!("INV-{}-{}", now.format("%Y%m%d"), suffix)
}

// ── Service ─────────────────────────────────────────────────────────────────

enum CheckoutSource<'a> {
    Cart { customer: &'a UserAccount },
    Guest {
        contact: &'a CustomerContact,
        lines: &'a [(i64, i32)],
        phone: Option<&'a str>,
    },
}

enum AttemptError {
    InvoiceCollision(DatabaseError),
    Failed(AppError),
}

impl From<AppError> for AttemptError {
    fn from(err: AppError) -> Self {
        AttemptError::Failed(err)
    }
}

impl From<DatabaseError> for AttemptError {
    fn from(err: DatabaseError) -> Self {
        AttemptError::Failed(err.into())
    }
}

pub struct OrderAssemblyService {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    renderer: InvoiceRenderer,
    invoices: InvoiceQueue,
}

impl OrderAssemblyService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        renderer: InvoiceRenderer,
        invoices: InvoiceQueue,
    ) -> Self {
        Self {
            store,
            gateway,
            renderer,
            invoices,
        }
    }

    /// Convert the customer's whole cart into a pending order and empty the cart
    pub async fn create_order_from_cart(&self, customer: &UserAccount) -> AppResult<OrderView> {
        let order = self.place_cart_order(customer).await?;
        Ok(OrderView::from(&order))
    }

    /// Cart checkout followed by an STK push when a phone number is known
    pub async fn checkout(
        &self,
        customer: &UserAccount,
        phone: Option<&str>,
    ) -> AppResult<CheckoutResult> {
        let order = self.place_cart_order(customer).await?;

        let phone = phone
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .or_else(|| customer.phone.as_deref());

        let payment = match phone {
            Some(phone) => self.initiate_payment(&order.order, phone).await,
            None => PaymentOutcome::NotRequested,
        };

        Ok(CheckoutResult::new(&order, payment))
    }

    /// Order from a caller-supplied item list for a customer without an account
    pub async fn create_guest_order(&self, request: &GuestOrderRequest) -> AppResult<OrderView> {
        let order = self.place_guest(request).await?;
        Ok(OrderView::from(&order))
    }

    /// Guest order plus STK push when M-Pesa was chosen
    pub async fn place_guest_order(&self, request: &GuestOrderRequest) -> AppResult<CheckoutResult> {
        let phone = request
            .mpesa_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        if request.wants_mpesa() && phone.is_none() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "mpesaPhone".to_string(),
            }));
        }

        let order = self.place_guest(request).await?;

        let payment = match (request.wants_mpesa(), phone) {
            (true, Some(phone)) => self.initiate_payment(&order.order, phone).await,
            _ => PaymentOutcome::NotRequested,
        };

        Ok(CheckoutResult::new(&order, payment))
    }

    /// Active order by its public identifier
    pub async fn get_order_by_public_id(&self, public_id: &str) -> AppResult<OrderView> {
        let order = self.find_active(public_id).await?;
        Ok(OrderView::from(&order))
    }

    /// Start payment for a pending order that has not been sent to the gateway yet.
    ///
    /// Orders placed from an account can only be retried by that account or an admin;
    /// guest orders by anyone holding the public id.
    pub async fn retry_payment(
        &self,
        public_id: &str,
        phone: &str,
        requester: Option<&UserAccount>,
    ) -> AppResult<CheckoutResult> {
        let order = self.find_active(public_id).await?;

        if let Some(owner) = order.order.user_id {
            match requester {
                None => return Err(AppError::domain(DomainError::Unauthorized)),
                Some(user) if user.id != owner && !user.is_admin => {
                    warn!(
                        order_id = order.order.id,
                        user_id = user.id,
                        "Payment retry refused for another customer's order"
                    );
                    return Err(AppError::domain(DomainError::OrderNotFound {
                        reference: public_id.to_string(),
                    }));
                }
                Some(_) => {}
            }
        }

        let status = order.order.order_status();
        if status != OrderStatus::Pending {
            return Err(AppError::domain(DomainError::InvalidStatusTransition {
                from: status.to_string(),
                to: "payment".to_string(),
            }));
        }
        if order.order.mpesa_checkout_id.is_some()
            || !self
                .store
                .claim_payment_request(order.order.id, PAYMENT_CLAIM_TTL)
                .await?
        {
            return Err(AppError::domain(DomainError::PaymentAlreadyInitiated {
                reference: order.order.public_id.to_string(),
            }));
        }

        let payment = self.send_payment_request(&order.order, phone).await;

        let order = match self.find_active(public_id).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(
                    order_id = order.order.id,
                    error = %e,
                    "Could not reload order after payment request, answering from snapshot"
                );
                order
            }
        };

        Ok(CheckoutResult::new(&order, payment))
    }

    /// Admin status change, restricted to the payment state machine
    pub async fn update_status(&self, order_id: i64, target: OrderStatus) -> AppResult<OrderView> {
        let current = self
            .store
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::OrderNotFound {
                    reference: order_id.to_string(),
                })
            })?;

        let status = current.order.order_status();
        if status == target {
            return Ok(OrderView::from(&current));
        }
        if !status.can_transition_to(target) {
            return Err(AppError::domain(DomainError::InvalidStatusTransition {
                from: status.to_string(),
                to: target.to_string(),
            }));
        }

        if self.store.update_status(order_id, status, target).await?.is_none() {
            // Someone else moved the order first
            let latest = self
                .store
                .find_by_id(order_id)
                .await?
                .map(|o| o.order.order_status())
                .unwrap_or(status);
            return Err(AppError::domain(DomainError::InvalidStatusTransition {
                from: latest.to_string(),
                to: target.to_string(),
            }));
        }

        info!(order_id, from = %status, to = %target, "Order status updated by admin");

        let updated = self.store.find_by_id(order_id).await?.ok_or_else(|| {
            AppError::domain(DomainError::OrderNotFound {
                reference: order_id.to_string(),
            })
        })?;
        Ok(OrderView::from(&updated))
    }

    /// Soft delete: the order disappears from public lookups but stays in storage
    pub async fn deactivate_order(&self, order_id: i64) -> AppResult<()> {
        if !self.store.deactivate(order_id).await? {
            return Err(AppError::domain(DomainError::OrderNotFound {
                reference: order_id.to_string(),
            }));
        }
        info!(order_id, "Order deactivated");
        Ok(())
    }

    /// Regenerate the invoice PDF from the stored order snapshot
    pub async fn render_invoice(&self, public_id: &str) -> AppResult<(String, Vec<u8>)> {
        let order = self.find_active(public_id).await?;
        let document = InvoiceDocument::from_order(&order);
        let bytes = self.renderer.render(&document).map_err(|e| {
            error!(order_id = order.order.id, error = %e, "Invoice rendering failed");
            AppError::from(e)
        })?;
        Ok((invoice_file_name(&document.invoice_number), bytes))
    }

    /// Current gateway state of an STK push; customers only see their own orders
    pub async fn query_payment_status(
        &self,
        checkout_request_id: &str,
        requester: &UserAccount,
    ) -> AppResult<StkQueryResult> {
        if !requester.is_admin {
            let owned = self
                .store
                .find_by_checkout_request_id(checkout_request_id)
                .await?
                .map(|order| order.user_id == Some(requester.id))
                .unwrap_or(false);
            if !owned {
                return Err(AppError::domain(DomainError::OrderNotFound {
                    reference: checkout_request_id.to_string(),
                }));
            }
        }

        self.gateway
            .query_status(checkout_request_id)
            .await
            .map_err(AppError::from)
    }

    // ── internals ──

    async fn find_active(&self, public_id: &str) -> AppResult<OrderWithItems> {
        let not_found = || {
            AppError::domain(DomainError::OrderNotFound {
                reference: public_id.to_string(),
            })
        };

        let uuid = Uuid::parse_str(public_id.trim()).map_err(|_| not_found())?;
        self.store
            .find_by_public_id(uuid)
            .await?
            .ok_or_else(not_found)
    }

    async fn place_cart_order(&self, customer: &UserAccount) -> AppResult<OrderWithItems> {
        let order = self
            .commit_checkout(CheckoutSource::Cart { customer })
            .await?;

        info!(
            order_id = order.order.id,
            public_id = %order.order.public_id,
            invoice_number = %order.order.invoice_number,
            user_id = customer.id,
            total = %order.order.total_amount,
            items = order.items.len(),
            "✅ Order created from cart"
        );

        self.schedule_invoice(&order);
        Ok(order)
    }

    async fn place_guest(&self, request: &GuestOrderRequest) -> AppResult<OrderWithItems> {
        let email = request.customer.email.trim();
        if email.is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "customer.email".to_string(),
            }));
        }
        if !email.contains('@') {
            return Err(AppError::validation(ValidationError::InvalidField {
                field: "customer.email".to_string(),
                reason: "must be an email address".to_string(),
            }));
        }
        if request.items.is_empty() {
            return Err(AppError::validation(ValidationError::EmptyCart));
        }

        let lines = merge_guest_items(&request.items)?;
        let phone = request
            .mpesa_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let order = self
            .commit_checkout(CheckoutSource::Guest {
                contact: &request.customer,
                lines: &lines,
                phone,
            })
            .await?;

        info!(
            order_id = order.order.id,
            public_id = %order.order.public_id,
            invoice_number = %order.order.invoice_number,
            total = %order.order.total_amount,
            items = order.items.len(),
            "✅ Guest order created"
        );

        self.schedule_invoice(&order);
        Ok(order)
    }

    /// Claim a freshly committed order and ask the gateway for payment.
    ///
    /// Never fails: problems are reported in the outcome and the order stays pending.
    async fn initiate_payment(&self, order: &Order, phone: &str) -> PaymentOutcome {
        match self
            .store
            .claim_payment_request(order.id, PAYMENT_CLAIM_TTL)
            .await
        {
            Ok(true) => self.send_payment_request(order, phone).await,
            Ok(false) => {
                warn!(order_id = order.id, "Order already has a payment request in flight");
                PaymentOutcome::Failed {
                    error: already_initiated(),
                }
            }
            Err(e) => {
                error!(order_id = order.id, error = %e, "Could not reserve order for payment");
                PaymentOutcome::Failed {
                    error: PaymentEnvelope {
                        code: "PERSISTENCE_ERROR".to_string(),
                        message: "payment request could not be started".to_string(),
                        retryable: true,
                    },
                }
            }
        }
    }

    /// Send the STK push for an order this request has claimed and record the
    /// correlation id. A refused request gives the claim back.
    async fn send_payment_request(&self, order: &Order, phone: &str) -> PaymentOutcome {
        let accepted = match self
            .gateway
            .initiate_payment(phone, &order.total_amount, &order.invoice_number)
            .await
        {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(
                    order_id = order.id,
                    invoice_number = %order.invoice_number,
                    phone = %mask_phone(phone),
                    code = e.code(),
                    error = %e,
                    "Payment initiation failed, order stays pending"
                );
                if let Err(release) = self.store.release_payment_request(order.id).await {
                    warn!(
                        order_id = order.id,
                        error = %release,
                        "Payment claim not released, retry possible once it expires"
                    );
                }
                return PaymentOutcome::Failed { error: e.envelope() };
            }
        };

        match self
            .store
            .attach_checkout_request(order.id, &accepted.checkout_request_id, &accepted.phone_number)
            .await
        {
            Ok(true) => PaymentOutcome::Initiated {
                checkout_request_id: accepted.checkout_request_id,
                customer_message: accepted.customer_message,
            },
            Ok(false) => {
                error!(
                    order_id = order.id,
                    checkout_request_id = %accepted.checkout_request_id,
                    "Claimed order already had a correlation id, new request not recorded"
                );
                PaymentOutcome::Failed {
                    error: already_initiated(),
                }
            }
            Err(e) => {
                error!(
                    order_id = order.id,
                    checkout_request_id = %accepted.checkout_request_id,
                    error = %e,
                    "Payment request sent but could not be recorded"
                );
                PaymentOutcome::Failed {
                    error: PaymentEnvelope {
                        code: "PERSISTENCE_ERROR".to_string(),
                        message: "payment request was sent but could not be recorded".to_string(),
                        retryable: false,
                    },
                }
            }
        }
    }

    fn schedule_invoice(&self, order: &OrderWithItems) {
        let document = InvoiceDocument::from_order(order);
        if document.customer_email.trim().is_empty() {
            warn!(
                order_id = order.order.id,
                invoice_number = %order.order.invoice_number,
                "Order has no email address, invoice not scheduled"
            );
            return;
        }

        self.invoices.enqueue(InvoiceJob {
            order_id: order.order.id,
            recipient: document.customer_email.clone(),
            document,
        });
    }

    /// Run the checkout unit of work, retrying when the generated invoice number collides
    async fn commit_checkout(&self, source: CheckoutSource<'_>) -> AppResult<OrderWithItems> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut unit = self.store.begin().await?;

            match self.checkout_attempt(unit.as_mut(), &source).await {
                Ok(order) => {
                    unit.commit().await?;
                    return Ok(order);
                }
                Err(failure) => {
                    if let Err(e) = unit.rollback().await {
                        warn!(error = %e, "Rollback after failed checkout did not complete");
                    }
                    match failure {
                        AttemptError::InvoiceCollision(e) if attempt < MAX_INVOICE_ATTEMPTS => {
                            warn!(attempt, error = %e, "Invoice number collision, retrying");
                        }
                        AttemptError::InvoiceCollision(e) => return Err(e.into()),
                        AttemptError::Failed(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn checkout_attempt(
        &self,
        unit: &mut dyn CheckoutUnit,
        source: &CheckoutSource<'_>,
    ) -> Result<OrderWithItems, AttemptError> {
        match source {
            CheckoutSource::Cart { customer } => {
                unit.lock_customer(customer.id).await?;
                let cart = unit.cart_lines(customer.id).await?;
                if cart.is_empty() {
                    return Err(AppError::validation(ValidationError::EmptyCart).into());
                }

                let requested: Vec<(i64, i32)> =
                    cart.iter().map(|l| (l.product_id, l.quantity)).collect();
                let priced = self.price_in_unit(unit, &requested).await?;

                let contact = CustomerContact {
                    first_name: customer.full_name.clone(),
                    email: customer.email.clone(),
                    ..CustomerContact::default()
                };
                let order = self
                    .persist(unit, Some(customer.id), &contact, customer.phone.as_deref(), priced)
                    .await?;

                let line_ids: Vec<i64> = cart.iter().map(|l| l.id).collect();
                let removed = unit.remove_cart_lines(customer.id, &line_ids).await?;
                info!(user_id = customer.id, removed, "Cart cleared");
                Ok(order)
            }
            CheckoutSource::Guest {
                contact,
                lines,
                phone,
            } => {
                let priced = self.price_in_unit(unit, lines).await?;
                self.persist(unit, None, contact, *phone, priced).await
            }
        }
    }

    async fn price_in_unit(
        &self,
        unit: &mut dyn CheckoutUnit,
        requested: &[(i64, i32)],
    ) -> Result<PricedOrder, AttemptError> {
        let mut ids: Vec<i64> = requested.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids.dedup();

        let products = unit.products(&ids).await?;
        Ok(price_lines(requested, &products)?)
    }

    async fn persist(
        &self,
        unit: &mut dyn CheckoutUnit,
        user_id: Option<i64>,
        contact: &CustomerContact,
        phone: Option<&str>,
        priced: PricedOrder,
    ) -> Result<OrderWithItems, AttemptError> {
        let customer_info = serde_json::to_value(contact).map_err(|e| {
            AppError::validation(ValidationError::InvalidField {
                field: "customer".to_string(),
                reason: e.to_string(),
            })
        })?;

        let new_order = NewOrder {
            public_id: Uuid::new_v4(),
            user_id,
            total_amount: priced.total,
            invoice_number: generate_invoice_number(Utc::now()),
            customer_info,
            phone_number: phone.map(str::to_string),
        };

        let order = match unit.insert_order(&new_order).await {
            Ok(order) => order,
            Err(e) if e.is_unique_violation_on("invoice_number") => {
                return Err(AttemptError::InvoiceCollision(e))
            }
            Err(e) => return Err(e.into()),
        };

        let items = unit.insert_items(order.id, &priced.items).await?;
        Ok(OrderWithItems { order, items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn product(id: i64, price: &str, active: bool, stock: Option<i32>) -> Product {
        Product {
            id,
            name: format!("Product {}", id),
            price: BigDecimal::from_str(price).unwrap(),
            is_active: active,
            stock_quantity: stock,
        }
    }

    #[test]
    fn total_is_sum_of_current_prices() {
        let products = vec![product(1, "1500.00", true, None), product(2, "19.99", true, Some(10))];
        let priced = price_lines(&[(1, 2), (2, 3)], &products).unwrap();

        assert_eq!(format_money(&priced.total), "3059.97");
        assert_eq!(priced.items.len(), 2);
        assert_eq!(format_money(&priced.items[0].price_at_purchase), "1500.00");
    }

    #[test]
    fn unknown_product_fails_whole_order() {
        let products = vec![product(1, "10.00", true, None)];
        let err = price_lines(&[(1, 1), (999, 1)], &products).unwrap_err();

        assert!(err.is_validation());
        assert!(err.user_message().contains("999"));
    }

    #[test]
    fn inactive_product_is_rejected() {
        let products = vec![product(1, "10.00", false, None)];
        let err = price_lines(&[(1, 1)], &products).unwrap_err();
        assert!(err.user_message().contains("no longer available"));
    }

    #[test]
    fn stock_is_enforced_when_tracked() {
        let products = vec![product(1, "10.00", true, Some(2))];
        assert!(price_lines(&[(1, 2)], &products).is_ok());
        assert!(price_lines(&[(1, 3)], &products).is_err());
    }

    #[test]
    fn non_positive_quantities_are_rejected() {
        let products = vec![product(1, "10.00", true, None)];
        assert!(price_lines(&[(1, 0)], &products).is_err());
        assert!(price_lines(&[(1, -4)], &products).is_err());
    }

    #[test]
    fn empty_request_is_empty_cart() {
        let err = price_lines(&[], &[]).unwrap_err();
        assert!(err.user_message().contains("empty"));
    }

    #[test]
    fn guest_duplicates_are_merged() {
        let items = vec![
            GuestOrderItem { product_id: 5, quantity: 1 },
            GuestOrderItem { product_id: 7, quantity: 2 },
            GuestOrderItem { product_id: 5, quantity: 3 },
        ];
        assert_eq!(merge_guest_items(&items).unwrap(), vec![(5, 4), (7, 2)]);
    }

    #[test]
    fn invoice_numbers_have_date_and_random_suffix() {
        let now = DateTime::parse_from_rfc3339("2024-03-05T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let first = generate_invoice_number(now);
        let second = generate_invoice_number(now);

        assert!(first.starts_with("INV-20240305-"));
        assert_eq!(first.len(), "INV-20240305-".len() + 8);
        assert!(first[13..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(first, second);
    }

    #[test]
    fn guest_request_ignores_client_prices() {
        let request: GuestOrderRequest = serde_json::from_value(serde_json::json!({
            "customer": {"firstName": "Jane", "email": "jane@example.com"},
            "items": [{"productId": 1, "quantity": 2, "price": 0.01, "name": "Serum"}],
            "total": 0.02,
            "paymentMethod": "MPESA",
            "mpesaPhone": "0712345678"
        }))
        .unwrap();

        assert_eq!(request.items[0].product_id, 1);
        assert!(request.wants_mpesa());
    }
}
