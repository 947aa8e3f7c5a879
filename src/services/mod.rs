//! Services module for business logic and integrations

pub mod cart;
pub mod notification;
pub mod order_service;
pub mod payment_callback;

pub use cart::CartService;
pub use notification::{NotificationDispatcher, NotificationError};
pub use order_service::{CheckoutResult, GuestOrderRequest, OrderAssemblyService, OrderView, PaymentOutcome};
pub use payment_callback::{CallbackAck, PaymentCallbackReconciler, ReconcileOutcome};
