//! Beauty shop checkout backend: cart and guest orders, M-Pesa STK payments,
//! callback reconciliation and invoice delivery.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod invoice;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
