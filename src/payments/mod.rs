pub mod error;
pub mod mpesa;
pub mod provider;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use mpesa::MpesaClient;
pub use provider::PaymentGateway;
