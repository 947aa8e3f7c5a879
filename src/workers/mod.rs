pub mod invoice_delivery;
