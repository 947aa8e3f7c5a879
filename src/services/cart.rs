use crate::database::catalog_repository::CatalogStore;
use crate::database::models::CartLine;
use crate::error::{AppError, AppResult, ValidationError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct AddToCartRequest {
    #[serde(alias = "productId")]
    pub product_id: i64,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// Cart maintenance ahead of checkout
pub struct CartService {
    catalog: Arc<dyn CatalogStore>,
}

impl CartService {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    /// Add a product, merging with an existing line for the same product
    pub async fn add_to_cart(&self, user_id: i64, request: &AddToCartRequest) -> AppResult<CartLine> {
        let product_id = request.product_id;
        if request.quantity <= 0 {
            return Err(AppError::validation(ValidationError::InvalidQuantity {
                product_id,
                quantity: request.quantity,
            }));
        }

        let product = self
            .catalog
            .get_product(product_id)
            .await?
            .ok_or_else(|| AppError::validation(ValidationError::UnknownProduct { product_id }))?;

        if !product.is_active {
            return Err(AppError::validation(ValidationError::InactiveProduct {
                product_id,
                name: product.name,
            }));
        }

        if let Some(available) = product.stock_quantity {
            let in_cart = self
                .catalog
                .cart_for_user(user_id)
                .await?
                .into_iter()
                .find(|line| line.product_id == product_id)
                .map(|line| line.quantity)
                .unwrap_or(0);
            let requested = in_cart.saturating_add(request.quantity);
            if requested > available {
                return Err(AppError::validation(ValidationError::InsufficientStock {
                    product_id,
                    name: product.name,
                    requested,
                    available,
                }));
            }
        }

        let line = self
            .catalog
            .add_to_cart(user_id, product_id, request.quantity)
            .await?;
        info!(user_id, product_id, quantity = line.quantity, "Cart updated");
        Ok(line)
    }

    pub async fn cart(&self, user_id: i64) -> AppResult<Vec<CartLine>> {
        Ok(self.catalog.cart_for_user(user_id).await?)
    }
}
