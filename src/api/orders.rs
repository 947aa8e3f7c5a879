use crate::api::auth::{AdminUser, CurrentUser, MaybeUser};
use crate::api::{tag_error, AppState};
use crate::database::models::OrderStatus;
use crate::error::{AppError, AppResult, ValidationError};
use crate::services::order_service::GuestOrderRequest;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct CartCheckoutRequest {
    #[serde(default, alias = "mpesaPhone")]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRetryRequest {
    #[serde(alias = "mpesaPhone")]
    pub phone: String,
}

/// Empty body means "no options"
fn optional_json<T: serde::de::DeserializeOwned + Default>(body: &Bytes) -> AppResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        AppError::validation(ValidationError::InvalidField {
            field: "body".to_string(),
            reason: e.to_string(),
        })
    })
}

fn parse_internal_id(raw: &str) -> AppResult<i64> {
    raw.trim().parse::<i64>().map_err(|_| {
        AppError::validation(ValidationError::InvalidField {
            field: "id".to_string(),
            reason: "must be a numeric order id".to_string(),
        })
    })
}

/// POST /orders/from-cart
pub async fn create_order_from_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    CurrentUser(user): CurrentUser,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: CartCheckoutRequest = optional_json(&body).map_err(tag_error(&headers))?;

    let result = state
        .orders
        .checkout(&user, request.phone.as_deref())
        .await
        .map_err(tag_error(&headers))?;

    Ok((StatusCode::CREATED, Json(result)).into_response())
}

/// POST /orders
pub async fn create_guest_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<GuestOrderRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|e| tag_error(&headers)(e.into()))?;

    let result = state
        .orders
        .place_guest_order(&request)
        .await
        .map_err(tag_error(&headers))?;

    Ok((StatusCode::CREATED, Json(result)).into_response())
}

/// GET /orders/{publicId}
pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(public_id): Path<String>,
) -> Result<Response, AppError> {
    let order = state
        .orders
        .get_order_by_public_id(&public_id)
        .await
        .map_err(tag_error(&headers))?;

    Ok(Json(order).into_response())
}

/// POST /orders/{internalId}/status
pub async fn update_order_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    AdminUser(admin): AdminUser,
    Path(order_id): Path<String>,
    payload: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let tag = tag_error(&headers);
    let order_id = parse_internal_id(&order_id).map_err(&tag)?;
    let Json(request) = payload.map_err(|e| tag(e.into()))?;

    let target: OrderStatus = request.status.parse().map_err(|_| {
        tag(AppError::validation(ValidationError::InvalidField {
            field: "status".to_string(),
            reason: format!("unknown status '{}'", request.status),
        }))
    })?;

    info!(admin_id = admin.id, order_id, status = %target, "Admin status change requested");

    let order = state
        .orders
        .update_status(order_id, target)
        .await
        .map_err(&tag)?;

    Ok(Json(order).into_response())
}

/// DELETE /orders/{internalId}
pub async fn deactivate_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    AdminUser(admin): AdminUser,
    Path(order_id): Path<String>,
) -> Result<Response, AppError> {
    let tag = tag_error(&headers);
    let order_id = parse_internal_id(&order_id).map_err(&tag)?;

    state.orders.deactivate_order(order_id).await.map_err(&tag)?;
    info!(admin_id = admin.id, order_id, "Order deactivated by admin");

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST /orders/{publicId}/payment
///
/// Account orders need the owner's token; guest orders only the public id.
pub async fn retry_payment(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    headers: HeaderMap,
    Path(public_id): Path<String>,
    payload: Result<Json<PaymentRetryRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let tag = tag_error(&headers);
    let Json(request) = payload.map_err(|e| tag(e.into()))?;

    let result = state
        .orders
        .retry_payment(&public_id, &request.phone, user.as_ref())
        .await
        .map_err(&tag)?;

    Ok(Json(result).into_response())
}

/// GET /orders/{publicId}/invoice
pub async fn download_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(public_id): Path<String>,
) -> Result<Response, AppError> {
    let (file_name, bytes) = state
        .orders
        .render_invoice(&public_id)
        .await
        .map_err(tag_error(&headers))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response())
}
