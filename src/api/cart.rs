use crate::api::auth::CurrentUser;
use crate::api::{tag_error, AppState};
use crate::error::AppError;
use crate::services::cart::AddToCartRequest;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

/// GET /cart
pub async fn get_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    let lines = state.carts.cart(user.id).await.map_err(tag_error(&headers))?;
    Ok(Json(lines).into_response())
}

/// POST /cart
pub async fn add_to_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<AddToCartRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let tag = tag_error(&headers);
    let Json(request) = payload.map_err(|e| tag(e.into()))?;

    let line = state
        .carts
        .add_to_cart(user.id, &request)
        .await
        .map_err(&tag)?;

    Ok((StatusCode::CREATED, Json(line)).into_response())
}
