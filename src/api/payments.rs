use crate::api::auth::CurrentUser;
use crate::api::{tag_error, AppState};
use crate::error::AppError;
use crate::services::payment_callback::{CallbackAck, CallbackError, ReconcileOutcome};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

/// POST /payments/callback
///
/// Always answers 200; the gateway does not retry and treats any other status as a
/// delivery failure.
pub async fn mpesa_callback(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    info!(bytes = body.len(), "Received M-Pesa callback");

    let ack = match state.callbacks.process(&body).await {
        Ok(ReconcileOutcome::Orphan) => CallbackAck::accepted(),
        Ok(outcome) => {
            info!(outcome = ?outcome, "M-Pesa callback processed");
            CallbackAck::accepted()
        }
        Err(CallbackError::Parse(e)) => {
            warn!(error = %e, "Malformed M-Pesa callback");
            CallbackAck::rejected("Malformed callback")
        }
        Err(CallbackError::Database(e)) => {
            error!(error = %e, "M-Pesa callback could not be applied");
            CallbackAck::rejected("Temporary processing failure")
        }
    };

    (StatusCode::OK, Json(ack))
}

/// GET /payments/status/{checkoutRequestId}
pub async fn payment_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    Path(checkout_request_id): Path<String>,
) -> Result<Response, AppError> {
    let result = state
        .orders
        .query_payment_status(&checkout_request_id, &user)
        .await
        .map_err(tag_error(&headers))?;

    Ok(Json(result).into_response())
}
