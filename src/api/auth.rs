//! Bearer-token extractors backed by the user directory

use crate::api::AppState;
use crate::database::user_repository::UserAccount;
use crate::error::{AppError, DomainError};
use crate::middleware::error::get_request_id_from_headers;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap};
use tracing::warn;

/// Any authenticated account
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserAccount);

/// Authenticated account with the admin flag set
#[derive(Debug, Clone)]
pub struct AdminUser(pub UserAccount);

/// Caller's account when an Authorization header is present; a bad token is still rejected
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<UserAccount>);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn tagged(err: AppError, headers: &HeaderMap) -> AppError {
    match get_request_id_from_headers(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

async fn authenticate(parts: &Parts, state: &AppState) -> Result<UserAccount, AppError> {
    let token = bearer_token(&parts.headers)
        .ok_or_else(|| tagged(AppError::domain(DomainError::Unauthorized), &parts.headers))?;

    match state.users.find_by_token(token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => {
            warn!(path = %parts.uri.path(), "Rejected unknown or expired token");
            Err(tagged(AppError::domain(DomainError::Unauthorized), &parts.headers))
        }
        Err(e) => Err(tagged(e.into(), &parts.headers)),
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        authenticate(parts, &state).await.map(CurrentUser)
    }
}

impl<S> FromRequestParts<S> for AdminUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let user = authenticate(parts, &state).await?;
        if !user.is_admin {
            warn!(user_id = user.id, path = %parts.uri.path(), "Admin route refused");
            return Err(tagged(AppError::domain(DomainError::Forbidden), &parts.headers));
        }
        Ok(AdminUser(user))
    }
}

impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(MaybeUser(None));
        }
        let state = AppState::from_ref(state);
        authenticate(parts, &state).await.map(|user| MaybeUser(Some(user)))
    }
}
