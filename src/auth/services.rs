//! Account workflow: registration, login, verification and password reset.

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::{
        dto::{TokenPair, TOKEN_TYPE},
        jwt::TokenKind,
        password::{hash_password_blocking, verify_password_blocking},
        repo_types::User,
    },
    error::{ApiError, ApiResult},
    mail::{password_reset_email, verification_email},
    state::AppState,
};

/// Read-through lookup: cache first, then the store. The store result is
/// only cached if nothing invalidated the email while it was being read.
pub async fn find_user(state: &AppState, email: &str) -> ApiResult<Option<User>> {
    let Some(cache) = &state.cache else {
        return Ok(state.users.find_by_email(email).await.context("find user")?);
    };
    if let Some(user) = cache.get(email).await.context("session cache get")? {
        return Ok(Some(user));
    }

    let ticket = cache.ticket(email).await.context("session cache ticket")?;
    let user = state.users.find_by_email(email).await.context("find user")?;
    if let Some(user) = &user {
        if !cache.fill(user, ticket).await.context("session cache fill")? {
            debug!("user changed during lookup; not cached");
        }
    }
    Ok(user)
}

/// Drop the cached copy after the stored record changed.
async fn forget_user(state: &AppState, email: &str) -> ApiResult<()> {
    if let Some(cache) = &state.cache {
        cache
            .invalidate(email)
            .await
            .context("session cache invalidate")?;
    }
    Ok(())
}

/// Email and password must already be validated.
#[instrument(skip(state, password))]
pub async fn register(state: &AppState, email: &str, password: &str) -> ApiResult<User> {
    if state.users.find_by_email(email).await?.is_some() {
        warn!("email already registered");
        return Err(ApiError::Conflict("User already registered"));
    }

    let hash = hash_password_blocking(password.to_string())
        .await
        .map_err(ApiError::Internal)?;

    // A concurrent registration can still win between the check and here.
    let user = state
        .users
        .create(email, &hash)
        .await?
        .ok_or(ApiError::Conflict("User already registered"))?;

    match state.jwt.sign_verification(&user.email) {
        Ok(token) => state.mail.enqueue(verification_email(
            &state.config.mail.app_base_url,
            &user.email,
            &token,
        )),
        Err(e) => warn!(error = %e, "verification token not issued; email skipped"),
    }

    info!(user_id = user.id, "user registered");
    Ok(user)
}

/// Credentials are always checked against the stored record, never the cache.
#[instrument(skip(state, password))]
pub async fn login(state: &AppState, email: &str, password: &str) -> ApiResult<TokenPair> {
    let user = match state.users.find_by_email(email).await.context("find user")? {
        Some(u) if u.is_active => u,
        _ => {
            warn!("login for unknown or inactive email");
            return Err(ApiError::Unauthorized("Incorrect email or password"));
        }
    };

    let ok = verify_password_blocking(password.to_string(), user.password_hash.clone())
        .await
        .map_err(ApiError::Internal)?;
    if !ok {
        warn!(user_id = user.id, "login invalid password");
        return Err(ApiError::Unauthorized("Incorrect email or password"));
    }

    let access_token = state.jwt.sign_access(&user.email).map_err(ApiError::Internal)?;
    let refresh_token = state.jwt.sign_refresh(&user.email).map_err(ApiError::Internal)?;

    info!(user_id = user.id, "user logged in");
    Ok(TokenPair {
        access_token,
        refresh_token,
        token_type: TOKEN_TYPE.into(),
    })
}

pub fn refresh(state: &AppState, token: &str) -> ApiResult<String> {
    state.jwt.refresh(token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        ApiError::Unauthorized("Invalid access token")
    })
}

/// Idempotent: a still-valid token can be redeemed again.
#[instrument(skip_all)]
pub async fn verify_email(state: &AppState, token: &str) -> ApiResult<()> {
    let email = state
        .jwt
        .verify_kind(token, TokenKind::Verification)
        .map_err(|e| {
            warn!(error = %e, "verification token rejected");
            ApiError::Unauthorized("Invalid verification token")
        })?;

    if !state.users.set_verified(&email).await? {
        return Err(ApiError::NotFound("User not found"));
    }
    forget_user(state, &email).await?;
    info!("email verified");
    Ok(())
}

/// The reset token only ever leaves through email.
#[instrument(skip(state))]
pub async fn request_password_reset(state: &AppState, email: &str) -> ApiResult<()> {
    let user = find_user(state, email)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;

    let token = state.jwt.sign_reset(&user.email).map_err(ApiError::Internal)?;
    state.mail.enqueue(password_reset_email(
        &state.config.mail.app_base_url,
        &user.email,
        &token,
    ));
    info!(user_id = user.id, "password reset requested");
    Ok(())
}

#[instrument(skip_all)]
pub async fn complete_reset(state: &AppState, token: &str, new_password: &str) -> ApiResult<()> {
    let email = state.jwt.verify_kind(token, TokenKind::Reset).map_err(|e| {
        warn!(error = %e, "reset token rejected");
        ApiError::Unauthorized("Invalid reset token")
    })?;

    let hash = hash_password_blocking(new_password.to_string())
        .await
        .map_err(ApiError::Internal)?;
    if !state.users.set_password(&email, &hash).await? {
        return Err(ApiError::NotFound("User not found"));
    }
    forget_user(state, &email).await?;
    info!("password updated");
    Ok(())
}
