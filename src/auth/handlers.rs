use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            check_password, normalize_email, AccessToken, LoginForm, Message, NewPasswordForm,
            PublicUser, RefreshRequest, RegisterRequest, ResetRequestForm, TokenPair, TOKEN_TYPE,
        },
        services,
    },
    error::{ApiError, ApiResult},
    extract::{FormBody, JsonBody, PathParam},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/users/", post(register))
        .route("/token/", post(login))
        .route("/refresh/", post(refresh))
        .route("/verify/:token", get(verify_email))
        .route("/reset-password/", post(request_reset))
        .route("/reset-password/:token/", post(complete_reset))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> ApiResult<Json<PublicUser>> {
    let email = normalize_email(&payload.email)?;
    check_password(&payload.password)?;
    let user = services::register(&state, &email, &payload.password).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, form))]
pub async fn login(
    State(state): State<AppState>,
    FormBody(form): FormBody<LoginForm>,
) -> ApiResult<Json<TokenPair>> {
    // a username that is not an email can only be a bad credential
    let email = normalize_email(&form.username)
        .map_err(|_| ApiError::Unauthorized("Incorrect email or password"))?;
    let pair = services::login(&state, &email, &form.password).await?;
    Ok(Json(pair))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RefreshRequest>,
) -> ApiResult<Json<AccessToken>> {
    let access_token = services::refresh(&state, &payload.token)?;
    Ok(Json(AccessToken {
        access_token,
        token_type: TOKEN_TYPE.into(),
    }))
}

#[instrument(skip(state, token))]
pub async fn verify_email(
    State(state): State<AppState>,
    PathParam(token): PathParam<String>,
) -> ApiResult<Json<Message>> {
    services::verify_email(&state, &token).await?;
    Ok(Json(Message::new("Email verified successfully")))
}

#[instrument(skip(state, form))]
pub async fn request_reset(
    State(state): State<AppState>,
    FormBody(form): FormBody<ResetRequestForm>,
) -> ApiResult<Json<Message>> {
    let email = normalize_email(&form.email)?;
    services::request_password_reset(&state, &email).await?;
    Ok(Json(Message::new("Password reset email sent successfully")))
}

#[instrument(skip(state, token, form))]
pub async fn complete_reset(
    State(state): State<AppState>,
    PathParam(token): PathParam<String>,
    FormBody(form): FormBody<NewPasswordForm>,
) -> ApiResult<Json<Message>> {
    check_password(&form.new_password)?;
    services::complete_reset(&state, &token, &form.new_password).await?;
    Ok(Json(Message::new("Password updated successfully")))
}
