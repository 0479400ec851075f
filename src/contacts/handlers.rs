use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::extractors::AuthUser,
    contacts::{
        dto::{ContactCreate, ContactUpdateInput, Pagination, SearchQuery},
        repo_types::Contact,
        services,
    },
    error::ApiResult,
    extract::{JsonBody, PathParam, QueryParams},
    ratelimit::limit_listing,
    state::AppState,
};

const AVATAR_BODY_LIMIT: usize = 5 * 1024 * 1024;

pub fn contact_routes(state: &AppState) -> Router<AppState> {
    let listing = get(list_contacts).route_layer(middleware::from_fn_with_state(
        state.clone(),
        limit_listing,
    ));

    Router::new()
        .route("/contacts/", listing.post(create_contact))
        .route("/contacts/search/", get(search_contacts))
        .route("/contacts/birthday/", get(upcoming_birthdays))
        .route(
            "/contacts/:id",
            get(get_contact)
                .put(update_contact)
                .delete(delete_contact)
                .layer(DefaultBodyLimit::max(AVATAR_BODY_LIMIT)),
        )
}

#[instrument(skip(state, _user))]
pub async fn list_contacts(
    State(state): State<AppState>,
    _user: AuthUser,
    QueryParams(p): QueryParams<Pagination>,
) -> ApiResult<Json<Vec<Contact>>> {
    p.check()?;
    Ok(Json(services::list(&state, p.skip, p.limit).await?))
}

#[instrument(skip(state, user, payload), fields(user_id = user.0.id))]
pub async fn create_contact(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(payload): JsonBody<ContactCreate>,
) -> ApiResult<impl IntoResponse> {
    let new = payload.validate()?;
    let contact = services::create(&state, new).await?;
    let location = format!("/contacts/{}", contact.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(contact),
    ))
}

#[instrument(skip(state, _user))]
pub async fn get_contact(
    State(state): State<AppState>,
    _user: AuthUser,
    PathParam(id): PathParam<i64>,
) -> ApiResult<Json<Contact>> {
    Ok(Json(services::get(&state, id).await?))
}

#[instrument(skip(state, user, input), fields(user_id = user.0.id))]
pub async fn update_contact(
    State(state): State<AppState>,
    user: AuthUser,
    PathParam(id): PathParam<i64>,
    input: ContactUpdateInput,
) -> ApiResult<Json<Contact>> {
    let patch = input.update.validate()?;
    Ok(Json(services::update(&state, id, patch, input.avatar).await?))
}

#[instrument(skip(state, user), fields(user_id = user.0.id))]
pub async fn delete_contact(
    State(state): State<AppState>,
    user: AuthUser,
    PathParam(id): PathParam<i64>,
) -> ApiResult<Json<Contact>> {
    Ok(Json(services::delete(&state, id).await?))
}

#[instrument(skip(state, _user, q))]
pub async fn search_contacts(
    State(state): State<AppState>,
    _user: AuthUser,
    QueryParams(q): QueryParams<SearchQuery>,
) -> ApiResult<Json<Vec<Contact>>> {
    Ok(Json(services::search(&state, &q.query).await?))
}

#[instrument(skip(state, _user))]
pub async fn upcoming_birthdays(
    State(state): State<AppState>,
    _user: AuthUser,
) -> ApiResult<Json<Vec<Contact>>> {
    Ok(Json(services::upcoming_birthdays(&state).await?))
}
