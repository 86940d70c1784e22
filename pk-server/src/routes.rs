//! The JSON API. Routes under `/api/me` need `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, FromRef, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use base64::Engine;
use chrono::NaiveDate;
use pk::basic_models::{Ingredient, MediaRef, Recipe, RecipeDraft, UserProfile};
use pk::filter::{self, Facet, RecipeQuery};
use pk::planner::DayNote;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{Identity, UserSession};
use crate::book::{DeletionReport, RecipeBook};
use crate::calendar::Calendars;
use crate::errors::{WebError, WebResult};
use crate::mealdb::RecipeSource;
use crate::media;

#[derive(Clone)]
pub struct AppState {
    pub book: RecipeBook,
    pub identity: Identity,
    pub source: Arc<dyn RecipeSource>,
    pub calendars: Calendars,
}

impl FromRef<AppState> for Identity {
    fn from_ref(state: &AppState) -> Self {
        state.identity.clone()
    }
}

/// Recipe forms carry media as base64, a third larger than the raw bytes.
/// Room for the largest video plus the rest of the form.
pub const MAX_RECIPE_FORM_BYTES: usize = media::MAX_VIDEO_BYTES / 3 * 4 + 16_000_000;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/sign-in", post(sign_in))
        .route("/api/auth/sign-out", post(sign_out))
        .route("/api/recipes/browse", get(browse))
        .route("/api/recipes/community", get(community))
        .route("/api/recipes/facets", get(facets))
        .route("/api/me/profile", get(profile))
        .route(
            "/api/me/recipes",
            get(my_recipes)
                .post(add_recipe)
                .layer(DefaultBodyLimit::max(MAX_RECIPE_FORM_BYTES)),
        )
        .route(
            "/api/me/recipes/:recipe_id",
            put(update_recipe)
                .delete(delete_recipe)
                .layer(DefaultBodyLimit::max(MAX_RECIPE_FORM_BYTES)),
        )
        .route("/api/me/saved", get(saved_recipes).post(save_recipe))
        .route("/api/me/saved/:recipe_id", delete(unsave_recipe))
        .route("/api/me/calendar", get(calendar))
        .route(
            "/api/me/calendar/:date",
            put(set_calendar_note).delete(clear_calendar_note),
        )
        .layer(
            tower_http::compression::CompressionLayer::new()
                .quality(tower_http::CompressionLevel::Fastest),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

// Just reply that everything is okay
async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Registration {
    email: String,
    password: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
}

async fn register(
    State(state): State<AppState>,
    Json(form): Json<Registration>,
) -> WebResult<(StatusCode, Json<UserSession>)> {
    let session = state
        .identity
        .register(&form.email, &form.password, &form.first_name, &form.last_name)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

async fn sign_in(
    State(state): State<AppState>,
    Json(form): Json<Credentials>,
) -> WebResult<Json<UserSession>> {
    Ok(Json(
        state.identity.sign_in(&form.email, &form.password).await?,
    ))
}

async fn sign_out(State(state): State<AppState>, session: UserSession) -> StatusCode {
    state.identity.sign_out(&session.token);
    StatusCode::NO_CONTENT
}

async fn profile(
    State(state): State<AppState>,
    session: UserSession,
) -> WebResult<Json<UserProfile>> {
    state
        .identity
        .profile(&session.uid)
        .await?
        .map(Json)
        .ok_or(WebError::NotFound)
}

/// Recipes from the public API, narrowed by the query.
/// If the API can't be reached the list is empty rather than an error.
async fn browse(
    State(state): State<AppState>,
    Query(query): Query<RecipeQuery>,
) -> Json<Vec<Recipe>> {
    let recipes = state.source.fetch_recipes().await.unwrap_or_else(|e| {
        tracing::warn!("Recipe API unavailable: {:?}", e);
        vec![]
    });
    Json(query.apply(recipes))
}

async fn community(
    State(state): State<AppState>,
    Query(query): Query<RecipeQuery>,
) -> WebResult<Json<Vec<Recipe>>> {
    Ok(Json(query.apply(state.book.community_recipes().await?)))
}

#[derive(Debug, Serialize)]
struct Facets {
    categories: Vec<String>,
    areas: Vec<String>,
    tags: Vec<String>,
}

async fn facets(State(state): State<AppState>) -> Json<Facets> {
    let recipes = state.source.fetch_recipes().await.unwrap_or_else(|e| {
        tracing::warn!("Recipe API unavailable: {:?}", e);
        vec![]
    });
    Json(Facets {
        categories: filter::facet_values(&recipes, Facet::Category),
        areas: filter::facet_values(&recipes, Facet::Area),
        tags: filter::facet_values(&recipes, Facet::Tag),
    })
}

/// Photos and videos in a recipe form: either kept as an existing URL, or
/// new content as base64.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MediaUpload {
    Url {
        url: String,
    },
    Base64 {
        #[serde(default, rename = "contentType")]
        content_type: Option<String>,
        data: String,
    },
}

impl TryFrom<MediaUpload> for MediaRef {
    type Error = WebError;

    fn try_from(upload: MediaUpload) -> Result<Self, Self::Error> {
        Ok(match upload {
            MediaUpload::Url { url } => MediaRef::url(url),
            MediaUpload::Base64 { content_type, data } => MediaRef::bytes(
                content_type,
                base64::engine::general_purpose::STANDARD
                    .decode(data.trim())
                    .map_err(|e| WebError::BadRequest(format!("Media is not base64: {e}")))?,
            ),
        })
    }
}

/// A recipe form as submitted by the app
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecipeForm {
    name: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    area: String,
    #[serde(default)]
    instructions: String,
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    youtube: Option<String>,
    #[serde(default)]
    ingredients: Vec<Ingredient>,
    #[serde(default)]
    images: Vec<MediaUpload>,
    #[serde(default)]
    videos: Vec<MediaUpload>,
}

impl TryFrom<RecipeForm> for RecipeDraft {
    type Error = WebError;

    fn try_from(form: RecipeForm) -> Result<Self, Self::Error> {
        Ok(RecipeDraft {
            name: form.name,
            category: form.category,
            area: form.area,
            instructions: form.instructions,
            tags: form.tags,
            youtube: form.youtube,
            ingredients: form.ingredients,
            images: form
                .images
                .into_iter()
                .map(MediaRef::try_from)
                .collect::<Result<_, _>>()?,
            videos: form
                .videos
                .into_iter()
                .map(MediaRef::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

async fn my_recipes(
    State(state): State<AppState>,
    session: UserSession,
) -> WebResult<Json<Vec<Recipe>>> {
    Ok(Json(state.book.user_recipes(&session.uid).await?))
}

async fn add_recipe(
    State(state): State<AppState>,
    session: UserSession,
    Json(form): Json<RecipeForm>,
) -> WebResult<(StatusCode, Json<Recipe>)> {
    let recipe = state
        .book
        .add_recipe(&session.uid, form.try_into()?)
        .await?;
    Ok((StatusCode::CREATED, Json(recipe)))
}

async fn update_recipe(
    State(state): State<AppState>,
    session: UserSession,
    Path(recipe_id): Path<String>,
    Json(form): Json<RecipeForm>,
) -> WebResult<Json<Recipe>> {
    Ok(Json(
        state
            .book
            .update_recipe(&session.uid, &recipe_id, form.try_into()?)
            .await?,
    ))
}

async fn delete_recipe(
    State(state): State<AppState>,
    session: UserSession,
    Path(recipe_id): Path<String>,
) -> WebResult<Json<DeletionReport>> {
    Ok(Json(
        state.book.delete_recipe(&session.uid, &recipe_id).await?,
    ))
}

async fn saved_recipes(
    State(state): State<AppState>,
    session: UserSession,
) -> WebResult<Json<Vec<Recipe>>> {
    Ok(Json(state.book.saved_recipes(&session.uid).await?))
}

async fn save_recipe(
    State(state): State<AppState>,
    session: UserSession,
    Json(recipe): Json<Recipe>,
) -> WebResult<StatusCode> {
    state.book.save_recipe(&session.uid, &recipe).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unsave_recipe(
    State(state): State<AppState>,
    session: UserSession,
    Path(recipe_id): Path<String>,
) -> WebResult<Json<Value>> {
    let removed = state.book.unsave_recipe(&session.uid, &recipe_id).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Debug, Deserialize)]
struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

async fn calendar(
    State(state): State<AppState>,
    session: UserSession,
    Query(range): Query<DateRange>,
) -> Json<Vec<DayNote>> {
    Json(
        state
            .calendars
            .notes_between(&session.uid, range.from, range.to),
    )
}

#[derive(Debug, Deserialize)]
struct NoteForm {
    note: String,
}

async fn set_calendar_note(
    State(state): State<AppState>,
    session: UserSession,
    Path(date): Path<NaiveDate>,
    Json(form): Json<NoteForm>,
) -> StatusCode {
    state.calendars.set_note(&session.uid, date, &form.note);
    StatusCode::NO_CONTENT
}

async fn clear_calendar_note(
    State(state): State<AppState>,
    session: UserSession,
    Path(date): Path<NaiveDate>,
) -> StatusCode {
    match state.calendars.clear(&session.uid, date) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}
