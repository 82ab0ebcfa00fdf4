//! Conversation HTTP API.
//!
//! Every route requires an identity token; the caller only ever sees
//! conversations they take part in.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use tracing::{info, instrument};

use crate::auth::AuthUser;
use crate::server::{ApiError, AppState};
use crate::store::{ConversationView, NewConversation};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/chat/conversation",
            get(list_conversations_handler).post(create_conversation_handler),
        )
        .route(
            "/chat/conversation/:id",
            get(get_conversation_handler).patch(update_conversation_handler),
        )
        .route("/chat/user/conversation/:id/read", post(mark_read_handler))
}

/// GET /chat/conversation
#[instrument(skip(state))]
pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Json<Vec<ConversationView>> {
    Json(state.store.list_conversations(&user_id))
}

/// GET /chat/conversation/:id
#[instrument(skip(state))]
pub async fn get_conversation_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let view = state.store.get_conversation(&user_id, &conversation_id)?;
    Ok(Json(view))
}

/// POST /chat/conversation
#[instrument(skip(state, request))]
pub async fn create_conversation_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<NewConversation>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.store.create_conversation(&user_id, request)?;
    info!(conversation_id = %view.id, "Conversation created over HTTP");
    Ok((StatusCode::CREATED, Json(view)))
}

/// PATCH /chat/conversation/:id
#[instrument(skip(_state))]
pub async fn update_conversation_handler(
    State(_state): State<Arc<AppState>>,
    AuthUser(_user_id): AuthUser,
    Path(_conversation_id): Path<String>,
) -> ApiError {
    ApiError::not_implemented("Updating conversations is not supported")
}

/// POST /chat/user/conversation/:id/read
#[instrument(skip(state))]
pub async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.mark_read(&user_id, &conversation_id)?;
    Ok(StatusCode::NO_CONTENT)
}
