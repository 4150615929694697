//! Self-service profile handlers.

use axum::extract::State;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::Json;
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::client::Client;
use crate::models::{MeResponse, ProfileUpdateRequest};
use crate::services::profile;

/// `PATCH /users/me`: update the fields the caller's role may edit.
pub async fn update_me_handler(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
    Client(client): Client,
    Json(body): Json<ProfileUpdateRequest>,
) -> AppResult<Json<MeResponse>> {
    let user = profile::update(&state, user.id, body, &client).await?;
    Ok(Json(MeResponse { user }))
}
