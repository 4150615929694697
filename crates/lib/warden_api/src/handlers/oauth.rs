//! OAuth redirect and callback handlers.

use axum::extract::{Path, Query, State};
use axum::response::Redirect;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::client::Client;
use crate::services::oauth::{self, CallbackParams, login_redirect};

/// `GET /auth/oauth/{provider}`: redirect to the provider's consent page.
pub async fn authorize_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> AppResult<Redirect> {
    let url = oauth::begin(&state, &provider)?;
    Ok(Redirect::to(&url))
}

/// `GET /auth/oauth/{provider}/callback`: complete sign-in and redirect to
/// the frontend with tokens or an error tag.
pub async fn callback_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Client(client): Client,
    Query(params): Query<CallbackParams>,
) -> AppResult<Redirect> {
    let url = oauth::complete(&state, &provider, params, &client).await?;
    Ok(Redirect::to(&url))
}

/// `GET /auth/oauth/failure`: the user cancelled at the provider.
pub async fn failure_handler(State(state): State<AppState>) -> Redirect {
    Redirect::to(&login_redirect(
        &state.config.frontend_url,
        &[("error", "auth_cancelled")],
    ))
}
