pub mod admin;
pub mod assets;
pub mod auth;
pub mod comments;
pub mod home;
pub mod posts;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::authz::{can_perform, Action, Requester, Target};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Assemble the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(home::index))
        .route("/api/posts", get(home::posts_json))
        .route("/assets/{*path}", get(assets::serve))
        .merge(auth::router())
        .merge(posts::router())
        .merge(comments::router())
        .merge(admin::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Enforce an authorization decision, mapping denial to 403.
pub(crate) fn authorize<'a>(
    requester: &Requester,
    action: Action,
    target: impl Into<Target<'a>>,
) -> AppResult<()> {
    let target = target.into();
    can_perform(requester, action, target).require().map_err(|denied| {
        tracing::debug!(
            requester = ?requester.user_id(),
            "Denied {} on {}",
            action,
            target.kind()
        );
        AppError::from(denied)
    })
}
