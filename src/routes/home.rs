use askama::Template;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::collections::HashMap;

use crate::authz::{Action, ResourceKind};
use crate::db::models::{Post, User, UserId};
use crate::error::AppResult;
use crate::extractors::MaybeUser;
use crate::routes::authorize;
use crate::state::AppState;
use crate::store::{ContentStore, IdentityStore};

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

/// Values the shared page chrome needs.
pub struct Layout {
    pub blog_title: String,
    pub signed_in: bool,
    pub username: String,
    pub is_admin: bool,
}

impl Layout {
    pub fn new(state: &AppState, maybe_user: &MaybeUser) -> Self {
        let (signed_in, username, is_admin) = match maybe_user.0 {
            Some(ref user) => (true, user.username.clone(), user.is_admin()),
            None => (false, String::new(), false),
        };
        Self {
            blog_title: state.config.blog.title.clone(),
            signed_in,
            username,
            is_admin,
        }
    }
}

pub struct PostSummary {
    pub id: String,
    pub title: String,
    pub author: String,
    pub created_at: String,
}

#[derive(Template)]
#[template(path = "pages/index.html")]
pub struct IndexTemplate {
    pub layout: Layout,
    pub posts: Vec<PostSummary>,
}

/// Username lookup for post bylines.
pub fn usernames(users: Vec<User>) -> HashMap<UserId, String> {
    users.into_iter().map(|u| (u.id, u.username)).collect()
}

/// GET / - list posts, newest first
pub async fn index(State(state): State<AppState>, maybe_user: MaybeUser) -> AppResult<Response> {
    authorize(&maybe_user.requester(), Action::Read, ResourceKind::Post)?;

    let store = state.store();
    let authors = usernames(store.list_users()?);
    let posts = store
        .list_posts()?
        .into_iter()
        .map(|post| PostSummary {
            author: authors.get(&post.user_id).cloned().unwrap_or_default(),
            id: post.id.0,
            title: post.title,
            created_at: post.created_at,
        })
        .collect();

    Ok(Html(IndexTemplate {
        layout: Layout::new(&state, &maybe_user),
        posts,
    })
    .into_response())
}

/// GET /api/posts - the same listing as JSON
pub async fn posts_json(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
) -> AppResult<Json<Vec<Post>>> {
    authorize(&maybe_user.requester(), Action::Read, ResourceKind::Post)?;
    Ok(Json(state.store().list_posts()?))
}
