use askama::Template;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::authz::{can_perform, Action, ResourceKind};
use crate::db::models::{Post, PostId};
use crate::error::{AppError, AppResult};
use crate::extractors::MaybeUser;
use crate::routes::authorize;
use crate::routes::home::{Html, Layout};
use crate::state::AppState;
use crate::store::{ContentStore, IdentityStore};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create_post))
        .route("/posts/new", get(new_post_page))
        .route("/posts/{id}", get(show_post).post(update_post))
        .route("/posts/{id}/edit", get(edit_post_page))
        .route("/posts/{id}/delete", post(delete_post))
}

#[derive(Deserialize)]
pub struct PostForm {
    pub title: String,
    pub body: String,
}

impl PostForm {
    /// Trimmed title and body; both must be present.
    fn validate(&self) -> AppResult<(&str, &str)> {
        let title = self.title.trim();
        let body = self.body.trim();
        if title.is_empty() {
            return Err(AppError::BadRequest("Title is required".into()));
        }
        if body.is_empty() {
            return Err(AppError::BadRequest("Body is required".into()));
        }
        Ok((title, body))
    }
}

pub struct CommentView {
    pub id: String,
    pub author: String,
    pub body: String,
    pub approved: bool,
    pub created_at: String,
}

#[derive(Template)]
#[template(path = "pages/post.html")]
pub struct PostTemplate {
    pub layout: Layout,
    pub id: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub created_at: String,
    pub updated_at: String,
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_moderate: bool,
    pub comments: Vec<CommentView>,
    pub default_author: String,
}

#[derive(Template)]
#[template(path = "pages/post_form.html")]
pub struct PostFormTemplate {
    pub layout: Layout,
    pub heading: String,
    pub action: String,
    pub title: String,
    pub body: String,
}

/// Load a post or fail with 404.
pub(crate) fn load_post(state: &AppState, id: &PostId) -> AppResult<Post> {
    state.store().find_post(id)?.ok_or(AppError::NotFound)
}

/// GET /posts/new
async fn new_post_page(State(state): State<AppState>, maybe_user: MaybeUser) -> AppResult<Response> {
    let requester = maybe_user.requester();
    authorize(&requester, Action::Create, ResourceKind::Post)?;

    Ok(Html(PostFormTemplate {
        layout: Layout::new(&state, &maybe_user),
        heading: "New post".to_string(),
        action: "/posts".to_string(),
        title: String::new(),
        body: String::new(),
    })
    .into_response())
}

/// POST /posts
async fn create_post(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Form(form): Form<PostForm>,
) -> AppResult<Response> {
    let requester = maybe_user.requester();
    authorize(&requester, Action::Create, ResourceKind::Post)?;
    let owner = requester.user_id().ok_or(AppError::Unauthorized)?;

    let (title, body) = form.validate()?;
    let post = state.store().create_post(owner, title, body)?;
    tracing::info!(post = %post.id, owner = %owner, "Post created");

    Ok(Redirect::to(&format!("/posts/{}", post.id)).into_response())
}

/// GET /posts/{id}
async fn show_post(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let requester = maybe_user.requester();
    let post = load_post(&state, &PostId::new(id))?;
    authorize(&requester, Action::Read, &post)?;

    let store = state.store();
    let author = store
        .find_user(&post.user_id)?
        .map(|u| u.username)
        .unwrap_or_default();

    // Visitors only see approved comments; moderators see the queue inline
    let can_moderate = can_perform(&requester, Action::Approve, ResourceKind::Comment).is_allowed();
    let comments = store
        .list_comments(&post.id)?
        .into_iter()
        .filter(|c| c.approved || can_moderate)
        .map(|c| CommentView {
            id: c.id.0,
            author: c.author,
            body: c.body,
            approved: c.approved,
            created_at: c.created_at,
        })
        .collect();

    let default_author = match maybe_user.0 {
        Some(ref user) => user.username.clone(),
        None => String::new(),
    };

    Ok(Html(PostTemplate {
        layout: Layout::new(&state, &maybe_user),
        can_edit: can_perform(&requester, Action::Update, &post).is_allowed(),
        can_delete: can_perform(&requester, Action::Delete, &post).is_allowed(),
        can_moderate,
        id: post.id.0,
        title: post.title,
        body: post.body,
        author,
        created_at: post.created_at,
        updated_at: post.updated_at,
        comments,
        default_author,
    })
    .into_response())
}

/// GET /posts/{id}/edit
async fn edit_post_page(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let requester = maybe_user.requester();
    let post = load_post(&state, &PostId::new(id))?;
    authorize(&requester, Action::Update, &post)?;

    Ok(Html(PostFormTemplate {
        layout: Layout::new(&state, &maybe_user),
        heading: "Edit post".to_string(),
        action: format!("/posts/{}", post.id),
        title: post.title,
        body: post.body,
    })
    .into_response())
}

/// POST /posts/{id}
async fn update_post(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<String>,
    Form(form): Form<PostForm>,
) -> AppResult<Response> {
    let requester = maybe_user.requester();
    let post = load_post(&state, &PostId::new(id))?;
    authorize(&requester, Action::Update, &post)?;

    let (title, body) = form.validate()?;
    state.store().update_post(&post.id, title, body)?;
    tracing::info!(post = %post.id, "Post updated");

    Ok(Redirect::to(&format!("/posts/{}", post.id)).into_response())
}

/// POST /posts/{id}/delete
async fn delete_post(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let requester = maybe_user.requester();
    let post = load_post(&state, &PostId::new(id))?;
    authorize(&requester, Action::Delete, &post)?;

    state.store().delete_post(&post.id)?;
    tracing::info!(post = %post.id, "Post deleted");

    Ok(Redirect::to("/").into_response())
}
