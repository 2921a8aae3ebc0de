use askama::Template;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::authz::{Action, ResourceKind};
use crate::db::models::{Comment, CommentId, PostId};
use crate::error::{AppError, AppResult};
use crate::extractors::MaybeUser;
use crate::routes::authorize;
use crate::routes::home::{Html, Layout};
use crate::routes::posts::load_post;
use crate::state::AppState;
use crate::store::ContentStore;

const MAX_AUTHOR_LEN: usize = 64;
const ANONYMOUS_AUTHOR: &str = "Anonymous";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts/{id}/comments", post(create_comment))
        .route("/comments/{id}", post(update_comment))
        .route("/comments/{id}/approve", post(approve_comment))
        .route("/comments/{id}/delete", post(delete_comment))
        .route("/admin/comments", get(moderation_queue))
}

#[derive(Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    pub author: String,
    pub body: String,
}

impl CommentForm {
    /// Resolve the author label and body. A blank author falls back to the
    /// signed-in username, then to "Anonymous".
    fn validate(&self, fallback_author: Option<&str>) -> AppResult<(String, String)> {
        let body = self.body.trim();
        if body.is_empty() {
            return Err(AppError::BadRequest("Comment body is required".into()));
        }

        let author = match self.author.trim() {
            "" => fallback_author.unwrap_or(ANONYMOUS_AUTHOR),
            given => given,
        };
        if author.chars().count() > MAX_AUTHOR_LEN {
            return Err(AppError::BadRequest("Author name is too long".into()));
        }

        Ok((author.to_string(), body.to_string()))
    }
}

pub struct PendingComment {
    pub id: String,
    pub post_id: String,
    pub author: String,
    pub body: String,
    pub created_at: String,
}

#[derive(Template)]
#[template(path = "pages/admin_comments.html")]
pub struct ModerationTemplate {
    pub layout: Layout,
    pub comments: Vec<PendingComment>,
}

fn load_comment(state: &AppState, id: String) -> AppResult<Comment> {
    state
        .store()
        .find_comment(&CommentId::new(id))?
        .ok_or(AppError::NotFound)
}

/// POST /posts/{id}/comments - open to everyone, lands unapproved
async fn create_comment(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(post_id): Path<String>,
    Form(form): Form<CommentForm>,
) -> AppResult<Response> {
    let requester = maybe_user.requester();
    authorize(&requester, Action::Create, ResourceKind::Comment)?;

    let post = load_post(&state, &PostId::new(post_id))?;
    let username = maybe_user.0.as_ref().map(|u| u.username.as_str());
    let (author, body) = form.validate(username)?;

    let comment = state.store().create_comment(&post.id, &author, &body)?;
    tracing::info!(comment = %comment.id, post = %post.id, "Comment awaiting approval");

    Ok(Redirect::to(&format!("/posts/{}", post.id)).into_response())
}

/// POST /comments/{id}
async fn update_comment(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<String>,
    Form(form): Form<CommentForm>,
) -> AppResult<Response> {
    let requester = maybe_user.requester();
    let comment = load_comment(&state, id)?;
    authorize(&requester, Action::Update, &comment)?;

    let (author, body) = form.validate(Some(&comment.author))?;
    state.store().update_comment(&comment.id, &author, &body)?;

    Ok(Redirect::to(&format!("/posts/{}", comment.post_id)).into_response())
}

/// POST /comments/{id}/approve
async fn approve_comment(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let requester = maybe_user.requester();
    let comment = load_comment(&state, id)?;
    authorize(&requester, Action::Approve, &comment)?;

    state.store().approve_comment(&comment.id)?;
    tracing::info!(comment = %comment.id, "Comment approved");

    Ok(Redirect::to(&format!("/posts/{}", comment.post_id)).into_response())
}

/// POST /comments/{id}/delete
async fn delete_comment(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let requester = maybe_user.requester();
    let comment = load_comment(&state, id)?;
    authorize(&requester, Action::Delete, &comment)?;

    state.store().delete_comment(&comment.id)?;
    tracing::info!(comment = %comment.id, "Comment deleted");

    Ok(Redirect::to(&format!("/posts/{}", comment.post_id)).into_response())
}

/// GET /admin/comments - everything still waiting for approval
async fn moderation_queue(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
) -> AppResult<Response> {
    authorize(&maybe_user.requester(), Action::Approve, ResourceKind::Comment)?;

    let comments = state
        .store()
        .list_pending_comments()?
        .into_iter()
        .map(|c| PendingComment {
            id: c.id.0,
            post_id: c.post_id.0,
            author: c.author,
            body: c.body,
            created_at: c.created_at,
        })
        .collect();

    Ok(Html(ModerationTemplate {
        layout: Layout::new(&state, &maybe_user),
        comments,
    })
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(author: &str, body: &str) -> CommentForm {
        CommentForm {
            author: author.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn blank_author_falls_back_to_username_then_anonymous() {
        let (author, _) = form("  ", "hi").validate(Some("alice")).unwrap();
        assert_eq!(author, "alice");

        let (author, _) = form("", "hi").validate(None).unwrap();
        assert_eq!(author, "Anonymous");
    }

    #[test]
    fn given_author_is_kept() {
        let (author, body) = form(" Grace ", " Lovely post ").validate(None).unwrap();
        assert_eq!(author, "Grace");
        assert_eq!(body, "Lovely post");
    }

    #[test]
    fn empty_body_and_long_author_are_rejected() {
        assert!(matches!(
            form("x", "  ").validate(None),
            Err(AppError::BadRequest(_))
        ));
        let long = "a".repeat(MAX_AUTHOR_LEN + 1);
        assert!(matches!(
            form(&long, "hi").validate(None),
            Err(AppError::BadRequest(_))
        ));
    }
}
