use askama::Template;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::auth::handlers::validate_registration;
use crate::auth::password;
use crate::authz::{Action, ResourceKind, RoleDirectory};
use crate::db::models::{NewUser, Role, RoleId, User, UserId};
use crate::error::{AppError, AppResult};
use crate::extractors::MaybeUser;
use crate::routes::authorize;
use crate::routes::home::{Html, Layout};
use crate::state::AppState;
use crate::store::IdentityStore;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/roles", get(list_roles).post(create_role))
        .route("/admin/roles/{id}", post(update_role))
        .route("/admin/roles/{id}/delete", post(delete_role))
        .route("/admin/users", get(list_users).post(create_user))
        .route("/admin/users/{id}/role", post(assign_role))
        .route("/admin/users/{id}/delete", post(delete_user))
}

// -- Forms --

#[derive(Deserialize)]
pub struct RoleForm {
    pub name: String,
    /// Checkbox: present only when ticked.
    #[serde(default)]
    pub admin: Option<String>,
}

impl RoleForm {
    fn validate(&self) -> AppResult<(&str, bool)> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Role name is required".into()));
        }
        Ok((name, self.admin.is_some()))
    }
}

#[derive(Deserialize)]
pub struct AssignRoleForm {
    /// Empty clears the role.
    #[serde(default)]
    pub role_id: String,
}

#[derive(Deserialize)]
pub struct NewUserForm {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role_id: String,
}

/// Role selection from a form; blank means no role.
fn parse_role_id(raw: &str) -> Option<RoleId> {
    match raw.trim() {
        "" => None,
        id => Some(RoleId::new(id)),
    }
}

// -- Views --

pub struct RoleRow {
    pub id: String,
    pub name: String,
    pub admin: bool,
}

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role_id: String,
}

#[derive(Template)]
#[template(path = "pages/admin_roles.html")]
pub struct RolesTemplate {
    pub layout: Layout,
    pub roles: Vec<RoleRow>,
}

#[derive(Template)]
#[template(path = "pages/admin_users.html")]
pub struct UsersTemplate {
    pub layout: Layout,
    pub users: Vec<UserRow>,
    pub roles: Vec<RoleRow>,
}

fn role_rows(roles: Vec<Role>) -> Vec<RoleRow> {
    roles
        .into_iter()
        .map(|r| RoleRow {
            id: r.id.0,
            name: r.name,
            admin: r.admin,
        })
        .collect()
}

fn load_role(state: &AppState, id: String) -> AppResult<Role> {
    state
        .store()
        .find_role(&RoleId::new(id))?
        .ok_or(AppError::NotFound)
}

fn load_user(state: &AppState, id: String) -> AppResult<User> {
    state
        .store()
        .find_user(&UserId::new(id))?
        .ok_or(AppError::NotFound)
}

// -- Roles --

/// GET /admin/roles
async fn list_roles(State(state): State<AppState>, maybe_user: MaybeUser) -> AppResult<Response> {
    authorize(&maybe_user.requester(), Action::Read, ResourceKind::Role)?;

    Ok(Html(RolesTemplate {
        layout: Layout::new(&state, &maybe_user),
        roles: role_rows(state.store().list_roles()?),
    })
    .into_response())
}

/// POST /admin/roles
async fn create_role(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Form(form): Form<RoleForm>,
) -> AppResult<Response> {
    authorize(&maybe_user.requester(), Action::Create, ResourceKind::Role)?;

    let (name, admin) = form.validate()?;
    let role = state.store().create_role(name, admin)?;
    tracing::info!(role = %role.id, name = %role.name, admin = role.admin, "Role created");

    Ok(Redirect::to("/admin/roles").into_response())
}

/// POST /admin/roles/{id}
async fn update_role(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<String>,
    Form(form): Form<RoleForm>,
) -> AppResult<Response> {
    let role = load_role(&state, id)?;
    authorize(&maybe_user.requester(), Action::Update, &role)?;

    let (name, admin) = form.validate()?;
    state.store().update_role(&role.id, name, admin)?;
    tracing::info!(role = %role.id, admin, "Role updated");

    Ok(Redirect::to("/admin/roles").into_response())
}

/// POST /admin/roles/{id}/delete - users holding the role lose it
async fn delete_role(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let role = load_role(&state, id)?;
    authorize(&maybe_user.requester(), Action::Delete, &role)?;

    state.store().delete_role(&role.id)?;
    tracing::info!(role = %role.id, "Role deleted");

    Ok(Redirect::to("/admin/roles").into_response())
}

// -- Users --

/// GET /admin/users
async fn list_users(State(state): State<AppState>, maybe_user: MaybeUser) -> AppResult<Response> {
    authorize(&maybe_user.requester(), Action::Read, ResourceKind::User)?;

    let store = state.store();
    let users = store
        .list_users()?
        .into_iter()
        .map(|u| UserRow {
            id: u.id.0,
            username: u.username,
            email: u.email,
            role_id: u.role_id.map(|r| r.0).unwrap_or_default(),
        })
        .collect();

    Ok(Html(UsersTemplate {
        layout: Layout::new(&state, &maybe_user),
        users,
        roles: role_rows(store.list_roles()?),
    })
    .into_response())
}

/// POST /admin/users
async fn create_user(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Form(form): Form<NewUserForm>,
) -> AppResult<Response> {
    authorize(&maybe_user.requester(), Action::Create, ResourceKind::User)?;

    let (username, email) = validate_registration(&form.username, &form.email, &form.password)?;
    let role_id = parse_role_id(&form.role_id);
    let password_hash = password::hash_password(&form.password, state.config.auth.bcrypt_cost)?;

    let user = state.store().create_user(NewUser {
        username,
        email,
        password_hash,
        role_id,
    })?;
    tracing::info!(user = %user.id, username = %user.username, "User created by admin");

    Ok(Redirect::to("/admin/users").into_response())
}

/// POST /admin/users/{id}/role
async fn assign_role(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<String>,
    Form(form): Form<AssignRoleForm>,
) -> AppResult<Response> {
    let user = load_user(&state, id)?;
    authorize(&maybe_user.requester(), Action::Update, &user)?;

    let role_id = parse_role_id(&form.role_id);
    state.store().set_user_role(&user.id, role_id.as_ref())?;
    tracing::info!(user = %user.id, role = ?role_id, "Role assignment changed");

    Ok(Redirect::to("/admin/users").into_response())
}

/// POST /admin/users/{id}/delete - refused while the user owns posts
async fn delete_user(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let user = load_user(&state, id)?;
    authorize(&maybe_user.requester(), Action::Delete, &user)?;

    state.store().delete_user(&user.id)?;
    tracing::info!(user = %user.id, "User deleted");

    Ok(Redirect::to("/admin/users").into_response())
}
