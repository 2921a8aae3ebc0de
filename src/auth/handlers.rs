use askama::Template;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;

use crate::auth::{password, session};
use crate::db::models::{NewUser, RoleId, UserId};
use crate::error::{AppError, AppResult};
use crate::extractors::MaybeUser;
use crate::routes::home::{Html, Layout};
use crate::state::AppState;
use crate::store::IdentityStore;

/// Role given to the first account so a fresh install has an administrator.
const BOOTSTRAP_ROLE: &str = "admin";
const MIN_PASSWORD_LEN: usize = 8;

// -- Templates --

#[derive(Template)]
#[template(path = "pages/register.html")]
pub struct RegisterTemplate {
    pub layout: Layout,
    pub first_user: bool,
    pub error: String,
}

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub layout: Layout,
    pub error: String,
}

// -- Request types --

#[derive(Deserialize)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Check account fields; returns the trimmed username and email.
pub fn validate_registration(
    username: &str,
    email: &str,
    password: &str,
) -> AppResult<(String, String)> {
    let username = username.trim();
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !(3..=32).contains(&username.len()) || !valid_chars {
        return Err(AppError::BadRequest(
            "Username must be 3-32 letters, digits, '-' or '_'".into(),
        ));
    }

    let email = email.trim();
    if email.len() < 3 || !email.contains('@') {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    Ok((username.to_string(), email.to_string()))
}

/// Redirect that also sets the session cookie.
fn signed_in_redirect(state: &AppState, user_id: &UserId) -> AppResult<Response> {
    let token = session::create_session(&state.db, user_id, state.config.auth.session_hours)?;
    let cookie = session::session_cookie(
        &state.config.auth.cookie_name,
        &token,
        state.config.auth.session_hours,
    );

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/".to_string()),
            (header::SET_COOKIE, cookie),
        ],
        "",
    )
        .into_response())
}

// -- Registration handlers --

/// Registration is open when configured, and always for the very first account.
fn registration_open(state: &AppState) -> AppResult<bool> {
    let user_count = state.store().count_users()?;
    Ok(user_count == 0 || state.config.auth.allow_registration)
}

/// GET /auth/register
pub async fn register_page(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
) -> AppResult<Response> {
    if !registration_open(&state)? {
        return Err(AppError::Forbidden);
    }

    let first_user = state.store().count_users()? == 0;
    Ok(Html(RegisterTemplate {
        layout: Layout::new(&state, &maybe_user),
        first_user,
        error: String::new(),
    })
    .into_response())
}

/// POST /auth/register - create the account and sign it in
pub async fn register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> AppResult<Response> {
    if !registration_open(&state)? {
        return Err(AppError::Forbidden);
    }

    let (username, email) = validate_registration(&form.username, &form.email, &form.password)?;
    let password_hash = password::hash_password(&form.password, state.config.auth.bcrypt_cost)?;

    // The check above is advisory; the store decides atomically
    let user = state
        .store()
        .register_user(
            NewUser {
                username,
                email,
                password_hash,
                role_id: None,
            },
            state.config.auth.allow_registration,
            &RoleId::new(BOOTSTRAP_ROLE),
        )?
        .ok_or(AppError::Forbidden)?;
    tracing::info!(
        user = %user.id,
        username = %user.username,
        bootstrap_admin = user.role_id.is_some(),
        "Account registered"
    );

    signed_in_redirect(&state, &user.id)
}

// -- Login handlers --

/// GET /auth/login - render login page, or go home when already signed in
pub async fn login_page(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
) -> AppResult<Response> {
    if maybe_user.0.is_some() {
        return Ok(Redirect::to("/").into_response());
    }

    Ok(Html(LoginTemplate {
        layout: Layout::new(&state, &maybe_user),
        error: String::new(),
    })
    .into_response())
}

/// POST /auth/login - check credentials and start a session
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let user = state.store().find_user_by_username(form.username.trim())?;

    match user {
        Some(user) if password::verify_password(&form.password, &user.password_hash) => {
            tracing::info!(user = %user.id, "Signed in");
            signed_in_redirect(&state, &user.id)
        }
        _ => {
            tracing::debug!(username = %form.username.trim(), "Failed sign-in attempt");
            let page = Html(LoginTemplate {
                layout: Layout::new(&state, &MaybeUser(None)),
                error: "Invalid username or password".to_string(),
            });
            Ok((StatusCode::UNAUTHORIZED, page).into_response())
        }
    }
}

// -- Logout handler --

/// POST /auth/logout - delete session and redirect
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let cookie_name = &state.config.auth.cookie_name;

    if let Some(token) = session::cookie_value(&headers, cookie_name) {
        if let Err(e) = session::delete_session(&state.db, token) {
            tracing::warn!("Failed to delete session on logout: {}", e);
        }
    }

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/".to_string()),
            (header::SET_COOKIE, session::clear_session_cookie(cookie_name)),
        ],
        "",
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reasonable_accounts() {
        let (username, email) =
            validate_registration(" alice_1 ", " alice@example.com ", "hunter22").unwrap();
        assert_eq!(username, "alice_1");
        assert_eq!(email, "alice@example.com");
    }

    #[test]
    fn rejects_bad_usernames() {
        let too_long = "x".repeat(33);
        for name in ["al", "has space", too_long.as_str(), "semi;colon"] {
            assert!(
                validate_registration(name, "a@b.c", "password1").is_err(),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_bad_email_and_short_password() {
        assert!(validate_registration("alice", "not-an-email", "password1").is_err());
        assert!(validate_registration("alice", "a@b.c", "short").is_err());
    }
}
