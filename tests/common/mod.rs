#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use quill::config::Config;
use quill::db;
use quill::routes;
use quill::state::AppState;

pub const COOKIE: &str = "quill_session";

/// App state over a fresh migrated database in a temp dir.
pub fn test_state() -> (TempDir, AppState) {
    let tmp = TempDir::new().unwrap();
    let pool = db::create_pool(&tmp.path().join("test.db")).expect("Failed to create test database");
    db::run_migrations(&pool).expect("Failed to run migrations");

    let mut config = Config::default();
    config.auth.bcrypt_cost = 4;
    (tmp, AppState::new(pool, config))
}

pub fn app(state: &AppState) -> Router {
    routes::app(state.clone())
}

pub async fn send(state: &AppState, request: Request<Body>) -> Response<Body> {
    app(state).oneshot(request).await.unwrap()
}

pub fn get(uri: &str, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = session {
        builder = builder.header(header::COOKIE, format!("{COOKIE}={token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_form(uri: &str, session: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::post(uri).header(
        header::CONTENT_TYPE,
        "application/x-www-form-urlencoded",
    );
    if let Some(token) = session {
        builder = builder.header(header::COOKIE, format!("{COOKIE}={token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("missing Location header")
        .to_str()
        .unwrap()
        .to_string()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Register an account and return its session token.
pub async fn register(state: &AppState, username: &str) -> String {
    let body = format!("username={username}&email={username}%40example.com&password=password1");
    let response = send(state, post_form("/auth/register", None, &body)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER, "register {username}");
    session_token(&response).expect("register should set a session cookie")
}

pub fn session_token(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            let value = cookie.split(';').next()?.strip_prefix(&format!("{COOKIE}="))?;
            (!value.is_empty()).then(|| value.to_string())
        })
}

/// Create a post through HTTP and return its id.
pub async fn create_post(state: &AppState, session: &str, title: &str) -> String {
    let body = format!("title={title}&body=Some+markdown");
    let response = send(state, post_form("/posts", Some(session), &body)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    location(&response)
        .strip_prefix("/posts/")
        .expect("redirect to the new post")
        .to_string()
}
