use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::auth::session;
use crate::authz::Requester;
use crate::error::AppError;
use crate::state::AppState;

/// Represents the currently authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub username: String,
    requester: Requester,
}

impl CurrentUser {
    pub fn requester(&self) -> Requester {
        self.requester.clone()
    }

    pub fn is_admin(&self) -> bool {
        self.requester.is_admin()
    }
}

/// Extractor that requires authentication.
/// Returns 401 if no valid session found.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session::cookie_value(&parts.headers, &state.config.auth.cookie_name)
            .ok_or(AppError::Unauthorized)?;

        let user = session::find_session_user(&state.db, token)?.ok_or(AppError::Unauthorized)?;

        // Admin status only ever comes from the user's role
        let requester = Requester::resolve(&state.store(), Some(&user));

        Ok(CurrentUser {
            username: user.username,
            requester,
        })
    }
}

/// Optional user extractor - returns None instead of 401 when not authenticated.
pub struct MaybeUser(pub Option<CurrentUser>);

impl MaybeUser {
    pub fn requester(&self) -> Requester {
        match self.0 {
            Some(ref user) => user.requester(),
            None => Requester::Anonymous,
        }
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(AppError::Unauthorized) => Ok(MaybeUser(None)),
            Err(e) => Err(e),
        }
    }
}
