use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::{auth::jwt::decode_jwt, error::ApiError, model::user::User, state::AppState};

/// A person, proven by a user session token. Distinct from a device credential.
pub struct AuthenticatedUser(pub User);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::Unauthenticated("login_required".into()))?;

        let user_id = decode_jwt(bearer.token(), &state.config.jwt_secret)
            .map_err(|_| ApiError::Unauthenticated("invalid_token".into()))?;

        let user = state
            .db
            .load_user(&user_id)
            .await?
            .ok_or_else(|| ApiError::Unauthenticated("user_not_found".into()))?;

        Ok(AuthenticatedUser(user))
    }
}
