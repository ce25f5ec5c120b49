use axum::{extract::State, Json};
use uuid::Uuid;

use crate::auth::jwt::make_jwt;
use crate::auth::types::*;
use crate::auth::utils::*;
use crate::{
    error::{ApiError, ApiJson},
    model::user::User,
    state::AppState,
};

pub async fn email_register_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<EmailRegisterRequest>,
) -> Result<Json<EmailAuthResponse>, ApiError> {
    let email = normalize_email(&req.email).ok_or_else(|| ApiError::validation("email_invalid"))?;
    if req.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ApiError::validation("password_too_short"));
    }

    let hash = hash_password(&req.password)?;

    let user = User {
        id: Uuid::new_v4().to_string(),
        external_subject: format!("email:{email}"),
        email: Some(email.clone()),
        display_name: req
            .display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        created_ts: chrono::Utc::now().timestamp(),
        password_hash: Some(hash),
    };

    if !state.db.create_user(&user).await? {
        return Err(ApiError::Conflict("email_already_registered".into()));
    }

    let jwt = make_jwt(&user.id, &state.config.jwt_secret, state.config.jwt_ttl_secs)?;

    Ok(Json(EmailAuthResponse {
        jwt,
        user_id: user.id,
        email,
    }))
}

pub async fn email_login_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<EmailLoginRequest>,
) -> Result<Json<EmailAuthResponse>, ApiError> {
    let invalid = || ApiError::Unauthenticated("invalid_credentials".into());

    let email = normalize_email(&req.email).ok_or_else(invalid)?;
    let user = state
        .db
        .find_user_by_email(&email)
        .await?
        .ok_or_else(invalid)?;

    let hash = user.password_hash.as_deref().ok_or_else(invalid)?;
    if !verify_password(hash, &req.password)? {
        return Err(invalid());
    }

    let jwt = make_jwt(&user.id, &state.config.jwt_secret, state.config.jwt_ttl_secs)?;

    Ok(Json(EmailAuthResponse {
        jwt,
        user_id: user.id,
        email,
    }))
}
