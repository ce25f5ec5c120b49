pub mod email_auth;
pub mod extract;
pub mod jwt;
pub mod types;
pub mod utils;

use crate::state::AppState;
use axum::{routing::post, Router};

use crate::auth::email_auth::{email_login_handler, email_register_handler};

pub use extract::AuthenticatedUser;

/// User account routes. These issue user session tokens, not device credentials.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(email_register_handler))
        .route("/api/auth/login", post(email_login_handler))
}
