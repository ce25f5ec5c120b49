use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use headers::{authorization::Bearer, Authorization, HeaderMapExt};
use tracing::{debug, warn};

use crate::{db::DBLayer, error::ApiError, model::device::Device, state::AppState};

/// Client-asserted device id. Used for legacy adoption on registration and as
/// a fallback-only signal on scoped calls.
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// The registry row a request was resolved to. Downstream code scopes every
/// query by `self.0.id` and nothing else.
#[derive(Debug, Clone)]
pub struct AuthorizedDevice(pub Device);

impl AuthorizedDevice {
    pub fn id(&self) -> &str {
        &self.0.id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("unknown device identifier")]
    UnknownDevice,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::MissingCredential => {
                ApiError::Unauthenticated("device credential required".into())
            }
            GateError::InvalidCredential => {
                ApiError::Forbidden("device credential not recognised".into())
            }
            GateError::UnknownDevice => ApiError::Forbidden("device not recognised".into()),
            GateError::Storage(err) => ApiError::Internal(err),
        }
    }
}

/// What the caller presented, before any lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerClaims {
    pub bearer: Option<String>,
    pub asserted_id: Option<String>,
}

impl CallerClaims {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let bearer = match headers.typed_get::<Authorization<Bearer>>() {
            Some(auth) => Some(auth.token().trim().to_string()),
            // A bare "Bearer" scheme is still a presented (empty) credential.
            None => headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| v.get(..6).is_some_and(|s| s.eq_ignore_ascii_case("bearer")))
                .map(|_| String::new()),
        };

        let asserted_id = headers
            .get(DEVICE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Self {
            bearer,
            asserted_id,
        }
    }
}

/// Resolve a caller to exactly one registry row.
///
/// A bearer credential always wins over an asserted id, even when the id is
/// valid. Without a credential the asserted id is accepted only if it names an
/// existing row and `allow_fallback` is set; nothing is ever created here.
pub async fn resolve_caller(
    db: &DBLayer,
    claims: &CallerClaims,
    allow_fallback: bool,
) -> Result<Device, GateError> {
    if let Some(credential) = claims.bearer.as_deref() {
        if credential.is_empty() {
            warn!(
                asserted_id = claims.asserted_id.as_deref(),
                "rejected empty bearer credential"
            );
            return Err(GateError::InvalidCredential);
        }
        return match db.find_device_by_credential(credential).await? {
            Some(device) => Ok(device),
            None => {
                warn!(
                    asserted_id = claims.asserted_id.as_deref(),
                    "rejected unknown device credential"
                );
                Err(GateError::InvalidCredential)
            }
        };
    }

    match claims.asserted_id.as_deref() {
        Some(id) if allow_fallback => match db.load_device(id).await? {
            Some(device) => {
                debug!(device_id = %device.id, "resolved device via identifier fallback");
                Ok(device)
            }
            None => Err(GateError::UnknownDevice),
        },
        _ => Err(GateError::MissingCredential),
    }
}

/// Middleware for every device-scoped route.
pub async fn require_device(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = CallerClaims::from_headers(req.headers());
    let device = resolve_caller(&state.db, &claims, state.config.allow_legacy_fallback).await?;

    req.extensions_mut().insert(AuthorizedDevice(device));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::open_temp,
        identity::resolver::{resolve_registration, Registration},
    };
    use axum::http::HeaderValue;

    async fn registered(db: &DBLayer, hw: &str) -> Device {
        let reg = Registration::validate("Phone", Some(hw), None, false).unwrap();
        resolve_registration(db, &reg).await.unwrap().device
    }

    fn claims(bearer: Option<&str>, asserted: Option<&str>) -> CallerClaims {
        CallerClaims {
            bearer: bearer.map(Into::into),
            asserted_id: asserted.map(Into::into),
        }
    }

    #[test]
    fn claims_are_read_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer tok_abc"));
        headers.insert(DEVICE_ID_HEADER, HeaderValue::from_static(" dev_1 "));

        let claims = CallerClaims::from_headers(&headers);
        assert_eq!(claims.bearer.as_deref(), Some("tok_abc"));
        assert_eq!(claims.asserted_id.as_deref(), Some("dev_1"));

        let mut basic = HeaderMap::new();
        basic.insert("authorization", HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert_eq!(CallerClaims::from_headers(&basic), CallerClaims::default());
    }

    #[tokio::test]
    async fn credential_wins_over_asserted_id() {
        let (_dir, db) = open_temp();
        let a = registered(&db, "VID-A").await;
        let b = registered(&db, "VID-B").await;

        let device = resolve_caller(&db, &claims(Some(&a.credential), Some(&b.id)), true)
            .await
            .unwrap();
        assert_eq!(device.id, a.id);
    }

    #[tokio::test]
    async fn unmatched_credential_is_forbidden_even_with_valid_id() {
        let (_dir, db) = open_temp();
        let a = registered(&db, "VID-A").await;

        let err = resolve_caller(&db, &claims(Some("tok_nope"), Some(&a.id)), true)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidCredential));
    }

    #[tokio::test]
    async fn fallback_only_matches_existing_rows() {
        let (_dir, db) = open_temp();
        let a = registered(&db, "VID-A").await;

        let device = resolve_caller(&db, &claims(None, Some(&a.id)), true)
            .await
            .unwrap();
        assert_eq!(device.id, a.id);

        let err = resolve_caller(&db, &claims(None, Some("dev_unknown")), true)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::UnknownDevice));
        assert!(db.load_device("dev_unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_bearer_does_not_fall_back_to_asserted_id() {
        let (_dir, db) = open_temp();
        let a = registered(&db, "VID-A").await;

        for raw in ["Bearer ", "Bearer", "bearer    "] {
            let mut headers = HeaderMap::new();
            headers.insert("authorization", HeaderValue::from_static(raw));
            headers.insert(DEVICE_ID_HEADER, HeaderValue::from_str(&a.id).unwrap());

            let claims = CallerClaims::from_headers(&headers);
            assert_eq!(claims.bearer.as_deref(), Some(""), "{raw:?}");

            let err = resolve_caller(&db, &claims, true).await.unwrap_err();
            assert!(matches!(err, GateError::InvalidCredential), "{raw:?}");
        }
    }

    #[tokio::test]
    async fn nothing_presented_is_unauthenticated() {
        let (_dir, db) = open_temp();
        let err = resolve_caller(&db, &claims(None, None), true).await.unwrap_err();
        assert!(matches!(err, GateError::MissingCredential));
    }

    #[tokio::test]
    async fn disabled_fallback_requires_credential() {
        let (_dir, db) = open_temp();
        let a = registered(&db, "VID-A").await;
        let err = resolve_caller(&db, &claims(None, Some(&a.id)), false)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::MissingCredential));
    }
}
