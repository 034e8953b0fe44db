// Cookie authentication
//
// A signed HS256 bearer in the `access_token` HTTP-only cookie, backed by a
// server-side `token:{jwt}` record so tokens can be revoked by deletion. A
// request is authenticated only when both the signature AND the store record
// agree on the user id.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use promptq_core::ApiSettings;
use promptq_store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// App state for auth routes and the renewal middleware
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub settings: Arc<ApiSettings>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// Explicit authentication result - no exceptions-as-control-flow.
pub enum AuthOutcome {
    Ok(String),
    /// No cookie, or a cookie that fails signature validation.
    Unauthenticated,
    /// Valid signature but no matching store record: revoked or expired
    /// server-side.
    Revoked,
}

fn algorithm(settings: &ApiSettings) -> jsonwebtoken::Algorithm {
    settings
        .jwt_algorithm
        .parse()
        .unwrap_or(jsonwebtoken::Algorithm::HS256)
}

/// Mint a signed bearer for a user id.
pub fn create_access_token(
    user_id: &str,
    settings: &ApiSettings,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expire = Utc::now() + Duration::days(settings.access_token_expire_days);
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expire.timestamp(),
    };
    encode(
        &Header::new(algorithm(settings)),
        &claims,
        &EncodingKey::from_secret(settings.secret_key.as_bytes()),
    )
}

fn decode_token(token: &str, settings: &ApiSettings) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.secret_key.as_bytes()),
        &Validation::new(algorithm(settings)),
    )
    .map(|data| data.claims)
    .ok()
}

fn token_ttl_secs(settings: &ApiSettings) -> u64 {
    settings.access_token_expire_days.max(0) as u64 * 24 * 3600
}

/// Resolve the caller from the cookie jar.
pub async fn authenticate(jar: &CookieJar, store: &Store, settings: &ApiSettings) -> AuthOutcome {
    let Some(cookie) = jar.get(ACCESS_TOKEN_COOKIE) else {
        return AuthOutcome::Unauthenticated;
    };
    let token = cookie.value();
    let Some(claims) = decode_token(token, settings) else {
        return AuthOutcome::Unauthenticated;
    };
    match store.get_token_user(token).await {
        Ok(Some(user_id)) if user_id == claims.sub => AuthOutcome::Ok(user_id),
        _ => AuthOutcome::Revoked,
    }
}

/// Boundary helper for handlers: authenticated user id or 401.
pub async fn current_user(
    jar: &CookieJar,
    store: &Store,
    settings: &ApiSettings,
) -> Result<String, StatusCode> {
    match authenticate(jar, store, settings).await {
        AuthOutcome::Ok(user_id) => Ok(user_id),
        AuthOutcome::Unauthenticated | AuthOutcome::Revoked => Err(StatusCode::UNAUTHORIZED),
    }
}

/// GET / - cookie bootstrap.
///
/// A valid caller gets a plain 200; anyone else becomes a fresh guest user
/// with a 90-day cookie and is bounced back to `/` so the frontend reloads
/// with the cookie attached.
pub async fn root(State(state): State<AppState>, jar: CookieJar) -> Response {
    if let AuthOutcome::Ok(_) = authenticate(&jar, &state.store, &state.settings).await {
        return StatusCode::OK.into_response();
    }

    let user_id = Uuid::new_v4().to_string();
    let token = match create_access_token(&user_id, &state.settings) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create access token");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Err(e) = state
        .store
        .put_token(&token, &user_id, token_ttl_secs(&state.settings))
        .await
    {
        tracing::error!(error = %e, "Failed to store access token");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    tracing::info!(user_id = %user_id, "Guest user created");

    let cookie = Cookie::build((ACCESS_TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(false)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(state.settings.access_token_expire_days));

    (
        StatusCode::SEE_OTHER,
        jar.add(cookie),
        [(header::LOCATION, "/")],
    )
        .into_response()
}

/// Sliding renewal: any request carrying a valid, non-revoked token pushes
/// its server-side expiry out to the full window again.
pub async fn renew_token_layer(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(ACCESS_TOKEN_COOKIE) {
        let token = cookie.value().to_string();
        if let Some(claims) = decode_token(&token, &state.settings) {
            let stored = state.store.get_token_user(&token).await;
            if matches!(stored, Ok(Some(ref user_id)) if *user_id == claims.sub) {
                if let Err(e) = state
                    .store
                    .renew_token(&token, token_ttl_secs(&state.settings))
                    .await
                {
                    tracing::warn!(error = %e, "Token renewal failed");
                }
            }
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ApiSettings {
        serde_yaml::from_str("SECRET_KEY: unit-test-secret\n").unwrap()
    }

    #[test]
    fn token_round_trips_for_its_user() {
        let settings = settings();
        let token = create_access_token("user-7", &settings).unwrap();
        let claims = decode_token(&token, &settings).expect("token should validate");
        assert_eq!(claims.sub, "user-7");
    }

    #[test]
    fn token_fails_with_wrong_secret() {
        let settings = settings();
        let token = create_access_token("user-7", &settings).unwrap();

        let other: ApiSettings = serde_yaml::from_str("SECRET_KEY: different\n").unwrap();
        assert!(decode_token(&token, &other).is_none());
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert!(decode_token("not-a-jwt", &settings()).is_none());
    }
}
