use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::{
    state::AppState,
    types::UserId,
    utils::jwt::{verify_access_token, Claims},
};

/// Identity of the caller, inserted into request extensions by [`auth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: UserId,
    pub username: String,
}

impl TryFrom<&Claims> for AuthUser {
    type Error = StatusCode;

    fn try_from(claims: &Claims) -> Result<Self, Self::Error> {
        let id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| StatusCode::UNAUTHORIZED)?;
        Ok(Self {
            id,
            username: claims.username.clone(),
        })
    }
}

pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let (claims, user) = authenticate(auth_header, &state.config.jwt_secret)?;
    request.extensions_mut().insert(claims);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

pub fn authenticate(
    auth_header: Option<&str>,
    secret: &str,
) -> Result<(Claims, AuthUser), StatusCode> {
    let token = auth_header
        .and_then(parse_bearer_token)
        .ok_or(StatusCode::UNAUTHORIZED)?;
    authenticate_token(token, secret)
}

pub fn authenticate_token(token: &str, secret: &str) -> Result<(Claims, AuthUser), StatusCode> {
    let claims = verify_access_token(token, secret).map_err(|err| {
        tracing::debug!(error = %err, "Rejected access token");
        StatusCode::UNAUTHORIZED
    })?;
    let user = AuthUser::try_from(&claims)?;
    Ok((claims, user))
}

pub fn parse_bearer_token(header: &str) -> Option<&str> {
    if let Some(rest) = header.strip_prefix("Bearer ") {
        return Some(rest);
    }
    if let Some(rest) = header.strip_prefix("bearer ") {
        return Some(rest);
    }
    if let Some(space_idx) = header.find(' ') {
        let (scheme, rest) = header.split_at(space_idx);
        if scheme.eq_ignore_ascii_case("bearer") {
            return Some(rest.trim_start());
        }
    }
    None
}
