//! services/api/src/web/middleware.rs
//!
//! Caller identification for protected routes.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use proscientia_core::domain::UserId;

pub const USER_HEADER: &str = "x-user-id";

/// The user a request acts for, as placed in the request extensions by `require_user`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub UserId);

/// Middleware that reads the caller's user id from the `x-user-id` header.
///
/// Identity is asserted by the fronting layer; nothing here verifies it.
/// A missing or malformed header yields 401 Unauthorized.
pub async fn require_user(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let caller = parse_caller(req.headers().get(USER_HEADER).and_then(|v| v.to_str().ok()))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

fn parse_caller(raw: Option<&str>) -> Option<CallerId> {
    raw?.trim().parse::<UserId>().ok().map(CallerId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_must_hold_a_numeric_id() {
        assert_eq!(parse_caller(Some(" 3 ")), Some(CallerId(3)));
        assert_eq!(parse_caller(Some("alice")), None);
        assert_eq!(parse_caller(None), None);
    }
}
