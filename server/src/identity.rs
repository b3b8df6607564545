// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::handlers::AppError;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use streak_common::RejectReason;

/// Header carrying the already-verified caller id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The verified user making the request. Token checks happen upstream;
/// this only reads the id they produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                AppError::new(
                    StatusCode::UNAUTHORIZED,
                    RejectReason::NotAuthorized,
                    "Missing caller identity.",
                )
            })?;

        Ok(Self(user_id.to_string()))
    }
}
