//! Converts any error surfacing from a REST handler into the `{code, msg,
//! path}` JSON envelope described in §7.

use axum::{
  extract::rejection::JsonRejection,
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;

use crate::error::KerfuffleError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
  pub code: u16,
  pub msg: String,
  pub path: String,
}

/// Wraps a failure with the request path it occurred on, so handlers can
/// just do `.map_err(|e| ApiError::new(&path, e))?` and return.
pub struct ApiError {
  status: StatusCode,
  body: ErrorBody,
}

impl ApiError {
  pub fn new(path: impl Into<String>, error: anyhow::Error) -> Self {
    let path = path.into();
    match error.downcast::<KerfuffleError>() {
      Ok(kind) => {
        let status =
          StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ApiError {
          status,
          body: ErrorBody {
            code: status.as_u16(),
            msg: kind.to_string(),
            path,
          },
        }
      }
      Err(other) => ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorBody {
          code: 500,
          msg: other.to_string(),
          path,
        },
      },
    }
  }

  pub fn not_found(path: impl Into<String>, what: impl Into<String>) -> Self {
    ApiError::new(path, KerfuffleError::NotFound(what.into()).into())
  }

  pub fn bad_request(path: impl Into<String>, reason: impl Into<String>) -> Self {
    ApiError::new(path, KerfuffleError::InvalidArgument(reason.into()).into())
  }

  /// Used by `/debug/force_error` to exercise this envelope on demand.
  pub fn forced(path: impl Into<String>) -> Self {
    ApiError::new(path, anyhow::anyhow!("forced error for debugging"))
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    (self.status, Json(self.body)).into_response()
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self {
    ApiError::bad_request("", rejection.to_string())
  }
}
