//! Request-level errors and their HTTP renderings.
//!
//! The same [`AppError`] is rendered as JSON for `/api/*` routes through
//! [`ApiError`] and as an HTML page for browser routes through [`PageError`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::model::ClassifierError;
use crate::pages;
use crate::upload::UploadError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The request carried no `file` field at all.
    #[error("no file field in request")]
    MissingFile,

    #[error("malformed multipart body: {0}")]
    Multipart(String),

    /// The request body went over the configured upload limit.
    #[error("upload exceeds body limit: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for mistakes the uploader can fix by sending a different file.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AppError::MissingFile
                | AppError::Multipart(_)
                | AppError::PayloadTooLarge(_)
                | AppError::Upload(UploadError::InvalidFile(_))
        )
    }

    fn log(&self) {
        if self.is_user_error() || matches!(self, AppError::NotFound(_)) {
            tracing::debug!(error = %self, "request rejected");
        } else {
            tracing::error!(error = %self, "request failed");
        }
    }
}

/// `?` conversions from the module errors into a rendering wrapper.
macro_rules! wrap_app_error {
    ($wrapper:ident) => {
        impl From<AppError> for $wrapper {
            fn from(err: AppError) -> Self {
                $wrapper(err)
            }
        }

        impl From<UploadError> for $wrapper {
            fn from(err: UploadError) -> Self {
                $wrapper(err.into())
            }
        }

        impl From<ClassifierError> for $wrapper {
            fn from(err: ClassifierError) -> Self {
                $wrapper(err.into())
            }
        }
    };
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// JSON rendering: `{"error": "..."}` with 400 for client mistakes, 413 over
/// the body limit and 500 for everything else. Internal details never reach the client.
#[derive(Debug)]
pub struct ApiError(pub AppError);

wrap_app_error!(ApiError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        err.log();

        let (status, message) = match &err {
            AppError::MissingFile => (StatusCode::BAD_REQUEST, "No file provided"),
            AppError::Upload(UploadError::InvalidFile(_)) => {
                (StatusCode::BAD_REQUEST, "Invalid file")
            }
            AppError::Multipart(_) => (StatusCode::BAD_REQUEST, "Malformed upload"),
            AppError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "File too large"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found"),
            AppError::Upload(UploadError::Storage(_))
            | AppError::Classifier(_)
            | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Classification failed")
            }
        };

        (
            status,
            Json(ErrorBody {
                error: message.to_string(),
            }),
        )
            .into_response()
    }
}

/// HTML rendering: the 404 page for `NotFound`, the generic 500 page otherwise.
#[derive(Debug)]
pub struct PageError(pub AppError);

wrap_app_error!(PageError);

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let err = self.0;
        err.log();

        match err {
            AppError::NotFound(_) => not_found_page(),
            _ => internal_error_page(),
        }
    }
}

pub fn not_found_page() -> Response {
    (StatusCode::NOT_FOUND, pages::not_found()).into_response()
}

pub fn internal_error_page() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, pages::internal_error()).into_response()
}
