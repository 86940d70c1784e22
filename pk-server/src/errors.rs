use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::auth::AuthError;
use crate::book::BookError;

pub type WebResult<T> = std::result::Result<T, WebError>;

#[derive(thiserror::Error, Debug)]
pub enum WebError {
    #[error("Internal Server Error: {0}")]
    Internal(#[from] anyhow::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Book(#[from] BookError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found")]
    NotFound,
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebError::Auth(AuthError::NotSignedIn | AuthError::WrongCredentials) => {
                StatusCode::UNAUTHORIZED
            }
            WebError::Auth(AuthError::InvalidEmail(_) | AuthError::WeakPassword(_)) => {
                StatusCode::BAD_REQUEST
            }
            WebError::Auth(AuthError::EmailInUse(_)) => StatusCode::CONFLICT,
            WebError::Auth(AuthError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            WebError::Book(BookError::NotAuthenticated) => StatusCode::UNAUTHORIZED,
            WebError::Book(BookError::NotFound(_)) => StatusCode::NOT_FOUND,
            WebError::Book(BookError::Invalid(_) | BookError::InvalidMedia(_)) => {
                StatusCode::BAD_REQUEST
            }
            WebError::Book(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{:?}", self);
        }
        // Client errors are always explained, server errors too while this is a hobby app
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
