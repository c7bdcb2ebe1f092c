use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::config::AppConfig;
use crate::users::model::Status;

/// One failing request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{message}")]
    Forbidden {
        message: String,
        status: Option<Status>,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            status: None,
        }
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return AppError::Conflict("User with this email already exists".into());
            }
        }
        AppError::Internal(e.into())
    }
}

/// Text of an `Internal` error, carried as a response extension until
/// [`expose_internal_detail`] decides whether the client sees it.
#[derive(Debug, Clone)]
struct InternalDetail(String);

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a [FieldError]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        match &self {
            AppError::Internal(err) => {
                tracing::error!(error = ?err, status = status.as_u16(), "request failed")
            }
            other => tracing::warn!(error = %other, status = status.as_u16(), "request rejected"),
        }

        let body = ErrorBody {
            success: false,
            message: &message,
            errors: match &self {
                AppError::Validation(errors) => Some(errors.as_slice()),
                _ => None,
            },
            status: match &self {
                AppError::Forbidden { status, .. } => *status,
                _ => None,
            },
            error: None,
        };
        let mut res = (status, Json(body)).into_response();
        if let AppError::Internal(err) = &self {
            res.extensions_mut()
                .insert(InternalDetail(format!("{err:#}")));
        }
        res
    }
}

/// Response mapper that adds the `error` field to 500 bodies when the
/// configuration allows it.
pub async fn expose_internal_detail(
    State(config): State<Arc<AppConfig>>,
    mut res: Response,
) -> Response {
    let Some(InternalDetail(detail)) = res.extensions_mut().remove::<InternalDetail>() else {
        return res;
    };
    if !config.expose_internal_errors {
        return res;
    }
    let body = ErrorBody {
        success: false,
        message: "Internal server error",
        errors: None,
        status: None,
        error: Some(detail),
    };
    (res.status(), Json(body)).into_response()
}

pub type AppResult<T> = Result<T, AppError>;
