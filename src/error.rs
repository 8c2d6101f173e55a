use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Column carrying a uniqueness constraint on `users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

impl UniqueField {
    /// Maps a Postgres constraint name back to the column it guards.
    pub fn from_constraint(constraint: Option<&str>) -> Option<Self> {
        match constraint? {
            "users_username_key" => Some(UniqueField::Username),
            "users_email_key" => Some(UniqueField::Email),
            _ => None,
        }
    }
}

/// Persistence-level failures.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("user not found")]
    NotFound,
    #[error("duplicate {0:?}")]
    Conflict(UniqueField),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            // a violation of any other constraint is not a username/email clash
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                let field = UniqueField::from_constraint(db.constraint());
                match field {
                    Some(field) => RepoError::Conflict(field),
                    None => RepoError::Database(sqlx::Error::Database(db)),
                }
            }
            other => RepoError::Database(other),
        }
    }
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("User not found")]
    NotFound,
    #[error("{0}")]
    Conflict(&'static str),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorBody {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(format!("Invalid request data: {}", rejection.body_text()))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_names_map_to_fields() {
        assert_eq!(
            UniqueField::from_constraint(Some("users_username_key")),
            Some(UniqueField::Username)
        );
        assert_eq!(
            UniqueField::from_constraint(Some("users_email_key")),
            Some(UniqueField::Email)
        );
    }

    #[test]
    fn unknown_constraints_map_to_no_field() {
        assert_eq!(UniqueField::from_constraint(Some("users_pkey")), None);
        assert_eq!(UniqueField::from_constraint(Some("idx_users_email")), None);
        assert_eq!(UniqueField::from_constraint(None), None);
    }

    #[test]
    fn row_not_found_becomes_not_found() {
        assert!(matches!(
            RepoError::from(sqlx::Error::RowNotFound),
            RepoError::NotFound
        ));
    }

    #[test]
    fn other_driver_errors_stay_generic() {
        assert!(matches!(
            RepoError::from(sqlx::Error::PoolTimedOut),
            RepoError::Database(_)
        ));
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        let cases = [
            (ApiError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound, StatusCode::NOT_FOUND),
            (ApiError::Conflict("dup"), StatusCode::CONFLICT),
            (ApiError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
