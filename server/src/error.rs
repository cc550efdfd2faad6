use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

/// Client-visible failure of a tool request.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// The request itself is unusable; nothing was run.
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Program execution timed out")]
    TimedOut,
    #[error("Program execution failed with error {code}")]
    Failed { code: i32 },
    #[error("{tool} generated 0 or several output files ({found} found)")]
    OutputCardinality { tool: &'static str, found: usize },
    #[error("{tool} reported success but did not produce {output}")]
    MissingOutput { tool: &'static str, output: String },
    #[error("{0}")]
    Internal(#[source] joblib::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::TimedOut => StatusCode::REQUEST_TIMEOUT,
            ApiError::Failed { .. }
            | ApiError::OutputCardinality { .. }
            | ApiError::MissingOutput { .. }
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<joblib::Error> for ApiError {
    fn from(err: joblib::Error) -> Self {
        match err {
            // only upload names reach the sanitizer, so this is the client's doing
            joblib::Error::InvalidName(name) => {
                ApiError::InvalidRequest(format!("Invalid file name {:?}", name))
            }
            err => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, error = %self, "request failed");
        } else {
            warn!(%status, error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_map_to_distinct_statuses() {
        assert_eq!(
            ApiError::InvalidRequest("Missing file parameter".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError::TimedOut.status(), StatusCode::REQUEST_TIMEOUT);
        let failed = ApiError::Failed { code: 3 };
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failed.to_string(), "Program execution failed with error 3");
    }

    #[test]
    fn bad_upload_names_are_client_errors() {
        let err = ApiError::from(joblib::Error::InvalidName("..".into()));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let err = ApiError::from(joblib::Error::WorkerLost);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
