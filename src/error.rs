use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Geo query failed: {0}")]
    GeoQueryFailed(String),

    #[error("Mutation failed: {0}")]
    MutationFailed(String),

    #[error("Location permission denied: {0}")]
    PermissionDenied(String),

    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Whether a manual retry from the UI has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::GeoQueryFailed(_)
            | AppError::MutationFailed(_)
            | AppError::SubscriptionError(_)
            | AppError::Request(_) => true,
            AppError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Message shown to the user for failures that reach the screen.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::PermissionDenied(_) => "Location access is required to show nearby posts",
            AppError::Authentication(_) => "Please sign in again",
            AppError::Validation(_) => "Invalid input",
            _ => "Error fetching data",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::GeoQueryFailed("timeout".into()).is_retryable());
        assert!(AppError::Http {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!AppError::Http {
            status: 404,
            message: "missing".into()
        }
        .is_retryable());
        assert!(!AppError::PermissionDenied("denied".into()).is_retryable());
        assert!(!AppError::Validation("radius".into()).is_retryable());
    }

    #[test]
    fn test_user_message() {
        assert_eq!(
            AppError::GeoQueryFailed("boom".into()).user_message(),
            "Error fetching data"
        );
        assert_eq!(
            AppError::PermissionDenied("denied".into()).user_message(),
            "Location access is required to show nearby posts"
        );
    }

    #[test]
    fn test_http_display() {
        let err = AppError::Http {
            status: 401,
            message: "The request requires valid record authorization token.".into(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP 401: The request requires valid record authorization token."
        );
    }
}
