//! Error types for Rollcall services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,

    // Authentication errors (2xxx)
    Unauthorized,

    // Authorization errors (3xxx)
    Forbidden,
    NotEnrolled,
    NotSessionOwner,
    TenantMismatch,

    // Resource errors (4xxx)
    NotFound,
    CourseNotFound,
    SessionNotFound,
    TenantNotFound,

    // State-conflict errors (5xxx)
    SessionConflict,
    AlreadyCompleted,
    SessionClosed,
    NotEnoughTime,
    NotificationNotSent,
    InvalidEndTime,
    CourseNotAvailable,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    TransactionError,

    // External service errors (8xxx)
    MailError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,

            // Authn (2xxx)
            ErrorCode::Unauthorized => 2001,

            // Authz (3xxx)
            ErrorCode::Forbidden => 3001,
            ErrorCode::NotEnrolled => 3002,
            ErrorCode::NotSessionOwner => 3003,
            ErrorCode::TenantMismatch => 3004,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::CourseNotFound => 4002,
            ErrorCode::SessionNotFound => 4003,
            ErrorCode::TenantNotFound => 4004,

            // State conflicts (5xxx)
            ErrorCode::SessionConflict => 5001,
            ErrorCode::AlreadyCompleted => 5002,
            ErrorCode::SessionClosed => 5003,
            ErrorCode::NotEnoughTime => 5004,
            ErrorCode::NotificationNotSent => 5005,
            ErrorCode::InvalidEndTime => 5006,
            ErrorCode::CourseNotAvailable => 5007,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::TransactionError => 7003,

            // External (8xxx)
            ErrorCode::MailError => 8001,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("User is not enrolled in course {course_id}")]
    NotEnrolled { course_id: String },

    #[error("Caller does not own session {id}")]
    NotSessionOwner { id: String },

    #[error("Tenant mismatch")]
    TenantMismatch,

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Course not found: {id}")]
    CourseNotFound { id: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Tenant not found: {id}")]
    TenantNotFound { id: String },

    // State-conflict errors
    #[error("An open session already exists in another course: {open_course_id}")]
    SessionConflict { open_course_id: String },

    #[error("Course already completed; the existing session must be deleted first")]
    AlreadyCompleted,

    #[error("Session is already closed: {id}")]
    SessionClosed { id: String },

    #[error("Required watch time not yet elapsed: {remaining_sec}s remaining")]
    NotEnoughTime { remaining_sec: i64 },

    #[error("No checkout notification has been sent for this session")]
    NotificationNotSent,

    #[error("End time out of valid range: {message}")]
    InvalidEndTime { message: String },

    #[error("Course is not available for check-in: {id}")]
    CourseNotAvailable { id: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Mail transport error: {message}")]
    Mail { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::NotEnrolled { .. } => ErrorCode::NotEnrolled,
            AppError::NotSessionOwner { .. } => ErrorCode::NotSessionOwner,
            AppError::TenantMismatch => ErrorCode::TenantMismatch,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::CourseNotFound { .. } => ErrorCode::CourseNotFound,
            AppError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            AppError::TenantNotFound { .. } => ErrorCode::TenantNotFound,
            AppError::SessionConflict { .. } => ErrorCode::SessionConflict,
            AppError::AlreadyCompleted => ErrorCode::AlreadyCompleted,
            AppError::SessionClosed { .. } => ErrorCode::SessionClosed,
            AppError::NotEnoughTime { .. } => ErrorCode::NotEnoughTime,
            AppError::NotificationNotSent => ErrorCode::NotificationNotSent,
            AppError::InvalidEndTime { .. } => ErrorCode::InvalidEndTime,
            AppError::CourseNotAvailable { .. } => ErrorCode::CourseNotAvailable,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Mail { .. } => ErrorCode::MailError,
            AppError::HttpClient(_) => ErrorCode::MailError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::Forbidden { .. }
            | AppError::NotEnrolled { .. }
            | AppError::NotSessionOwner { .. }
            | AppError::TenantMismatch
            | AppError::AlreadyCompleted => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::CourseNotFound { .. }
            | AppError::SessionNotFound { .. }
            | AppError::TenantNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::SessionConflict { .. }
            | AppError::SessionClosed { .. }
            | AppError::NotEnoughTime { .. }
            | AppError::NotificationNotSent
            | AppError::InvalidEndTime { .. }
            | AppError::CourseNotAvailable { .. } => StatusCode::CONFLICT,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Mail { .. } | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Structured detail payload for errors that carry data the caller
    /// needs without parsing the message.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::NotEnoughTime { remaining_sec } => {
                Some(serde_json::json!({ "remaining_sec": remaining_sec }))
            }
            AppError::SessionConflict { open_course_id } => {
                Some(serde_json::json!({ "open_course_id": open_course_id }))
            }
            _ => None,
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let details = self.details();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details,
                request_id: None, // Should be filled by middleware
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
