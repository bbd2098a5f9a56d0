use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum SowError {
    #[error("Failed to open document {path}: {message}")]
    DocumentOpen { path: String, message: String },

    #[error("Page {page} extraction error: {message}")]
    PageExtraction { page: usize, message: String },

    #[error("Completion response is not a JSON array: {message}")]
    CompletionParse { message: String, raw: String },

    #[error("Completion service error: {message}")]
    CompletionService { message: String },

    #[error("Milestone sync error: {message}")]
    Sync { message: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl SowError {
    pub fn document_open(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DocumentOpen {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn page_extraction(page: usize, message: impl Into<String>) -> Self {
        Self::PageExtraction {
            page,
            message: message.into(),
        }
    }

    pub fn completion_parse(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::CompletionParse {
            message: message.into(),
            raw: raw.into(),
        }
    }

    pub fn completion_service(message: impl Into<String>) -> Self {
        Self::CompletionService {
            message: message.into(),
        }
    }

    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Errors a run absorbs instead of failing the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PageExtraction { .. }
                | Self::CompletionParse { .. }
                | Self::CompletionService { .. }
                | Self::Sync { .. }
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DocumentOpen { .. } => "DOCUMENT_OPEN_ERROR",
            Self::PageExtraction { .. } => "PAGE_EXTRACTION_ERROR",
            Self::CompletionParse { .. } => "COMPLETION_PARSE_ERROR",
            Self::CompletionService { .. } => "COMPLETION_SERVICE_ERROR",
            Self::Sync { .. } => "SYNC_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Internal { .. } => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::DocumentOpen { .. } => 422,
            Self::PageExtraction { .. } => 422,
            Self::CompletionParse { .. } => 502,
            Self::CompletionService { .. } => 502,
            Self::Sync { .. } => 502,
            Self::Validation { .. } => 400,
            Self::Configuration { .. } => 500,
            Self::NotFound { .. } => 404,
            Self::Internal { .. } => 500,
        }
    }
}

pub type SowResult<T> = Result<T, SowError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub message: String,
}

impl From<SowError> for ErrorResponse {
    fn from(error: SowError) -> Self {
        Self {
            error: error.to_string(),
            code: error.error_code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<reqwest::Error> for SowError {
    fn from(error: reqwest::Error) -> Self {
        Self::completion_service(error.to_string())
    }
}

impl From<serde_json::Error> for SowError {
    fn from(error: serde_json::Error) -> Self {
        Self::completion_parse(error.to_string(), String::new())
    }
}

impl From<std::io::Error> for SowError {
    fn from(error: std::io::Error) -> Self {
        Self::internal(error.to_string())
    }
}
