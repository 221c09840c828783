use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarborError {
    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{message}")]
    BusinessRule {
        field: Option<String>,
        message: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl HarborError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// A rule violation tied to one field
    pub fn rule(field: &str, message: impl Into<String>) -> Self {
        Self::BusinessRule {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    /// A rule violation about the record as a whole
    pub fn record_rule(message: impl Into<String>) -> Self {
        Self::BusinessRule {
            field: None,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Field the error refers to, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            Self::BusinessRule { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarborError>;
