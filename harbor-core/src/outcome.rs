use serde::{Deserialize, Serialize};

use crate::error::HarborError;

/// JSON error body returned by every handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub error: String,
    pub code: IssueCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCode {
    Invalid,
    Required,
    Value,
    BusinessRule,
    Conflict,
    NotFound,
    Exception,
    NotSupported,
    Upstream,
}

impl Outcome {
    /// Create an outcome with a code and message
    pub fn new(code: IssueCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
            field: None,
        }
    }

    /// Create a malformed request error
    pub fn invalid(error: impl Into<String>) -> Self {
        Self::new(IssueCode::Invalid, error)
    }

    /// Create a not found error
    pub fn not_found(collection: &str, id: &str) -> Self {
        Self::new(
            IssueCode::NotFound,
            format!("Record not found: {}/{}", collection, id),
        )
    }

    /// Create a storage error
    pub fn storage_error(error: impl Into<String>) -> Self {
        Self::new(IssueCode::Exception, error)
    }

    /// Create an error for a failed call to an outside service
    pub fn upstream(error: impl Into<String>) -> Self {
        Self::new(IssueCode::Upstream, error)
    }

    /// Attach the offending field
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl From<&HarborError> for Outcome {
    fn from(err: &HarborError) -> Self {
        let code = match err {
            HarborError::NotFound { .. } => IssueCode::NotFound,
            HarborError::Validation { message, .. } if message == "is required" => {
                IssueCode::Required
            }
            HarborError::Validation { .. } => IssueCode::Value,
            HarborError::BusinessRule { .. } => IssueCode::BusinessRule,
            HarborError::Conflict(_) => IssueCode::Conflict,
            HarborError::Storage(_) => IssueCode::Exception,
            HarborError::InvalidJson(_) => IssueCode::Invalid,
        };
        Self {
            error: err.to_string(),
            code,
            field: err.field().map(str::to_string),
        }
    }
}
