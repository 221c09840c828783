use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Version conflict on {collection}/{id}: expected {expected}, current is {current}")]
    VersionConflict {
        collection: String,
        id: String,
        expected: u32,
        current: u32,
    },

    #[error("Record already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A domain rule refused the write inside a transaction
    #[error(transparent)]
    Rejected(#[from] harbor_core::HarborError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
