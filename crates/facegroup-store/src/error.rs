use facegroup_core::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SqliteError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid stored value for {id}: {detail}")]
    InvalidDbValue { id: String, detail: String },
    #[error("cluster {cluster} references unknown face {face}")]
    MissingMember { cluster: Uuid, face: Uuid },
    #[error("connection lock poisoned")]
    Poisoned,
}

impl SqliteError {
    pub(crate) fn invalid(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidDbValue {
            id: id.into(),
            detail: detail.into(),
        }
    }
}

impl From<SqliteError> for StoreError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::InvalidDbValue { id, detail } => StoreError::Corrupt { id, reason: detail },
            SqliteError::MissingMember { cluster, face } => StoreError::MissingMember { cluster, face },
            SqliteError::Poisoned => StoreError::Poisoned,
            other => StoreError::backend(other),
        }
    }
}
