use sluice_core::SluiceError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt column '{column}': {reason}")]
    Corrupt { column: &'static str, reason: String },
}

impl From<StoreError> for SluiceError {
    fn from(err: StoreError) -> Self {
        SluiceError::Store(err.to_string())
    }
}
