use thiserror::Error;

/// Failure to load the item catalog. Fatal at startup.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog is not valid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Catalog is missing required column: {0}")]
    MissingColumn(String),

    #[error("Row {row} has an empty `{column}` value")]
    MissingField { row: usize, column: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported state version: {0}")]
    UnsupportedVersion(String),

    #[error("Local cache write failed: {0}")]
    LocalWrite(String),

    #[error("Remote backend error: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl StoreError {
    /// Only a failed local write is fatal to the calling operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::LocalWrite(_))
    }
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Session {0} holds no active assignment")]
    NoActiveAssignment(String),

    #[error("Session holds item {actual:?}, not item {expected}")]
    AssignmentMismatch {
        expected: usize,
        actual: Option<usize>,
    },

    #[error("Item not found: {0}")]
    UnknownItem(usize),

    #[error("Username is required")]
    InvalidUsername,

    #[error("Failed to persist state: {0}")]
    Persist(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Nothing to export")]
    Empty,

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Export I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
