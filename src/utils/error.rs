use thiserror::Error;

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Database error: {0}")]
    DbError(#[from] rusqlite::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Cannot read source '{location}': {details}")]
    SourceUnreadable { location: String, details: String },

    #[error("Cannot find field names in CSV file '{location}'")]
    FieldNamesNotFound { location: String },

    #[error("The input file '{location}' is missing following columns: {}", columns.join(", "))]
    MissingColumns {
        location: String,
        columns: Vec<String>,
    },

    #[error("Invalid value '{value}' for the '{key}' property")]
    InvalidProperty { key: String, value: String },

    #[error("No results read from '{location}'")]
    NoResults { location: String },

    #[error("{0}")]
    NothingToDo(String),

    #[error("Cannot find testrun id in '{0}'")]
    MissingTestrunId(String),

    #[error("XML file is not in expected format{0}")]
    UnexpectedFormat(String),
}

impl DumpError {
    pub fn nothing_to_export() -> Self {
        DumpError::NothingToDo("Nothing to export".to_string())
    }
}

pub type Result<T> = std::result::Result<T, DumpError>;
