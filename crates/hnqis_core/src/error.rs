use thiserror::Error;

/// Malformed, missing or unreadable CSV input.
#[derive(Debug, Error)]
#[error("CSV not valid: {message}")]
pub struct CsvError {
    pub message: String,
}

impl CsvError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Business-rule violation in parsed input. Raised before any remote write.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("CSV must have {expected} as headers")]
    MissingColumns { expected: String },
    #[error("no data rows found in CSV")]
    Empty,
    #[error("no programs found in CSV")]
    NoPrograms,
    #[error("row {row}: {column} value '{value}' is not a valid UID")]
    InvalidUid {
        row: usize,
        column: String,
        value: String,
    },
    #[error("column header '{column}' is not a valid UID")]
    InvalidHeaderUid { column: String },
    #[error("'{value}' is not a valid UID")]
    InvalidArgumentUid { value: String },
    #[error("duplicate {column} found in CSV: {values}")]
    Duplicates { column: String, values: String },
}

/// Transport failure or a non-200 HTTP response.
#[derive(Debug, Error)]
#[error("HTTP code: {}\nURL: {url}\nRESPONSE:\n{body}", status_label(.status))]
pub struct ApiError {
    pub status: Option<u16>,
    pub url: String,
    pub body: String,
}

fn status_label(status: &Option<u16>) -> String {
    status
        .map(|code| code.to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

/// Missing or invalid credentials / server configuration.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Csv,
    Validation,
    Api,
    Other,
}

impl ErrorKind {
    pub fn of(error: &anyhow::Error) -> Self {
        if error.downcast_ref::<ConfigError>().is_some() {
            Self::Config
        } else if error.downcast_ref::<CsvError>().is_some() {
            Self::Csv
        } else if error.downcast_ref::<ValidationError>().is_some() {
            Self::Validation
        } else if error.downcast_ref::<ApiError>().is_some() {
            Self::Api
        } else {
            Self::Other
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Self::Other => 1,
            Self::Config => 2,
            Self::Csv => 3,
            Self::Validation => 4,
            Self::Api => 5,
        }
    }
}
