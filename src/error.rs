use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing status categories: {}", .0.join(", "))]
    MissingCategories(Vec<String>),
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: &'static str, value: String },
}

impl ReportError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
