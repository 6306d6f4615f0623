use std::fmt;

#[derive(Debug)]
pub enum CliError {
    Config(String),
    Io(String),
    /// The cache refused the operation (unknown endpoint, disposed, ...).
    Api(String),
    /// The backend request settled with an error.
    Query(String),
    Render(String),
    Watch(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Api(msg) => write!(f, "Cache error: {msg}"),
            Self::Query(msg) => write!(f, "Request failed: {msg}"),
            Self::Render(msg) => write!(f, "Could not render response: {msg}"),
            Self::Watch(msg) => write!(f, "Watch stopped: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<spectra_core::QueryError> for CliError {
    fn from(error: spectra_core::QueryError) -> Self {
        Self::Query(format!("{} ({})", error, error.kind().as_str()))
    }
}

impl From<spectra_core::ApiError> for CliError {
    fn from(error: spectra_core::ApiError) -> Self {
        Self::Api(error.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        Self::Render(error.to_string())
    }
}

pub type CliResult<T> = Result<T, CliError>;

pub fn print_success(message: &str) {
    println!("[SUCCESS] {message}");
}

pub fn print_error(message: &str) {
    eprintln!("[ERROR] {message}");
}

pub fn print_info(message: &str) {
    println!("[INFO] {message}");
}
