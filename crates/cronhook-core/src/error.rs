use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The config file or environment overrides could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Short error code string returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
