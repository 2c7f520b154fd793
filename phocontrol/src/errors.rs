use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Unknown command: {0}")]
    InvalidCommand(String),
    #[error("Player controller is not running")]
    ControllerUnavailable,
    #[error("Sleep coordinator is not running")]
    CoordinatorUnavailable,
    #[error("Invalid GPIO binding '{0}': {1}")]
    InvalidBinding(String, String),
    #[error("GPIO pin {pin} level {level} is bound twice")]
    DuplicateBinding { pin: u32, level: String },
    #[error("Display error: {0}")]
    Display(String),
    #[error("Display did not start within {0:?}")]
    DisplayStartTimeout(std::time::Duration),
    #[error("Sync failed: {0}")]
    Sync(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ControlError {
    pub fn invalid_binding(spec: &str, reason: impl Into<String>) -> Self {
        ControlError::InvalidBinding(spec.to_string(), reason.into())
    }

    pub fn display(message: impl Into<String>) -> Self {
        ControlError::Display(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
