use std::fmt::{self, Display};

/// Errors produced while decoding wire values.
#[derive(Debug)]
pub enum ModelError {
    InvalidQueueKey(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidQueueKey(msg) => {
                write!(f, "invalid queue key: {msg}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
