use anyhow::Error as AnyhowError;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Which side of the retained data window a request fell off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum ExtrapolationDirection {
    Past,
    Future,
}

impl Display for ExtrapolationDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtrapolationDirection::Past => write!(f, "past"),
            ExtrapolationDirection::Future => write!(f, "future"),
        }
    }
}

/// Errors surfaced to callers of a transform lookup, local or remote.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TfError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Extrapolation into the {direction}: {message}")]
    Extrapolation {
        direction: ExtrapolationDirection,
        message: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl TfError {
    pub fn past(message: impl Into<String>) -> Self {
        TfError::Extrapolation {
            direction: ExtrapolationDirection::Past,
            message: message.into(),
        }
    }

    pub fn future(message: impl Into<String>) -> Self {
        TfError::Extrapolation {
            direction: ExtrapolationDirection::Future,
            message: message.into(),
        }
    }

    /// The bare message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            TfError::Connection(m)
            | TfError::Timeout(m)
            | TfError::Lookup(m)
            | TfError::InvalidArgument(m) => m,
            TfError::Extrapolation { message, .. } => message,
        }
    }
}

pub type TfResult<T> = Result<T, TfError>;

/// Infrastructure error: binding sockets, reading configuration, codec I/O.
#[derive(Debug)]
pub struct StfError {
    message: String,
    cause: Option<AnyhowError>,
}

impl Display for StfError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Error for StfError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|c| &**c as &(dyn Error + 'static))
    }
}

impl From<&str> for StfError {
    fn from(s: &str) -> StfError {
        StfError {
            message: s.to_string(),
            cause: None,
        }
    }
}

impl From<String> for StfError {
    fn from(s: String) -> StfError {
        StfError {
            message: s,
            cause: None,
        }
    }
}

impl StfError {
    pub fn new_with_cause<E>(message: &str, cause: E) -> StfError
    where
        E: Into<AnyhowError>,
    {
        StfError {
            message: message.to_string(),
            cause: Some(cause.into()),
        }
    }

    pub fn add_cause<E>(mut self, cause: E) -> StfError
    where
        E: Into<AnyhowError>,
    {
        self.cause = Some(cause.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Maps any error into a [`StfError`] with some context, for `map_err`.
pub fn stf_error_map<E>(message: &str) -> impl FnOnce(E) -> StfError + '_
where
    E: Into<AnyhowError>,
{
    move |e| StfError::new_with_cause(message, e)
}

// Generic Result type for the infrastructure.
pub type StfResult<T> = Result<T, StfError>;
