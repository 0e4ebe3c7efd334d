use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire mllib crate.
pub type Result<T> = std::result::Result<T, MlError>;

/// The backend's error type.
///
/// The serving layer maps each variant to a status in its envelope, so the variants
/// separate what the caller did wrong from what went wrong inside the library.
#[derive(Debug)]
pub enum MlError {
    /// The service configuration can't be used to build a backend.
    InvalidConfig(String),
    /// The configuration names an input connector this library doesn't have.
    UnknownConnector(String),
    /// The call's parameters are rejected by the backend.
    InvalidParams(String),
    /// Prediction was requested before any model was trained or loaded.
    NotTrained,
    /// Training stopped at a checkpoint because cancellation was requested.
    Cancelled,
    /// The input data couldn't be turned into a dataset.
    Data { uri: String, msg: String },
    /// An underlying I/O error.
    Io(io::Error),
}

impl MlError {
    /// Whether the error was caused by the call's parameters rather than by the library.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidParams(_) | Self::NotTrained)
    }
}

impl Display for MlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid service config: {msg}"),
            Self::UnknownConnector(name) => write!(f, "unknown input connector: {name}"),
            Self::InvalidParams(msg) => write!(f, "invalid parameters: {msg}"),
            Self::NotTrained => f.write_str("no trained model available"),
            Self::Cancelled => f.write_str("training cancelled"),
            Self::Data { uri, msg } => write!(f, "bad input data {uri}: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for MlError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidParams(value.to_string())
    }
}
