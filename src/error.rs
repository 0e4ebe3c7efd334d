use std::{error::Error, fmt};

use mllib::MlError;

/// The result type used across the serving layer.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Everything that can go wrong while serving a call.
///
/// Every variant maps to a fixed `(code, msg, dd_code)` triple, errors never leave the api
/// as anything but an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    ServiceNotFound(String),
    JobNotFound(u64),
    AlreadyExists(String),
    BadRequest(String),
    UnknownLibrary(String),
    UnknownConnector(String),
    /// The service is busy with an incompatible operation.
    Conflict(String),
    /// The backend rejected the call's parameters.
    BackendValidation(String),
    /// Training or prediction itself failed.
    BackendFailure(String),
}

impl ApiError {
    /// The http-like status code.
    pub fn code(&self) -> u16 {
        match self {
            Self::ServiceNotFound(_) | Self::JobNotFound(_) => 404,
            Self::AlreadyExists(_)
            | Self::BadRequest(_)
            | Self::UnknownLibrary(_)
            | Self::UnknownConnector(_) => 400,
            Self::Conflict(_) => 409,
            Self::BackendValidation(_) | Self::BackendFailure(_) => 500,
        }
    }

    /// The message paired with `code`.
    pub fn msg(&self) -> &'static str {
        match self.code() {
            404 => "NotFound",
            400 => "BadRequest",
            409 => "Conflict",
            _ => "InternalError",
        }
    }

    /// The application code disambiguating errors that share a status code.
    pub fn dd_code(&self) -> u16 {
        match self {
            Self::UnknownLibrary(_) => 1000,
            Self::ServiceNotFound(_) => 1002,
            Self::JobNotFound(_) => 1003,
            Self::UnknownConnector(_) => 1004,
            Self::AlreadyExists(_) | Self::BadRequest(_) => 1006,
            Self::BackendValidation(_) | Self::BackendFailure(_) => 1007,
            Self::Conflict(_) => 1008,
        }
    }

    /// Maps a failure to build a backend, which always blames the service configuration.
    pub fn from_creation(err: MlError) -> Self {
        match err {
            MlError::UnknownConnector(name) => Self::UnknownConnector(name),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceNotFound(name) => write!(f, "service {name} not found"),
            Self::JobNotFound(id) => write!(f, "job {id} not found"),
            Self::AlreadyExists(name) => write!(f, "service {name} already exists"),
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::UnknownLibrary(name) => write!(f, "unknown model library: {name}"),
            Self::UnknownConnector(name) => write!(f, "unknown input connector: {name}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::BackendValidation(msg) | Self::BackendFailure(msg) => f.write_str(msg),
        }
    }
}

impl Error for ApiError {}

impl From<MlError> for ApiError {
    fn from(value: MlError) -> Self {
        match value {
            MlError::UnknownConnector(name) => Self::UnknownConnector(name),
            e if e.is_validation() => Self::BackendValidation(e.to_string()),
            e => Self::BackendFailure(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        Self::BadRequest(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_and_validation_are_told_apart() {
        let conflict = ApiError::Conflict("training".into());
        assert_eq!((conflict.code(), conflict.msg(), conflict.dd_code()), (409, "Conflict", 1008));

        let invalid: ApiError = MlError::InvalidParams("missing width".into()).into();
        assert_eq!((invalid.code(), invalid.msg(), invalid.dd_code()), (500, "InternalError", 1007));
    }

    #[test]
    fn test_not_found_codes() {
        assert_eq!(ApiError::ServiceNotFound("svc".into()).dd_code(), 1002);
        assert_eq!(ApiError::JobNotFound(3).dd_code(), 1003);
        assert_eq!(ApiError::JobNotFound(3).code(), 404);
    }

    #[test]
    fn test_creation_failures_are_bad_requests() {
        let err = ApiError::from_creation(MlError::InvalidConfig("no repository".into()));
        assert_eq!((err.code(), err.dd_code()), (400, 1006));

        let err = ApiError::from_creation(MlError::UnknownConnector("text".into()));
        assert_eq!((err.code(), err.dd_code()), (400, 1004));
    }
}
