use bincode::{Decode, Encode};
use stf_clock::{TfDuration, TfStamp};
use stf_traits::{CanTransform, ExtrapolationDirection, StampedTransform, TfError, TfResult};

/// Simple mode lookup: one time for both frames.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct LookupRequest {
    pub target_frame: String,
    pub source_frame: String,
    pub time: TfStamp,
    /// How long the server may wait for the data to arrive.
    pub timeout: TfDuration,
}

/// Advanced mode lookup: the source and target are taken at different times and bridged
/// through a fixed frame.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct LookupFullRequest {
    pub target_frame: String,
    pub target_time: TfStamp,
    pub source_frame: String,
    pub source_time: TfStamp,
    pub fixed_frame: String,
    pub timeout: TfDuration,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct PublishRequest {
    pub authority: String,
    pub is_static: bool,
    pub transforms: Vec<StampedTransform>,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub enum Request {
    Ping,
    Lookup(LookupRequest),
    LookupFull(LookupFullRequest),
    CanTransform(LookupRequest),
    CanTransformFull(LookupFullRequest),
    Publish(PublishRequest),
}

impl Request {
    /// Short operation name, for logs.
    pub fn operation(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Lookup(_) => "lookup",
            Request::LookupFull(_) => "lookup_full",
            Request::CanTransform(_) => "can_transform",
            Request::CanTransformFull(_) => "can_transform_full",
            Request::Publish(_) => "publish",
        }
    }

    /// The server side wait the caller asked for.
    pub fn timeout(&self) -> TfDuration {
        match self {
            Request::Lookup(r) | Request::CanTransform(r) => r.timeout,
            Request::LookupFull(r) | Request::CanTransformFull(r) => r.timeout,
            Request::Ping | Request::Publish(_) => TfDuration::ZERO,
        }
    }
}

/// Wire image of [`TfError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum ErrorKind {
    Connection,
    Timeout,
    Lookup,
    ExtrapolationPast,
    ExtrapolationFuture,
    InvalidArgument,
}

impl ErrorKind {
    pub fn into_error(self, message: String) -> TfError {
        match self {
            ErrorKind::Connection => TfError::Connection(message),
            ErrorKind::Timeout => TfError::Timeout(message),
            ErrorKind::Lookup => TfError::Lookup(message),
            ErrorKind::ExtrapolationPast => TfError::past(message),
            ErrorKind::ExtrapolationFuture => TfError::future(message),
            ErrorKind::InvalidArgument => TfError::InvalidArgument(message),
        }
    }
}

impl From<&TfError> for ErrorKind {
    fn from(error: &TfError) -> Self {
        match error {
            TfError::Connection(_) => ErrorKind::Connection,
            TfError::Timeout(_) => ErrorKind::Timeout,
            TfError::Lookup(_) => ErrorKind::Lookup,
            TfError::Extrapolation {
                direction: ExtrapolationDirection::Past,
                ..
            } => ErrorKind::ExtrapolationPast,
            TfError::Extrapolation {
                direction: ExtrapolationDirection::Future,
                ..
            } => ErrorKind::ExtrapolationFuture,
            TfError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub enum Response {
    Pong,
    Transform(StampedTransform),
    Error {
        kind: ErrorKind,
        message: String,
    },
    CanTransform {
        possible: bool,
        diagnostic: Option<String>,
    },
    Published {
        accepted: u32,
    },
}

impl Response {
    pub fn error(error: &TfError) -> Self {
        Response::Error {
            kind: error.into(),
            message: error.message().to_string(),
        }
    }

    fn unexpected(self, expected: &str) -> TfError {
        TfError::Connection(format!(
            "protocol violation: expected a {expected} response, got {self:?}"
        ))
    }

    /// Decodes the answer to a `Lookup` or `LookupFull` request.
    pub fn into_transform(self) -> TfResult<StampedTransform> {
        match self {
            Response::Transform(t) => Ok(t),
            Response::Error { kind, message } => Err(kind.into_error(message)),
            other => Err(other.unexpected("transform")),
        }
    }

    /// Decodes the answer to a `CanTransform` request. Never fails: errors become the diagnostic.
    pub fn into_can_transform(self) -> CanTransform {
        match self {
            Response::CanTransform {
                possible,
                diagnostic,
            } => CanTransform {
                possible,
                diagnostic,
            },
            Response::Error { kind, message } => {
                CanTransform::no(kind.into_error(message).to_string())
            }
            other => CanTransform::no(other.unexpected("can_transform").to_string()),
        }
    }

    pub fn into_published(self) -> TfResult<u32> {
        match self {
            Response::Published { accepted } => Ok(accepted),
            Response::Error { kind, message } => Err(kind.into_error(message)),
            other => Err(other.unexpected("published")),
        }
    }
}

impl From<TfResult<StampedTransform>> for Response {
    fn from(result: TfResult<StampedTransform>) -> Self {
        match result {
            Ok(t) => Response::Transform(t),
            Err(e) => Response::error(&e),
        }
    }
}

impl From<CanTransform> for Response {
    fn from(c: CanTransform) -> Self {
        Response::CanTransform {
            possible: c.possible,
            diagnostic: c.diagnostic,
        }
    }
}
