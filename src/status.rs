//! Backend status codes and the error taxonomy they map onto
//!
//! The engine reports every outcome as a [`StatusCode`]. Callers never see
//! those codes directly: [`classify`] folds them into a handful of
//! [`ErrorKind`]s and [`StatusCode::into_error`] builds the typed error.

use crate::error::Error;
use std::fmt;

/// Status code reported by the key-value engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusCode {
    #[default]
    Success,
    AuthContinue,
    AuthError,
    DeltaBadval,
    E2Big,
    EBusy,
    EInternal,
    EInval,
    ENoMem,
    ERange,
    Error,
    ETmpFail,
    KeyEExists,
    KeyENoEnt,
    LibeventError,
    NetworkError,
    NotMyVbucket,
    NotStored,
    NotSupported,
    UnknownCommand,
    UnknownHost,
    ProtocolError,
    ETimedOut,
    ConnectError,
}

/// Error kinds exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Success,
    /// Valid empty result for reads.
    NotFound,
    KeyAlreadyExists,
    Timeout,
    ConnectionFailure,
    OutOfMemory,
    Failure,
}

impl StatusCode {
    /// Symbolic name, used verbatim as the message of generic failures
    pub const fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Success => "SUCCESS",
            StatusCode::AuthContinue => "AUTH_CONTINUE",
            StatusCode::AuthError => "AUTH_ERROR",
            StatusCode::DeltaBadval => "DELTA_BADVAL",
            StatusCode::E2Big => "E2BIG",
            StatusCode::EBusy => "EBUSY",
            StatusCode::EInternal => "EINTERNAL",
            StatusCode::EInval => "EINVAL",
            StatusCode::ENoMem => "ENOMEM",
            StatusCode::ERange => "ERANGE",
            StatusCode::Error => "ERROR",
            StatusCode::ETmpFail => "ETMPFAIL",
            StatusCode::KeyEExists => "KEY_EEXISTS",
            StatusCode::KeyENoEnt => "KEY_ENOENT",
            StatusCode::LibeventError => "LIBEVENT_ERROR",
            StatusCode::NetworkError => "NETWORK_ERROR",
            StatusCode::NotMyVbucket => "NOT_MY_VBUCKET",
            StatusCode::NotStored => "NOT_STORED",
            StatusCode::NotSupported => "NOT_SUPPORTED",
            StatusCode::UnknownCommand => "UNKNOWN_COMMAND",
            StatusCode::UnknownHost => "UNKNOWN_HOST",
            StatusCode::ProtocolError => "PROTOCOL_ERROR",
            StatusCode::ETimedOut => "ETIMEDOUT",
            StatusCode::ConnectError => "CONNECT_ERROR",
        }
    }

    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, StatusCode::Success)
    }

    /// Build the caller-facing error for a failed operation.
    ///
    /// `Success` and `KeyENoEnt` are not errors for reads; when they reach
    /// this function the operation did not expect them and they become a
    /// generic `Failure` named after the code.
    pub fn into_error(self) -> Error {
        let name = self.as_str().to_string();
        match classify(self) {
            ErrorKind::KeyAlreadyExists => Error::KeyAlreadyExists(name),
            ErrorKind::Timeout => Error::Timeout,
            ErrorKind::ConnectionFailure => Error::ConnectionFailure(name),
            ErrorKind::OutOfMemory => Error::OutOfMemory(name),
            ErrorKind::Success | ErrorKind::NotFound | ErrorKind::Failure => Error::Failure(name),
        }
    }

    /// Error for a failure reported on the connection-level channel.
    ///
    /// Only `ConnectionFailure` or `Failure` are possible here; the engine's
    /// message replaces the symbolic name when it supplies one.
    pub fn into_connection_error(self, message: Option<&str>) -> Error {
        let msg = message.unwrap_or(self.as_str()).to_string();
        match classify(self) {
            ErrorKind::ConnectionFailure => Error::ConnectionFailure(msg),
            _ => Error::Failure(msg),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed status-to-kind table
pub const fn classify(code: StatusCode) -> ErrorKind {
    match code {
        StatusCode::Success => ErrorKind::Success,
        StatusCode::KeyENoEnt => ErrorKind::NotFound,
        StatusCode::KeyEExists => ErrorKind::KeyAlreadyExists,
        StatusCode::ETimedOut => ErrorKind::Timeout,
        StatusCode::NetworkError | StatusCode::UnknownHost | StatusCode::ConnectError => {
            ErrorKind::ConnectionFailure
        }
        StatusCode::ENoMem => ErrorKind::OutOfMemory,
        _ => ErrorKind::Failure,
    }
}
