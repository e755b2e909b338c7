//! `sqlwire` error types.
use std::{backtrace::Backtrace, fmt, io, str::Utf8Error};

use crate::{common::unit_error, frame::ProtocolError, session::ParseError, value::ValueError};

/// A specialized [`Result`] type for `sqlwire` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `sqlwire` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Prefix the error message with `context`.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Returns `true` if the operation was attempted on a closed wire, response or result set.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::Closed(_))
    }

    /// Returns `true` if an explicit deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout(_))
    }
}

/// All possible error kind from `sqlwire` library.
pub enum ErrorKind {
    Closed(AlreadyClosed),
    Backpressure(Backpressure),
    Timeout(TimeoutError),
    Io(io::Error),
    Value(ValueError),
    ServerCrashed(ServerCrashed),
    Protocol(ProtocolError),
    Config(ParseError),
    InvalidArgument(InvalidArgument),
}

unit_error! {
    /// Operation attempted on a closed session wire, response or result set.
    pub struct AlreadyClosed("already closed");
}

unit_error! {
    /// Every response box is owned and the pending request queue is full.
    pub struct Backpressure("pending requests exceeded response boxes");
}

unit_error! {
    /// Explicit deadline elapsed before the response completed.
    pub struct TimeoutError("response timed out");
}

unit_error! {
    /// The transport was severed while responses were still expected.
    pub struct ServerCrashed("server crashed");
}

/// Invalid argument passed by the caller.
pub struct InvalidArgument(pub(crate) &'static str);

impl std::error::Error for InvalidArgument { }

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid argument: {}", self.0)
    }
}

impl fmt::Debug for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<AlreadyClosed>e => ErrorKind::Closed(e));
from!(<Backpressure>e => ErrorKind::Backpressure(e));
from!(<TimeoutError>e => ErrorKind::Timeout(e));
from!(<tokio::time::error::Elapsed>_ => ErrorKind::Timeout(TimeoutError));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<ValueError>e => ErrorKind::Value(e));
from!(<Utf8Error>e => ErrorKind::Value(e.into()));
from!(<ServerCrashed>e => ErrorKind::ServerCrashed(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<ParseError>e => ErrorKind::Config(e));
from!(<InvalidArgument>e => ErrorKind::InvalidArgument(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(e) => e.fmt(f),
            Self::Backpressure(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Value(e) => e.fmt(f),
            Self::ServerCrashed(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Config(e) => e.fmt(f),
            Self::InvalidArgument(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_with_context() {
        let err = Error::from(Backpressure).context("send");
        assert!(err.to_string().starts_with("send: pending requests exceeded response boxes"));
        assert!(matches!(err.kind(), ErrorKind::Backpressure(_)));

        let err = Error::from(AlreadyClosed);
        assert!(err.is_closed());
        assert!(!err.is_timeout());
    }
}
