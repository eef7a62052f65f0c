//! The manager reports failures through a small, closed set of error
//! kinds rather than a stringly-typed result. Every fallible public
//! operation returns `Result<T, Error>` directly instead of stashing a
//! diagnostic on shared state under the lock.

/// The four ways a public operation can fail.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// A caller-supplied value violates a precondition: bad alignment,
    /// zero size, a disallowed flag, an address outside the managed
    /// range, or a range that doesn't fit inside a single region.
    InvalidParameter,
    /// No gap was large enough and the frontiers can't advance.
    OutOfMemory,
    /// A secondary allocation (e.g. a descriptor for a middle split)
    /// could not be satisfied.
    Failure,
    /// A post-condition sanity check failed. Callers should treat this
    /// as a bug in the manager, not in their own usage.
    Unexpected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::Failure => "failure",
            ErrorKind::Unexpected => "unexpected internal state",
        };
        f.write_str(s)
    }
}

/// An error returned by a manager operation: a kind plus a fixed
/// diagnostic message.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: &'static str,
}

impl Error {
    #[inline]
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Error { kind, message }
    }

    #[inline]
    pub const fn invalid_parameter(message: &'static str) -> Self {
        Error::new(ErrorKind::InvalidParameter, message)
    }

    #[inline]
    pub const fn out_of_memory(message: &'static str) -> Self {
        Error::new(ErrorKind::OutOfMemory, message)
    }

    #[inline]
    pub const fn failure(message: &'static str) -> Self {
        Error::new(ErrorKind::Failure, message)
    }

    #[inline]
    pub const fn unexpected(message: &'static str) -> Self {
        Error::new(ErrorKind::Unexpected, message)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
